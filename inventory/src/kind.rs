//! Kind catalog.
//!
//! The closed enumeration of inventory item kinds, their stable wire codes,
//! and their display labels. The catalog is the join key between stock rows,
//! holdings entries, and audit rows.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A kind of inventory item in the dormitory catalog
///
/// The set is closed: the backend and the engine agree on these fourteen
/// kinds. Values observed outside the set travel as [`KindTag::Other`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemKind {
    /// Тюль
    Tulle,
    /// Штори
    Curtains,
    /// Ковдра
    Blanket,
    /// Матрац
    Mattress,
    /// Наволочки
    Pillowcase,
    /// Чохол
    MattressCover,
    /// Підковдра
    DuvetCover,
    /// Рушник вафельний
    WaffleTowel,
    /// Рушник махровий
    TerryTowel,
    /// Простирадла
    Sheet,
    /// Покривала
    Bedspread,
    /// Подушка
    Pillow,
    /// Скатертина
    Tablecloth,
    /// К-т білизни
    BedSet,
}

impl ItemKind {
    /// Every kind in catalog order
    pub const ALL: [ItemKind; 14] = [
        ItemKind::Tulle,
        ItemKind::Curtains,
        ItemKind::Blanket,
        ItemKind::Mattress,
        ItemKind::Pillowcase,
        ItemKind::MattressCover,
        ItemKind::DuvetCover,
        ItemKind::WaffleTowel,
        ItemKind::TerryTowel,
        ItemKind::Sheet,
        ItemKind::Bedspread,
        ItemKind::Pillow,
        ItemKind::Tablecloth,
        ItemKind::BedSet,
    ];

    /// The stable wire code for this kind
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            ItemKind::Tulle => "tulle",
            ItemKind::Curtains => "curtains",
            ItemKind::Blanket => "blanket",
            ItemKind::Mattress => "mattress",
            ItemKind::Pillowcase => "pillowcase",
            ItemKind::MattressCover => "mattressCover",
            ItemKind::DuvetCover => "duvetCover",
            ItemKind::WaffleTowel => "waffleTowel",
            ItemKind::TerryTowel => "terryTowel",
            ItemKind::Sheet => "sheet",
            ItemKind::Bedspread => "cover",
            ItemKind::Pillow => "pillow",
            ItemKind::Tablecloth => "tablecloth",
            ItemKind::BedSet => "bedSet",
        }
    }

    /// The display label for this kind
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            ItemKind::Tulle => "Тюль",
            ItemKind::Curtains => "Штори",
            ItemKind::Blanket => "Ковдра",
            ItemKind::Mattress => "Матрац",
            ItemKind::Pillowcase => "Наволочки",
            ItemKind::MattressCover => "Чохол",
            ItemKind::DuvetCover => "Підковдра",
            ItemKind::WaffleTowel => "Рушник вафельний",
            ItemKind::TerryTowel => "Рушник махровий",
            ItemKind::Sheet => "Простирадла",
            ItemKind::Bedspread => "Покривала",
            ItemKind::Pillow => "Подушка",
            ItemKind::Tablecloth => "Скатертина",
            ItemKind::BedSet => "К-т білизни",
        }
    }

    /// Look up a kind by its wire code
    #[must_use]
    pub fn from_code(code: &str) -> Option<ItemKind> {
        ItemKind::ALL.into_iter().find(|k| k.code() == code)
    }

    /// Look up a kind by its display label
    #[must_use]
    pub fn from_label(label: &str) -> Option<ItemKind> {
        ItemKind::ALL.into_iter().find(|k| k.label() == label)
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A kind value as observed on the wire
///
/// `Known` kinds are catalog members; `Other` carries any unrecognized kind
/// string as-is so that legacy or future backend payloads never crash the
/// engine — they degrade to displaying the raw string.
///
/// Ordering puts known kinds first (in catalog order), then unknown kinds by
/// their raw string, which keeps aggregations deterministic.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KindTag {
    /// A member of the closed catalog
    Known(ItemKind),
    /// An unrecognized kind, displayed as-is
    Other(String),
}

impl KindTag {
    /// Interpret a wire value: code first, then display label, else passthrough
    #[must_use]
    pub fn from_wire(value: &str) -> KindTag {
        ItemKind::from_code(value)
            .or_else(|| ItemKind::from_label(value))
            .map_or_else(|| KindTag::Other(value.to_owned()), KindTag::Known)
    }

    /// The wire code sent to the backend (raw string for unknown kinds)
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            KindTag::Known(kind) => kind.code(),
            KindTag::Other(raw) => raw,
        }
    }

    /// The human-readable name (label for known kinds, raw string otherwise)
    #[must_use]
    pub fn display_name(&self) -> &str {
        match self {
            KindTag::Known(kind) => kind.label(),
            KindTag::Other(raw) => raw,
        }
    }

    /// Whether this tag is a member of the closed catalog
    #[must_use]
    pub const fn is_known(&self) -> bool {
        matches!(self, KindTag::Known(_))
    }
}

impl From<ItemKind> for KindTag {
    fn from(kind: ItemKind) -> Self {
        KindTag::Known(kind)
    }
}

impl std::fmt::Display for KindTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

impl Serialize for KindTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for KindTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(KindTag::from_wire(&raw))
    }
}
