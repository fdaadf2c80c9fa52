//! Reconciliation of backend payload shapes.
//!
//! The backend has shipped more than one shape per resource over its life:
//! stock rows may carry `kind` + `available` (canonical) or `name` + `issued`
//! (legacy), ids may be numeric, string, or absent, and audit items mix both
//! conventions. Each resource is modeled as an explicit set of parse variants
//! tried in order, all normalized into the same canonical internal record, so
//! the rest of the engine never probes optional fields.
//!
//! Normalization is total over structurally valid payloads: unknown kinds
//! degrade to [`KindTag::Other`], missing `available` is derived from
//! `issued`, and everything is clamped into `[0, total]`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::audit::{AuditSnapshot, SnapshotRow};
use crate::error::EngineError;
use crate::holdings::{HistoryOp, HistoryRow, HoldingEntry, StudentId};
use crate::kind::KindTag;
use crate::stock::StockRow;

/// Accept an id field that may arrive as a string or a number
fn de_string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::Float(n) => n.to_string(),
    })
}

/// Stable synthetic identifier for rows the backend sends without an id
///
/// Pure string hash: the same name always yields the same id within and
/// across refreshes, which keeps client-side list diffing stable. This is a
/// stopgap for an upstream that sometimes omits ids and should go away once
/// the backend guarantees them.
#[must_use]
pub fn stable_id(name: &str) -> u64 {
    let mut h: i32 = 0;
    for ch in name.chars() {
        h = h.wrapping_shl(5).wrapping_sub(h).wrapping_add(ch as i32);
    }
    u64::from(h.unsigned_abs())
}

/// Clamp a raw wire count into `u32` range, flooring negatives at zero
#[must_use]
pub fn clamp_count(n: i64) -> u32 {
    u32::try_from(n.clamp(0, i64::from(u32::MAX))).unwrap_or(0)
}

/// `available` resolved from whichever of `available`/`issued` arrived,
/// clamped into `[0, total]`
fn resolve_available(total: i64, available: Option<i64>, issued: Option<i64>) -> i64 {
    let raw = available.unwrap_or_else(|| total - issued.unwrap_or(0));
    raw.clamp(0, total.max(0))
}

// ─── Stock ──────────────────────────────────────────────────────────────────

/// A stock row as the backend sends it, in either known shape
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum WireStockRow {
    /// Canonical shape keyed by `kind`
    Canonical {
        /// Numeric id, when the backend assigns one
        #[serde(default)]
        id: Option<i64>,
        /// Wire code of the kind
        kind: String,
        /// Units in the catalog
        total: i64,
        /// Units not currently issued
        #[serde(default)]
        available: Option<i64>,
        /// Units issued (older canonical payloads)
        #[serde(default)]
        issued: Option<i64>,
    },
    /// Legacy shape keyed by display `name`
    Legacy {
        /// Numeric id, when the backend assigns one
        #[serde(default)]
        id: Option<i64>,
        /// Display label of the kind
        name: String,
        /// Units in the catalog
        total: i64,
        /// Units issued
        #[serde(default)]
        issued: Option<i64>,
        /// Units not currently issued (rare in this shape)
        #[serde(default)]
        available: Option<i64>,
    },
}

impl WireStockRow {
    /// Normalize into the canonical internal stock row
    #[must_use]
    pub fn normalize(&self) -> StockRow {
        let (id, raw_kind, total, available, issued) = match self {
            WireStockRow::Canonical {
                id,
                kind,
                total,
                available,
                issued,
            } => (*id, kind.as_str(), *total, *available, *issued),
            WireStockRow::Legacy {
                id,
                name,
                total,
                issued,
                available,
            } => (*id, name.as_str(), *total, *available, *issued),
        };

        let kind = KindTag::from_wire(raw_kind);
        let available = resolve_available(total, available, issued);
        let id = id
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or_else(|| stable_id(kind.display_name()));

        StockRow {
            id,
            kind,
            total: clamp_count(total),
            available: clamp_count(available),
        }
    }
}

/// Normalize a full stock listing
#[must_use]
pub fn normalize_stock_list(rows: &[WireStockRow]) -> Vec<StockRow> {
    rows.iter().map(WireStockRow::normalize).collect()
}

// ─── Audits ─────────────────────────────────────────────────────────────────

/// One audit line item as the backend sends it
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum WireAuditItem {
    /// Canonical shape keyed by `kind`
    Canonical {
        /// Wire code of the kind
        kind: String,
        /// Units in the catalog at capture time
        total: i64,
        /// Units issued at capture time
        #[serde(default)]
        issued: Option<i64>,
        /// Units available at capture time
        #[serde(default)]
        available: Option<i64>,
    },
    /// Legacy shape keyed by display `name`
    Legacy {
        /// Display label of the kind
        name: String,
        /// Units in the catalog at capture time
        total: i64,
        /// Units issued at capture time
        #[serde(default)]
        issued: Option<i64>,
        /// Units available at capture time
        #[serde(default)]
        available: Option<i64>,
    },
}

impl WireAuditItem {
    /// Normalize into a snapshot row
    ///
    /// `issued` is re-derived as `total - available` so the row invariant
    /// `issued + available == total` holds even when the upstream triple is
    /// inconsistent.
    #[must_use]
    pub fn normalize(&self) -> SnapshotRow {
        let (raw_kind, total, available, issued) = match self {
            WireAuditItem::Canonical {
                kind,
                total,
                issued,
                available,
            } => (kind.as_str(), *total, *available, *issued),
            WireAuditItem::Legacy {
                name,
                total,
                issued,
                available,
            } => (name.as_str(), *total, *available, *issued),
        };

        let kind = KindTag::from_wire(raw_kind);
        let total = clamp_count(total);
        let available = clamp_count(resolve_available(i64::from(total), available, issued));

        SnapshotRow {
            name: kind.display_name().to_owned(),
            issued: total - available,
            available,
            total,
        }
    }
}

/// An audit snapshot as the backend sends it
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAudit {
    /// Server-assigned identifier (UUID string; numeric ids are normalized)
    #[serde(deserialize_with = "de_string_or_number")]
    pub id: String,
    /// Capture instant, ISO-8601
    pub created_at: String,
    /// Per-kind line items
    pub items: Vec<WireAuditItem>,
}

impl WireAudit {
    /// Normalize into the canonical snapshot with computed sums
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RemoteShape`] when `createdAt` does not start
    /// with a calendar date.
    pub fn normalize(&self) -> Result<AuditSnapshot, EngineError> {
        let date_part = self.created_at.get(..10).unwrap_or(&self.created_at);
        let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(|_| {
            EngineError::RemoteShape {
                detail: format!("audit {}: createdAt {:?} is not a date", self.id, self.created_at),
            }
        })?;

        let rows: Vec<SnapshotRow> = self.items.iter().map(WireAuditItem::normalize).collect();
        let sum_issued = rows.iter().map(|r| u64::from(r.issued)).sum();
        let sum_available = rows.iter().map(|r| u64::from(r.available)).sum();
        let sum_total = rows.iter().map(|r| u64::from(r.total)).sum();

        Ok(AuditSnapshot {
            id: self.id.clone(),
            date,
            rows,
            sum_issued,
            sum_available,
            sum_total,
        })
    }
}

// ─── Student holdings ───────────────────────────────────────────────────────

/// An issuance record as the backend sends it
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireHoldingEntry {
    /// Record identifier (UUID string; numeric ids are normalized)
    #[serde(deserialize_with = "de_string_or_number")]
    pub id: String,
    /// Owning student
    pub student_id: i64,
    /// Kind wire code
    pub kind: String,
    /// Quantity issued in this record
    pub quantity: i64,
    /// When the items were issued
    pub issued_at: DateTime<Utc>,
    /// When the items were returned; `null` means still active
    #[serde(default)]
    pub returned_at: Option<DateTime<Utc>>,
}

impl WireHoldingEntry {
    /// Normalize into the canonical holding entry
    #[must_use]
    pub fn normalize(&self) -> HoldingEntry {
        HoldingEntry {
            id: self.id.clone(),
            student_id: StudentId::new(self.student_id),
            kind: KindTag::from_wire(&self.kind),
            quantity: clamp_count(self.quantity),
            issued_at: self.issued_at,
            returned_at: self.returned_at,
        }
    }
}

/// One activity log line from the backend
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireLogEntry {
    /// When the operation happened
    pub occurred_at: DateTime<Utc>,
    /// `"issue"` or `"return"`
    pub operation: String,
    /// Kind wire code
    pub kind: String,
    /// Quantity in this operation
    pub quantity: i64,
}

impl WireLogEntry {
    /// Normalize into a history row
    #[must_use]
    pub fn normalize(&self) -> HistoryRow {
        let kind = KindTag::from_wire(&self.kind);
        HistoryRow {
            id: format!(
                "{}#{}#{}",
                kind.code(),
                self.operation,
                self.occurred_at.to_rfc3339()
            ),
            occurred_at: self.occurred_at,
            op: if self.operation == "issue" {
                HistoryOp::Issued
            } else {
                HistoryOp::Returned
            },
            kind,
            quantity: clamp_count(self.quantity),
        }
    }
}
