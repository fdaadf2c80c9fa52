//! Stock aggregate.
//!
//! Per-kind `total`/`available` counts for the whole dormitory, keyed by
//! [`KindTag`]. Catalog edits (upserts) apply optimistically and are tracked
//! per operation, so a backend failure rolls back exactly the one edit that
//! failed while later edits stay in place.
//!
//! Invariant on every row: `0 <= available <= total`. `issued` is always the
//! derived difference, never stored.

use std::collections::{BTreeMap, HashMap};

use bursa_core::{Effect, Reducer, SmallVec, smallvec};
use uuid::Uuid;

use crate::InventoryEnvironment;
use crate::backend::UpsertStockRequest;
use crate::error::EngineError;
use crate::kind::KindTag;
use crate::wire::{normalize_stock_list, stable_id};

/// One catalog row of the stock aggregate
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StockRow {
    /// Backend id, or a synthetic one derived from the kind name
    pub id: u64,
    /// The kind this row counts
    pub kind: KindTag,
    /// Units owned by the dormitory
    pub total: u32,
    /// Units not currently issued to a student
    pub available: u32,
}

impl StockRow {
    /// Units currently issued, derived as `total - available`
    #[must_use]
    pub const fn issued(&self) -> u32 {
        self.total.saturating_sub(self.available)
    }
}

/// Column sums over the whole aggregate
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StockSums {
    /// Sum of `total` across all rows
    pub total: u64,
    /// Sum of `available` across all rows
    pub available: u64,
    /// Sum of derived `issued` across all rows
    pub issued: u64,
}

/// An optimistic upsert awaiting backend confirmation
#[derive(Clone, Debug)]
pub struct PendingUpsert {
    /// The kind the edit targets
    pub kind: KindTag,
    /// The row as it was before the edit, `None` for a brand-new kind
    pub previous: Option<StockRow>,
    /// The row the edit wrote optimistically
    pub applied: StockRow,
}

/// Session-local view of the stock aggregate
#[derive(Clone, Debug, Default)]
pub struct StockState {
    /// Current rows keyed by kind; `BTreeMap` keeps display order stable
    pub rows: BTreeMap<KindTag, StockRow>,
    /// In-flight optimistic upserts keyed by operation id
    pub pending: HashMap<Uuid, PendingUpsert>,
    /// Whether a refresh round-trip is in flight
    pub loading: bool,
    /// Most recent failure, cleared by the next success
    pub last_error: Option<EngineError>,
}

impl StockState {
    /// The current row for a kind, including optimistic edits
    #[must_use]
    pub fn row(&self, kind: &KindTag) -> Option<&StockRow> {
        self.rows.get(kind)
    }

    /// Rows in stable kind order
    pub fn rows_ordered(&self) -> impl Iterator<Item = &StockRow> {
        self.rows.values()
    }

    /// Column sums over the current rows
    #[must_use]
    pub fn sums(&self) -> StockSums {
        self.rows.values().fold(StockSums::default(), |acc, row| StockSums {
            total: acc.total + u64::from(row.total),
            available: acc.available + u64::from(row.available),
            issued: acc.issued + u64::from(row.issued()),
        })
    }
}

/// Inputs to the stock reducer
#[derive(Clone, Debug)]
pub enum StockAction {
    /// Reload the aggregate from the backend
    Refresh,
    /// Refresh round-trip succeeded
    Loaded(Vec<StockRow>),
    /// Refresh round-trip failed
    LoadFailed(EngineError),
    /// Create or edit the catalog row for a kind
    Upsert {
        /// Target kind
        kind: KindTag,
        /// New catalog total
        total: u32,
    },
    /// Backend confirmed an upsert with its authoritative row
    UpsertConfirmed {
        /// The operation being confirmed
        op_id: Uuid,
        /// Authoritative row echoed by the backend
        row: StockRow,
    },
    /// Backend rejected an upsert
    UpsertFailed {
        /// The operation that failed
        op_id: Uuid,
        /// What went wrong
        error: EngineError,
    },
}

/// Reducer for the stock aggregate
#[derive(Clone, Copy, Debug, Default)]
pub struct StockReducer;

impl Reducer for StockReducer {
    type State = StockState;
    type Action = StockAction;
    type Environment = InventoryEnvironment;

    fn reduce(
        &self,
        state: &mut StockState,
        action: StockAction,
        env: &InventoryEnvironment,
    ) -> SmallVec<[Effect<StockAction>; 4]> {
        match action {
            StockAction::Refresh => {
                state.loading = true;
                let backend = env.backend.clone();
                smallvec![Effect::future(async move {
                    Some(match backend.fetch_stock().await {
                        Ok(rows) => StockAction::Loaded(normalize_stock_list(&rows)),
                        Err(e) => StockAction::LoadFailed(e.into()),
                    })
                })]
            }

            StockAction::Loaded(rows) => {
                state.loading = false;
                state.last_error = None;
                // A fresh authoritative listing supersedes any in-flight edit
                state.pending.clear();
                state.rows = rows.into_iter().map(|r| (r.kind.clone(), r)).collect();
                smallvec![Effect::None]
            }

            StockAction::LoadFailed(error) => {
                state.loading = false;
                tracing::warn!(%error, "stock refresh failed");
                state.last_error = Some(error);
                smallvec![Effect::None]
            }

            StockAction::Upsert { kind, total } => {
                let op_id = Uuid::new_v4();
                let previous = state.rows.get(&kind).cloned();

                // Recompute availability holding the issued count constant
                let issued = previous.as_ref().map_or(0, StockRow::issued);
                let applied = StockRow {
                    id: previous
                        .as_ref()
                        .map_or_else(|| stable_id(kind.display_name()), |row| row.id),
                    kind: kind.clone(),
                    total,
                    available: total.saturating_sub(issued),
                };

                state.rows.insert(kind.clone(), applied.clone());
                state.pending.insert(
                    op_id,
                    PendingUpsert {
                        kind: kind.clone(),
                        previous,
                        applied,
                    },
                );

                let backend = env.backend.clone();
                smallvec![Effect::future(async move {
                    let req = UpsertStockRequest { kind, total };
                    Some(match backend.upsert_stock(req).await {
                        Ok(row) => StockAction::UpsertConfirmed {
                            op_id,
                            row: row.normalize(),
                        },
                        Err(e) => StockAction::UpsertFailed {
                            op_id,
                            error: e.into(),
                        },
                    })
                })]
            }

            StockAction::UpsertConfirmed { op_id, row } => {
                if state.pending.remove(&op_id).is_some() {
                    state.last_error = None;
                    state.rows.insert(row.kind.clone(), row);
                } else {
                    tracing::debug!(%op_id, "stale upsert confirmation ignored");
                }
                smallvec![Effect::None]
            }

            StockAction::UpsertFailed { op_id, error } => {
                if let Some(pending) = state.pending.remove(&op_id) {
                    // Roll back only if our write is still the current value;
                    // a newer edit to the same kind must not be clobbered
                    let untouched = state.rows.get(&pending.kind) == Some(&pending.applied);
                    if untouched {
                        match pending.previous {
                            Some(previous) => {
                                state.rows.insert(pending.kind.clone(), previous);
                            }
                            None => {
                                state.rows.remove(&pending.kind);
                            }
                        }
                    }
                    tracing::warn!(%op_id, %error, "stock upsert rolled back");
                    state.last_error = Some(error);
                } else {
                    tracing::debug!(%op_id, "stale upsert failure ignored");
                }
                smallvec![Effect::None]
            }
        }
    }
}
