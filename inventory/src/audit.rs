//! Audit snapshot manager.
//!
//! An audit snapshot is an immutable point-in-time capture of the stock
//! aggregate: one row per kind with `issued`/`available`/`total` and the
//! column sums. Snapshots are created from the current aggregate, listed,
//! fetched by id, and deleted; they are never edited.
//!
//! The state is a session-local cache keyed by the server-assigned id.
//! Creation and deletion invalidate the list rather than patching it, so
//! the next listing is always authoritative.

use std::collections::HashMap;

use bursa_core::{Effect, Reducer, SmallVec, smallvec};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::InventoryEnvironment;
use crate::backend::CreateAuditRequest;
use crate::error::{EngineError, FieldErrors};
use crate::stock::StockState;

/// One per-kind line of a snapshot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRow {
    /// Display name of the kind at capture time
    pub name: String,
    /// Units issued at capture time
    pub issued: u32,
    /// Units available at capture time
    pub available: u32,
    /// Units owned at capture time
    pub total: u32,
}

/// An immutable audit snapshot with computed column sums
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditSnapshot {
    /// Server-assigned id
    pub id: String,
    /// Capture date
    pub date: NaiveDate,
    /// Per-kind rows
    pub rows: Vec<SnapshotRow>,
    /// Sum of `issued` over all rows
    pub sum_issued: u64,
    /// Sum of `available` over all rows
    pub sum_available: u64,
    /// Sum of `total` over all rows
    pub sum_total: u64,
}

/// Session-local snapshot cache
#[derive(Clone, Debug, Default)]
pub struct AuditState {
    /// Last loaded listing, in backend order
    pub list: Vec<AuditSnapshot>,
    /// Snapshots fetched or created this session, by id
    pub details: HashMap<String, AuditSnapshot>,
    /// Whether the listing no longer reflects the backend
    pub list_stale: bool,
    /// Id of the most recently created snapshot
    pub last_created: Option<String>,
    /// Whether a round-trip is in flight
    pub loading: bool,
    /// Most recent failure, cleared by the next success
    pub last_error: Option<EngineError>,
}

impl AuditState {
    /// A cached snapshot by id, from the detail cache or the listing
    #[must_use]
    pub fn snapshot(&self, id: &str) -> Option<&AuditSnapshot> {
        self.details
            .get(id)
            .or_else(|| self.list.iter().find(|a| a.id == id))
    }
}

/// Capture rows for a new snapshot from the current stock aggregate
#[must_use]
pub fn snapshot_rows_from_stock(stock: &StockState) -> Vec<SnapshotRow> {
    stock
        .rows_ordered()
        .map(|row| SnapshotRow {
            name: row.kind.display_name().to_owned(),
            issued: row.issued(),
            available: row.available,
            total: row.total,
        })
        .collect()
}

/// Inputs to the audit reducer
#[derive(Clone, Debug)]
pub enum AuditAction {
    /// Load the snapshot listing
    LoadList,
    /// The listing arrived
    ListLoaded(Vec<AuditSnapshot>),
    /// Fetch one snapshot by id
    FetchSnapshot(String),
    /// A fetched snapshot arrived
    SnapshotLoaded(AuditSnapshot),
    /// Capture a new snapshot
    CreateSnapshot {
        /// Capture date
        date: NaiveDate,
        /// Rows captured from the stock aggregate
        rows: Vec<SnapshotRow>,
    },
    /// Backend confirmed the creation
    CreateConfirmed(AuditSnapshot),
    /// Delete a snapshot by id
    DeleteSnapshot(String),
    /// Backend confirmed the deletion
    DeleteConfirmed {
        /// Id of the deleted snapshot
        id: String,
        /// Server acknowledgement text
        message: String,
    },
    /// A round-trip failed
    AuditFailed(EngineError),
}

/// Reducer for the audit snapshot cache
#[derive(Clone, Copy, Debug, Default)]
pub struct AuditReducer;

impl Reducer for AuditReducer {
    type State = AuditState;
    type Action = AuditAction;
    type Environment = InventoryEnvironment;

    #[allow(clippy::too_many_lines)]
    fn reduce(
        &self,
        state: &mut AuditState,
        action: AuditAction,
        env: &InventoryEnvironment,
    ) -> SmallVec<[Effect<AuditAction>; 4]> {
        match action {
            AuditAction::LoadList => {
                state.loading = true;
                let backend = env.backend.clone();
                smallvec![Effect::future(async move {
                    Some(match backend.fetch_audits().await {
                        Ok(audits) => {
                            let normalized: Result<Vec<_>, _> = audits
                                .iter()
                                .map(crate::wire::WireAudit::normalize)
                                .collect();
                            match normalized {
                                Ok(list) => AuditAction::ListLoaded(list),
                                Err(e) => AuditAction::AuditFailed(e),
                            }
                        }
                        Err(e) => AuditAction::AuditFailed(e.into()),
                    })
                })]
            }

            AuditAction::ListLoaded(list) => {
                state.loading = false;
                state.last_error = None;
                state.list_stale = false;
                for audit in &list {
                    state.details.insert(audit.id.clone(), audit.clone());
                }
                state.list = list;
                smallvec![Effect::None]
            }

            AuditAction::FetchSnapshot(id) => {
                if let Err(error) = validate_id(&id) {
                    state.last_error = Some(error);
                    return smallvec![Effect::None];
                }
                state.loading = true;
                let backend = env.backend.clone();
                smallvec![Effect::future(async move {
                    Some(match backend.fetch_audit(&id).await {
                        Ok(audit) => match audit.normalize() {
                            Ok(snapshot) => AuditAction::SnapshotLoaded(snapshot),
                            Err(e) => AuditAction::AuditFailed(e),
                        },
                        Err(e) => AuditAction::AuditFailed(e.into()),
                    })
                })]
            }

            AuditAction::SnapshotLoaded(snapshot) => {
                state.loading = false;
                state.last_error = None;
                state.details.insert(snapshot.id.clone(), snapshot);
                smallvec![Effect::None]
            }

            AuditAction::CreateSnapshot { date, rows } => {
                if let Err(error) = validate_rows(&rows) {
                    state.last_error = Some(error);
                    return smallvec![Effect::None];
                }
                state.loading = true;
                let backend = env.backend.clone();
                smallvec![Effect::future(async move {
                    let req = CreateAuditRequest { date, rows };
                    Some(match backend.create_audit(req).await {
                        Ok(audit) => match audit.normalize() {
                            Ok(snapshot) => AuditAction::CreateConfirmed(snapshot),
                            Err(e) => AuditAction::AuditFailed(e),
                        },
                        Err(e) => AuditAction::AuditFailed(e.into()),
                    })
                })]
            }

            AuditAction::CreateConfirmed(snapshot) => {
                state.loading = false;
                state.last_error = None;
                state.last_created = Some(snapshot.id.clone());
                state.details.insert(snapshot.id.clone(), snapshot);
                state.list_stale = true;
                smallvec![Effect::None]
            }

            AuditAction::DeleteSnapshot(id) => {
                if let Err(error) = validate_id(&id) {
                    state.last_error = Some(error);
                    return smallvec![Effect::None];
                }
                state.loading = true;
                let backend = env.backend.clone();
                smallvec![Effect::future(async move {
                    Some(match backend.delete_audit(&id).await {
                        Ok(ack) => AuditAction::DeleteConfirmed {
                            id,
                            message: ack.message,
                        },
                        Err(e) => AuditAction::AuditFailed(e.into()),
                    })
                })]
            }

            AuditAction::DeleteConfirmed { id, message } => {
                state.loading = false;
                state.last_error = None;
                state.details.remove(&id);
                state.list.retain(|a| a.id != id);
                state.list_stale = true;
                if state.last_created.as_deref() == Some(id.as_str()) {
                    state.last_created = None;
                }
                tracing::info!(%id, %message, "audit snapshot deleted");
                smallvec![Effect::None]
            }

            AuditAction::AuditFailed(error) => {
                state.loading = false;
                tracing::warn!(%error, "audit round-trip failed");
                state.last_error = Some(error);
                smallvec![Effect::None]
            }
        }
    }
}

/// Snapshot ids are server-assigned UUIDs; anything else never hits the wire
fn validate_id(id: &str) -> Result<(), EngineError> {
    Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| EngineError::field("id", format!("not a valid snapshot id: {id}")))
}

fn validate_rows(rows: &[SnapshotRow]) -> Result<(), EngineError> {
    let mut fields = FieldErrors::new();
    if rows.is_empty() {
        fields.insert("rows".into(), "at least one row is required".into());
    }
    for (i, row) in rows.iter().enumerate() {
        if row.name.trim().is_empty() {
            fields.insert(format!("rows[{i}].name"), "must not be empty".into());
        }
        if row.issued + row.available != row.total {
            fields.insert(
                format!("rows[{i}]"),
                format!(
                    "issued {} + available {} does not equal total {}",
                    row.issued, row.available, row.total
                ),
            );
        }
    }
    if fields.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Validation { fields })
    }
}
