//! Student holdings ledger.
//!
//! Session-local view of which items each student currently holds, derived
//! from the backend's issuance records plus an overlay of in-flight
//! optimistic operations. The overlay is a per-operation delta log: each
//! unconfirmed issue or return contributes exactly its own delta, so
//! rolling one operation back never disturbs another.
//!
//! The reducer driving this state lives in [`crate::operations`].

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::kind::KindTag;

/// Backend identifier of a student
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StudentId(i64);

impl StudentId {
    /// Wraps a raw backend id
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw backend id
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for StudentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One issuance record from the ledger
///
/// A record is *active* while `returned_at` is `None`; closing it is the
/// only mutation the ledger ever applies to a confirmed record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HoldingEntry {
    /// Backend record id
    pub id: String,
    /// Owning student
    pub student_id: StudentId,
    /// Kind of item issued
    pub kind: KindTag,
    /// Units covered by this record
    pub quantity: u32,
    /// When the items were issued
    pub issued_at: DateTime<Utc>,
    /// When the items came back; `None` while still held
    pub returned_at: Option<DateTime<Utc>>,
}

impl HoldingEntry {
    /// Whether the items of this record are still out
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.returned_at.is_none()
    }
}

/// Current holdings of one kind for one student, overlay included
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregatedHolding {
    /// The kind held
    pub kind: KindTag,
    /// Units currently held
    pub quantity: u32,
}

/// Direction of a history row
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryOp {
    /// Items went out to the student
    Issued,
    /// Items came back
    Returned,
}

impl std::fmt::Display for HistoryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            HistoryOp::Issued => "issue",
            HistoryOp::Returned => "return",
        })
    }
}

/// One line of a student's activity timeline
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryRow {
    /// Synthetic row id, `{kind}#{op}#{timestamp}`
    pub id: String,
    /// When the operation happened
    pub occurred_at: DateTime<Utc>,
    /// Issue or return
    pub op: HistoryOp,
    /// Kind involved
    pub kind: KindTag,
    /// Units involved
    pub quantity: u32,
}

/// One unconfirmed operation's contribution to the optimistic view
///
/// `delta` is positive for an issue and negative for a return. Rollback of
/// an operation removes exactly this record and nothing else.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingOp {
    /// Operation id correlating with the backend round-trip
    pub op_id: Uuid,
    /// Student the operation targets
    pub student_id: StudentId,
    /// Kind the operation targets
    pub kind: KindTag,
    /// Signed quantity change
    pub delta: i64,
}

/// Ledger state for all students touched this session
#[derive(Clone, Debug, Default)]
pub struct HoldingsState {
    /// Confirmed issuance records, active and closed
    pub entries: Vec<HoldingEntry>,
    /// Per-student activity timelines
    pub history: HashMap<StudentId, Vec<HistoryRow>>,
    /// Overlay of unconfirmed operations
    pub pending: Vec<PendingOp>,
    /// Most recent failure, cleared by the next success
    pub last_error: Option<EngineError>,
}

impl HoldingsState {
    /// Units of `kind` the student currently holds, overlay included
    #[must_use]
    pub fn held_quantity(&self, student: StudentId, kind: &KindTag) -> u32 {
        let confirmed: i64 = self
            .entries
            .iter()
            .filter(|e| e.student_id == student && e.is_active() && &e.kind == kind)
            .map(|e| i64::from(e.quantity))
            .sum();
        let overlay: i64 = self
            .pending
            .iter()
            .filter(|p| p.student_id == student && &p.kind == kind)
            .map(|p| p.delta)
            .sum();
        u32::try_from((confirmed + overlay).max(0)).unwrap_or(u32::MAX)
    }

    /// The student's current holdings per kind, overlay included
    ///
    /// Kinds whose net quantity is zero are omitted. Output is in stable
    /// kind order.
    #[must_use]
    pub fn current_holdings(&self, student: StudentId) -> Vec<AggregatedHolding> {
        let mut per_kind: BTreeMap<KindTag, i64> = BTreeMap::new();
        for entry in self
            .entries
            .iter()
            .filter(|e| e.student_id == student && e.is_active())
        {
            *per_kind.entry(entry.kind.clone()).or_default() += i64::from(entry.quantity);
        }
        for op in self.pending.iter().filter(|p| p.student_id == student) {
            *per_kind.entry(op.kind.clone()).or_default() += op.delta;
        }

        per_kind
            .into_iter()
            .filter(|&(_, qty)| qty > 0)
            .map(|(kind, qty)| AggregatedHolding {
                kind,
                quantity: u32::try_from(qty).unwrap_or(u32::MAX),
            })
            .collect()
    }

    /// The student's timeline, newest first; backend order breaks ties
    #[must_use]
    pub fn history_for(&self, student: StudentId) -> Vec<HistoryRow> {
        let mut rows = self.history.get(&student).cloned().unwrap_or_default();
        rows.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        rows
    }

    /// Replace all of one student's confirmed records with a fresh listing
    pub fn replace_student_entries(&mut self, student: StudentId, entries: Vec<HoldingEntry>) {
        self.entries.retain(|e| e.student_id != student);
        self.entries.extend(entries);
        // Fresh authoritative data supersedes that student's overlay
        self.pending.retain(|p| p.student_id != student);
    }

    /// Insert or replace a confirmed record by backend id
    pub fn upsert_entry(&mut self, entry: HoldingEntry) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.id == entry.id) {
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
    }

    /// Close `quantity` units of a student's active records, oldest first
    ///
    /// A record larger than the remaining amount is split: the active record
    /// keeps the remainder and a closed record is appended for the returned
    /// portion, so closed history stays append-only.
    pub fn close_oldest_first(
        &mut self,
        student: StudentId,
        kind: &KindTag,
        quantity: u32,
        now: DateTime<Utc>,
    ) {
        let mut remaining = quantity;

        let mut indices: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.student_id == student && e.is_active() && &e.kind == kind)
            .map(|(i, _)| i)
            .collect();
        indices.sort_by_key(|&i| self.entries[i].issued_at);

        let mut split_off: Vec<HoldingEntry> = Vec::new();
        for idx in indices {
            if remaining == 0 {
                break;
            }
            let entry = &mut self.entries[idx];
            if entry.quantity <= remaining {
                remaining -= entry.quantity;
                entry.returned_at = Some(now);
            } else {
                entry.quantity -= remaining;
                split_off.push(HoldingEntry {
                    id: format!("{}#returned", entry.id),
                    student_id: entry.student_id,
                    kind: entry.kind.clone(),
                    quantity: remaining,
                    issued_at: entry.issued_at,
                    returned_at: Some(now),
                });
                remaining = 0;
            }
        }
        self.entries.extend(split_off);
    }

    /// The overlay record for an operation id, if still unconfirmed
    #[must_use]
    pub fn pending_op(&self, op_id: Uuid) -> Option<&PendingOp> {
        self.pending.iter().find(|p| p.op_id == op_id)
    }

    /// Remove and return the overlay record for an operation id
    pub fn take_pending_op(&mut self, op_id: Uuid) -> Option<PendingOp> {
        let idx = self.pending.iter().position(|p| p.op_id == op_id)?;
        Some(self.pending.remove(idx))
    }
}
