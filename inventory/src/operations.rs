//! Issue and return operations over the student holdings ledger.
//!
//! Every mutation follows the same shape: validate locally, apply an
//! optimistic overlay delta tagged with a fresh operation id, fire the
//! backend round-trip as an effect, and reconcile on the confirmation or
//! failure that comes back. A failure removes exactly the failed
//! operation's delta; confirmations and failures whose operation id is no
//! longer pending are stale and are discarded.

use bursa_core::environment::Clock;
use bursa_core::{Effect, Reducer, SmallVec, smallvec};
use uuid::Uuid;

use crate::InventoryEnvironment;
use crate::backend::{IssueRequest, ReturnOutcome, ReturnRequest};
use crate::error::EngineError;
use crate::holdings::{HistoryRow, HoldingEntry, HoldingsState, PendingOp, StudentId};
use crate::kind::KindTag;

/// Inputs to the holdings reducer
#[derive(Clone, Debug)]
pub enum HoldingsAction {
    /// Load a student's issuance records from the backend
    LoadItems(StudentId),
    /// A student's issuance records arrived
    ItemsLoaded {
        /// The student whose records these are
        student: StudentId,
        /// Fresh authoritative records
        entries: Vec<HoldingEntry>,
    },
    /// Load a student's activity timeline from the backend
    LoadLogs(StudentId),
    /// A student's timeline arrived
    LogsLoaded {
        /// The student whose timeline this is
        student: StudentId,
        /// Timeline rows as the backend sent them
        rows: Vec<HistoryRow>,
    },
    /// A read round-trip failed
    LoadFailed(EngineError),
    /// Issue items to a student
    Issue {
        /// Receiving student
        student: StudentId,
        /// Kind to issue
        kind: KindTag,
        /// Units to issue
        quantity: u32,
    },
    /// Backend confirmed an issue with the created record
    IssueConfirmed {
        /// The operation being confirmed
        op_id: Uuid,
        /// The authoritative issuance record
        entry: HoldingEntry,
    },
    /// Return items from a student
    Return {
        /// Returning student
        student: StudentId,
        /// Kind to return
        kind: KindTag,
        /// Units to return
        quantity: u32,
    },
    /// Backend confirmed a return
    ReturnConfirmed {
        /// The operation being confirmed
        op_id: Uuid,
        /// Whether the return closed everything or left a partial record
        outcome: ReturnOutcome,
    },
    /// Backend rejected an issue or return
    OperationFailed {
        /// The operation that failed
        op_id: Uuid,
        /// What went wrong
        error: EngineError,
    },
}

/// Reducer for the student holdings ledger
#[derive(Clone, Copy, Debug, Default)]
pub struct HoldingsReducer;

impl Reducer for HoldingsReducer {
    type State = HoldingsState;
    type Action = HoldingsAction;
    type Environment = InventoryEnvironment;

    #[allow(clippy::too_many_lines)]
    fn reduce(
        &self,
        state: &mut HoldingsState,
        action: HoldingsAction,
        env: &InventoryEnvironment,
    ) -> SmallVec<[Effect<HoldingsAction>; 4]> {
        match action {
            HoldingsAction::LoadItems(student) => {
                let backend = env.backend.clone();
                smallvec![Effect::future(async move {
                    Some(match backend.fetch_student_items(student).await {
                        Ok(entries) => HoldingsAction::ItemsLoaded {
                            student,
                            entries: entries.iter().map(|e| e.normalize()).collect(),
                        },
                        Err(e) => HoldingsAction::LoadFailed(e.into()),
                    })
                })]
            }

            HoldingsAction::ItemsLoaded { student, entries } => {
                state.last_error = None;
                state.replace_student_entries(student, entries);
                smallvec![Effect::None]
            }

            HoldingsAction::LoadLogs(student) => {
                let backend = env.backend.clone();
                smallvec![Effect::future(async move {
                    Some(match backend.fetch_student_logs(student).await {
                        Ok(rows) => HoldingsAction::LogsLoaded {
                            student,
                            rows: rows.iter().map(|r| r.normalize()).collect(),
                        },
                        Err(e) => HoldingsAction::LoadFailed(e.into()),
                    })
                })]
            }

            HoldingsAction::LogsLoaded { student, rows } => {
                state.last_error = None;
                state.history.insert(student, rows);
                smallvec![Effect::None]
            }

            HoldingsAction::LoadFailed(error) => {
                tracing::warn!(%error, "holdings load failed");
                state.last_error = Some(error);
                smallvec![Effect::None]
            }

            HoldingsAction::Issue {
                student,
                kind,
                quantity,
            } => {
                if let Err(error) = validate_issue(&kind, quantity) {
                    state.last_error = Some(error);
                    return smallvec![Effect::None];
                }

                let op_id = Uuid::new_v4();
                state.pending.push(PendingOp {
                    op_id,
                    student_id: student,
                    kind: kind.clone(),
                    delta: i64::from(quantity),
                });

                let backend = env.backend.clone();
                smallvec![Effect::future(async move {
                    let req = IssueRequest {
                        student_id: student.value(),
                        kind,
                        quantity,
                    };
                    Some(match backend.issue(req).await {
                        Ok(entry) => HoldingsAction::IssueConfirmed {
                            op_id,
                            entry: entry.normalize(),
                        },
                        Err(e) => HoldingsAction::OperationFailed {
                            op_id,
                            error: e.into(),
                        },
                    })
                })]
            }

            HoldingsAction::IssueConfirmed { op_id, entry } => {
                if state.take_pending_op(op_id).is_some() {
                    state.last_error = None;
                    state.upsert_entry(entry);
                } else {
                    tracing::debug!(%op_id, "stale issue confirmation ignored");
                }
                smallvec![Effect::None]
            }

            HoldingsAction::Return {
                student,
                kind,
                quantity,
            } => {
                if let Err(error) = validate_return(state, student, &kind, quantity) {
                    state.last_error = Some(error);
                    return smallvec![Effect::None];
                }

                let op_id = Uuid::new_v4();
                state.pending.push(PendingOp {
                    op_id,
                    student_id: student,
                    kind: kind.clone(),
                    delta: -i64::from(quantity),
                });

                let backend = env.backend.clone();
                smallvec![Effect::future(async move {
                    let req = ReturnRequest {
                        student_id: student.value(),
                        kind,
                        quantity,
                    };
                    Some(match backend.return_items(req).await {
                        Ok(outcome) => HoldingsAction::ReturnConfirmed { op_id, outcome },
                        Err(e) => HoldingsAction::OperationFailed {
                            op_id,
                            error: e.into(),
                        },
                    })
                })]
            }

            HoldingsAction::ReturnConfirmed { op_id, outcome } => {
                let Some(op) = state.take_pending_op(op_id) else {
                    tracing::debug!(%op_id, "stale return confirmation ignored");
                    return smallvec![Effect::None];
                };
                state.last_error = None;

                let quantity = u32::try_from(op.delta.unsigned_abs()).unwrap_or(u32::MAX);
                let now = env.clock.now();
                state.close_oldest_first(op.student_id, &op.kind, quantity, now);
                if let ReturnOutcome::Updated(entry) = outcome {
                    // The partially-returned record is authoritative
                    state.upsert_entry(entry.normalize());
                }
                smallvec![Effect::None]
            }

            HoldingsAction::OperationFailed { op_id, error } => {
                if let Some(op) = state.take_pending_op(op_id) {
                    tracing::warn!(
                        %op_id,
                        student = %op.student_id,
                        kind = %op.kind,
                        delta = op.delta,
                        %error,
                        "operation rolled back"
                    );
                    state.last_error = Some(error);
                } else {
                    tracing::debug!(%op_id, "stale operation failure ignored");
                }
                smallvec![Effect::None]
            }
        }
    }
}

fn validate_issue(kind: &KindTag, quantity: u32) -> Result<(), EngineError> {
    let mut fields = crate::error::FieldErrors::new();
    if !kind.is_known() {
        fields.insert("kind".into(), format!("unknown kind: {kind}"));
    }
    if quantity == 0 {
        fields.insert("quantity".into(), "must be at least 1".into());
    }
    if fields.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Validation { fields })
    }
}

fn validate_return(
    state: &HoldingsState,
    student: StudentId,
    kind: &KindTag,
    quantity: u32,
) -> Result<(), EngineError> {
    if quantity == 0 {
        return Err(EngineError::field("quantity", "must be at least 1"));
    }
    let held = state.held_quantity(student, kind);
    if quantity > held {
        return Err(EngineError::field(
            "quantity",
            format!("cannot return {quantity}, student holds {held}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::panic)]

    use bursa_testing::{ReducerTest, assertions, test_clock};
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::kind::ItemKind;
    use crate::test_support::test_env as env;
    use crate::wire::WireHoldingEntry;
    use bursa_core::environment::Clock;

    fn entry(id: &str, student: i64, kind: ItemKind, qty: u32, day: u32) -> HoldingEntry {
        HoldingEntry {
            id: id.to_owned(),
            student_id: StudentId::new(student),
            kind: KindTag::Known(kind),
            quantity: qty,
            issued_at: Utc.with_ymd_and_hms(2025, 2, day, 12, 0, 0).unwrap(),
            returned_at: None,
        }
    }

    fn state_with(entries: Vec<HoldingEntry>) -> HoldingsState {
        HoldingsState {
            entries,
            ..HoldingsState::default()
        }
    }

    #[test]
    fn zero_quantity_issue_is_rejected_locally() {
        ReducerTest::new(HoldingsReducer)
            .with_env(env())
            .given_state(HoldingsState::default())
            .when_action(HoldingsAction::Issue {
                student: StudentId::new(1),
                kind: KindTag::Known(ItemKind::Pillow),
                quantity: 0,
            })
            .then_state(|state| {
                assert!(state.pending.is_empty());
                assert!(matches!(
                    state.last_error,
                    Some(EngineError::Validation { .. })
                ));
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn unknown_kind_issue_is_rejected_locally() {
        ReducerTest::new(HoldingsReducer)
            .with_env(env())
            .given_state(HoldingsState::default())
            .when_action(HoldingsAction::Issue {
                student: StudentId::new(1),
                kind: KindTag::Other("hammock".into()),
                quantity: 1,
            })
            .then_state(|state| {
                let Some(EngineError::Validation { fields }) = &state.last_error else {
                    panic!("expected validation error");
                };
                assert!(fields.contains_key("kind"));
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn issue_applies_an_optimistic_overlay() {
        ReducerTest::new(HoldingsReducer)
            .with_env(env())
            .given_state(HoldingsState::default())
            .when_action(HoldingsAction::Issue {
                student: StudentId::new(1),
                kind: KindTag::Known(ItemKind::Pillow),
                quantity: 2,
            })
            .then_state(|state| {
                assert_eq!(state.pending.len(), 1);
                assert_eq!(state.pending[0].delta, 2);
                assert_eq!(
                    state.held_quantity(StudentId::new(1), &KindTag::Known(ItemKind::Pillow)),
                    2
                );
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_future_effect(effects);
            })
            .run();
    }

    #[test]
    fn confirmation_swaps_the_overlay_for_the_record() {
        let mut state = HoldingsState::default();
        HoldingsReducer.reduce(
            &mut state,
            HoldingsAction::Issue {
                student: StudentId::new(1),
                kind: KindTag::Known(ItemKind::Pillow),
                quantity: 2,
            },
            &env(),
        );
        let op_id = state.pending[0].op_id;

        HoldingsReducer.reduce(
            &mut state,
            HoldingsAction::IssueConfirmed {
                op_id,
                entry: entry("srv-1", 1, ItemKind::Pillow, 2, 3),
            },
            &env(),
        );

        assert!(state.pending.is_empty());
        assert_eq!(state.entries.len(), 1);
        assert_eq!(
            state.held_quantity(StudentId::new(1), &KindTag::Known(ItemKind::Pillow)),
            2
        );
    }

    #[test]
    fn failure_rolls_back_only_its_own_delta() {
        let mut state = HoldingsState::default();
        HoldingsReducer.reduce(
            &mut state,
            HoldingsAction::Issue {
                student: StudentId::new(1),
                kind: KindTag::Known(ItemKind::Pillow),
                quantity: 2,
            },
            &env(),
        );
        HoldingsReducer.reduce(
            &mut state,
            HoldingsAction::Issue {
                student: StudentId::new(1),
                kind: KindTag::Known(ItemKind::Pillow),
                quantity: 5,
            },
            &env(),
        );
        let first_op = state.pending[0].op_id;
        assert_eq!(
            state.held_quantity(StudentId::new(1), &KindTag::Known(ItemKind::Pillow)),
            7
        );

        HoldingsReducer.reduce(
            &mut state,
            HoldingsAction::OperationFailed {
                op_id: first_op,
                error: EngineError::Remote {
                    status: Some(409),
                    message: "not enough stock".into(),
                },
            },
            &env(),
        );

        // The second operation's optimistic view is untouched
        assert_eq!(state.pending.len(), 1);
        assert_eq!(state.pending[0].delta, 5);
        assert_eq!(
            state.held_quantity(StudentId::new(1), &KindTag::Known(ItemKind::Pillow)),
            5
        );
        assert!(state.last_error.is_some());
    }

    #[test]
    fn return_exceeding_holdings_is_rejected_locally() {
        ReducerTest::new(HoldingsReducer)
            .with_env(env())
            .given_state(state_with(vec![entry("a", 1, ItemKind::Pillow, 2, 1)]))
            .when_action(HoldingsAction::Return {
                student: StudentId::new(1),
                kind: KindTag::Known(ItemKind::Pillow),
                quantity: 3,
            })
            .then_state(|state| {
                assert!(state.pending.is_empty());
                let Some(EngineError::Validation { fields }) = &state.last_error else {
                    panic!("expected validation error");
                };
                assert!(fields.contains_key("quantity"));
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn return_counts_pending_deltas_when_validating() {
        // One unit held, but a pending return already spoken for it
        let mut state = state_with(vec![entry("a", 1, ItemKind::Pillow, 1, 1)]);
        HoldingsReducer.reduce(
            &mut state,
            HoldingsAction::Return {
                student: StudentId::new(1),
                kind: KindTag::Known(ItemKind::Pillow),
                quantity: 1,
            },
            &env(),
        );
        assert_eq!(state.pending.len(), 1);

        let effects = HoldingsReducer.reduce(
            &mut state,
            HoldingsAction::Return {
                student: StudentId::new(1),
                kind: KindTag::Known(ItemKind::Pillow),
                quantity: 1,
            },
            &env(),
        );

        assertions::assert_no_effects(&effects);
        assert_eq!(state.pending.len(), 1);
        assert!(state.last_error.is_some());
    }

    #[test]
    fn closed_return_closes_entries_at_the_clock_time() {
        let mut state = state_with(vec![entry("a", 1, ItemKind::Pillow, 2, 1)]);
        HoldingsReducer.reduce(
            &mut state,
            HoldingsAction::Return {
                student: StudentId::new(1),
                kind: KindTag::Known(ItemKind::Pillow),
                quantity: 2,
            },
            &env(),
        );
        let op_id = state.pending[0].op_id;

        HoldingsReducer.reduce(
            &mut state,
            HoldingsAction::ReturnConfirmed {
                op_id,
                outcome: ReturnOutcome::Closed,
            },
            &env(),
        );

        assert!(state.pending.is_empty());
        let closed = &state.entries[0];
        assert_eq!(closed.returned_at, Some(test_clock().now()));
        assert_eq!(
            state.held_quantity(StudentId::new(1), &KindTag::Known(ItemKind::Pillow)),
            0
        );
    }

    #[test]
    fn partial_return_applies_the_authoritative_record() {
        let mut state = state_with(vec![entry("a", 1, ItemKind::Pillow, 5, 1)]);
        HoldingsReducer.reduce(
            &mut state,
            HoldingsAction::Return {
                student: StudentId::new(1),
                kind: KindTag::Known(ItemKind::Pillow),
                quantity: 2,
            },
            &env(),
        );
        let op_id = state.pending[0].op_id;

        let updated: WireHoldingEntry = serde_json::from_str(
            r#"{
                "id": "a",
                "studentId": 1,
                "kind": "pillow",
                "quantity": 3,
                "issuedAt": "2025-02-01T12:00:00Z",
                "returnedAt": null
            }"#,
        )
        .unwrap();

        HoldingsReducer.reduce(
            &mut state,
            HoldingsAction::ReturnConfirmed {
                op_id,
                outcome: ReturnOutcome::Updated(updated),
            },
            &env(),
        );

        let active = state.entries.iter().find(|e| e.id == "a").unwrap();
        assert_eq!(active.quantity, 3);
        assert!(active.is_active());
        let closed = state.entries.iter().find(|e| e.id == "a#returned").unwrap();
        assert_eq!(closed.quantity, 2);
        assert_eq!(
            state.held_quantity(StudentId::new(1), &KindTag::Known(ItemKind::Pillow)),
            3
        );
    }

    #[test]
    fn stale_responses_are_discarded() {
        let initial = state_with(vec![entry("a", 1, ItemKind::Pillow, 2, 1)]);
        let mut state = initial.clone();

        HoldingsReducer.reduce(
            &mut state,
            HoldingsAction::IssueConfirmed {
                op_id: Uuid::new_v4(),
                entry: entry("ghost", 1, ItemKind::Pillow, 9, 2),
            },
            &env(),
        );
        HoldingsReducer.reduce(
            &mut state,
            HoldingsAction::ReturnConfirmed {
                op_id: Uuid::new_v4(),
                outcome: ReturnOutcome::Closed,
            },
            &env(),
        );
        HoldingsReducer.reduce(
            &mut state,
            HoldingsAction::OperationFailed {
                op_id: Uuid::new_v4(),
                error: EngineError::Remote {
                    status: Some(500),
                    message: "boom".into(),
                },
            },
            &env(),
        );

        assert_eq!(state.entries, initial.entries);
        assert!(state.last_error.is_none());
    }

    #[test]
    fn loaded_items_replace_the_students_view() {
        let mut state = state_with(vec![
            entry("old", 1, ItemKind::Pillow, 2, 1),
            entry("other", 2, ItemKind::Sheet, 1, 1),
        ]);

        HoldingsReducer.reduce(
            &mut state,
            HoldingsAction::ItemsLoaded {
                student: StudentId::new(1),
                entries: vec![entry("new", 1, ItemKind::Blanket, 4, 2)],
            },
            &env(),
        );

        assert_eq!(state.entries.len(), 2);
        assert!(state.entries.iter().any(|e| e.id == "new"));
        assert!(state.entries.iter().any(|e| e.id == "other"));
        assert!(!state.entries.iter().any(|e| e.id == "old"));
    }

    #[test]
    fn load_actions_emit_fetch_effects() {
        ReducerTest::new(HoldingsReducer)
            .with_env(env())
            .given_state(HoldingsState::default())
            .when_action(HoldingsAction::LoadItems(StudentId::new(7)))
            .then_effects(assertions::assert_has_future_effect)
            .run();

        ReducerTest::new(HoldingsReducer)
            .with_env(env())
            .given_state(HoldingsState::default())
            .when_action(HoldingsAction::LoadLogs(StudentId::new(7)))
            .then_effects(assertions::assert_has_future_effect)
            .run();
    }
}
