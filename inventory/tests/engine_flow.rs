//! End-to-end flows through the store runtime: optimistic mutations are
//! confirmed or rolled back by the actions the backend effects feed back.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bursa_runtime::Store;
use bursa_testing::test_clock;
use chrono::Utc;

use bursa_inventory::InventoryEnvironment;
use bursa_inventory::audit::{AuditAction, AuditReducer, AuditState, SnapshotRow};
use bursa_inventory::backend::{
    BackendError, CreateAuditRequest, DeleteAck, InventoryBackend, IssueRequest, ReturnOutcome,
    ReturnRequest, UpsertStockRequest,
};
use bursa_inventory::error::EngineError;
use bursa_inventory::holdings::{HoldingsState, StudentId};
use bursa_inventory::kind::{ItemKind, KindTag};
use bursa_inventory::operations::{HoldingsAction, HoldingsReducer};
use bursa_inventory::stock::{StockAction, StockReducer, StockState};
use bursa_inventory::wire::{WireAudit, WireAuditItem, WireHoldingEntry, WireLogEntry, WireStockRow};

const AUDIT_ID: &str = "7f6b2c1a-0a4f-4e2d-9a6c-3f1d2e4b5a69";
const WAIT: Duration = Duration::from_secs(5);

/// In-memory backend: stock rows by kind code, issuance decrements
/// availability, audits live in a map. `fail_mutations` makes every
/// mutation answer 409.
struct StubBackend {
    stock: Mutex<Vec<(String, i64, i64)>>,
    audits: Mutex<HashMap<String, WireAudit>>,
    fail_mutations: AtomicBool,
    next_id: AtomicU64,
}

impl StubBackend {
    fn new(stock: Vec<(&str, i64, i64)>) -> Arc<Self> {
        Arc::new(Self {
            stock: Mutex::new(
                stock
                    .into_iter()
                    .map(|(code, total, available)| (code.to_owned(), total, available))
                    .collect(),
            ),
            audits: Mutex::new(HashMap::new()),
            fail_mutations: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        })
    }

    fn rejection() -> BackendError {
        BackendError::Status {
            status: 409,
            message: "rejected".into(),
        }
    }

    fn mutations_rejected(&self) -> Result<(), BackendError> {
        if self.fail_mutations.load(Ordering::SeqCst) {
            Err(Self::rejection())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl InventoryBackend for StubBackend {
    async fn fetch_stock(&self) -> Result<Vec<WireStockRow>, BackendError> {
        Ok(self
            .stock
            .lock()
            .unwrap()
            .iter()
            .map(|(code, total, available)| WireStockRow::Canonical {
                id: None,
                kind: code.clone(),
                total: *total,
                available: Some(*available),
                issued: None,
            })
            .collect())
    }

    async fn upsert_stock(&self, req: UpsertStockRequest) -> Result<WireStockRow, BackendError> {
        self.mutations_rejected()?;
        let mut stock = self.stock.lock().unwrap();
        let total = i64::from(req.total);
        let code = req.kind.code().to_owned();
        match stock.iter_mut().find(|(c, _, _)| *c == code) {
            Some(row) => {
                let issued = row.1 - row.2;
                row.1 = total;
                row.2 = (total - issued).max(0);
            }
            None => stock.push((code.clone(), total, total)),
        }
        let row = stock.iter().find(|(c, _, _)| *c == code).unwrap();
        Ok(WireStockRow::Canonical {
            id: None,
            kind: row.0.clone(),
            total: row.1,
            available: Some(row.2),
            issued: None,
        })
    }

    async fn fetch_audits(&self) -> Result<Vec<WireAudit>, BackendError> {
        Ok(self.audits.lock().unwrap().values().cloned().collect())
    }

    async fn fetch_audit(&self, id: &str) -> Result<WireAudit, BackendError> {
        self.audits
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or(BackendError::Status {
                status: 404,
                message: "not found".into(),
            })
    }

    async fn create_audit(&self, req: CreateAuditRequest) -> Result<WireAudit, BackendError> {
        self.mutations_rejected()?;
        let audit = WireAudit {
            id: AUDIT_ID.to_owned(),
            created_at: format!("{}T00:00:00Z", req.date),
            items: req
                .rows
                .iter()
                .map(|row| WireAuditItem::Legacy {
                    name: row.name.clone(),
                    total: i64::from(row.total),
                    issued: Some(i64::from(row.issued)),
                    available: Some(i64::from(row.available)),
                })
                .collect(),
        };
        self.audits
            .lock()
            .unwrap()
            .insert(audit.id.clone(), audit.clone());
        Ok(audit)
    }

    async fn delete_audit(&self, id: &str) -> Result<DeleteAck, BackendError> {
        self.mutations_rejected()?;
        self.audits.lock().unwrap().remove(id);
        Ok(DeleteAck {
            message: "deleted".into(),
        })
    }

    async fn fetch_student_items(
        &self,
        _student: StudentId,
    ) -> Result<Vec<WireHoldingEntry>, BackendError> {
        Ok(vec![])
    }

    async fn fetch_student_logs(
        &self,
        _student: StudentId,
    ) -> Result<Vec<WireLogEntry>, BackendError> {
        Ok(vec![])
    }

    async fn issue(&self, req: IssueRequest) -> Result<WireHoldingEntry, BackendError> {
        self.mutations_rejected()?;
        {
            let mut stock = self.stock.lock().unwrap();
            let row = stock
                .iter_mut()
                .find(|(c, _, _)| *c == req.kind.code())
                .ok_or(BackendError::Status {
                    status: 404,
                    message: "unknown kind".into(),
                })?;
            if row.2 < i64::from(req.quantity) {
                return Err(Self::rejection());
            }
            row.2 -= i64::from(req.quantity);
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(WireHoldingEntry {
            id: format!("srv-{n}"),
            student_id: req.student_id,
            kind: req.kind.code().to_owned(),
            quantity: i64::from(req.quantity),
            issued_at: Utc::now(),
            returned_at: None,
        })
    }

    async fn return_items(&self, req: ReturnRequest) -> Result<ReturnOutcome, BackendError> {
        self.mutations_rejected()?;
        let mut stock = self.stock.lock().unwrap();
        if let Some(row) = stock.iter_mut().find(|(c, _, _)| *c == req.kind.code()) {
            row.2 = (row.2 + i64::from(req.quantity)).min(row.1);
        }
        Ok(ReturnOutcome::Closed)
    }
}

fn env_with(backend: Arc<StubBackend>) -> InventoryEnvironment {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    InventoryEnvironment::new(Arc::new(test_clock()), backend)
}

fn holdings_store(
    backend: Arc<StubBackend>,
) -> Store<HoldingsState, HoldingsAction, InventoryEnvironment, HoldingsReducer> {
    Store::new(HoldingsState::default(), HoldingsReducer, env_with(backend))
}

fn stock_store(
    backend: Arc<StubBackend>,
) -> Store<StockState, StockAction, InventoryEnvironment, StockReducer> {
    Store::new(StockState::default(), StockReducer, env_with(backend))
}

fn audit_store(
    backend: Arc<StubBackend>,
) -> Store<AuditState, AuditAction, InventoryEnvironment, AuditReducer> {
    Store::new(AuditState::default(), AuditReducer, env_with(backend))
}

#[tokio::test]
async fn confirmed_issue_lands_in_the_ledger() {
    let backend = StubBackend::new(vec![("pillow", 10, 10)]);
    let store = holdings_store(backend);

    let result = store
        .send_and_wait_for(
            HoldingsAction::Issue {
                student: StudentId::new(1),
                kind: KindTag::Known(ItemKind::Pillow),
                quantity: 2,
            },
            |a| {
                matches!(
                    a,
                    HoldingsAction::IssueConfirmed { .. } | HoldingsAction::OperationFailed { .. }
                )
            },
            WAIT,
        )
        .await
        .unwrap();
    assert!(matches!(result, HoldingsAction::IssueConfirmed { .. }));
    store.send(result).await.unwrap();

    store
        .state(|s| {
            assert!(s.pending.is_empty());
            assert_eq!(s.entries.len(), 1);
            assert_eq!(
                s.held_quantity(StudentId::new(1), &KindTag::Known(ItemKind::Pillow)),
                2
            );
            assert!(s.last_error.is_none());
        })
        .await;
}

#[tokio::test]
async fn rejected_issue_rolls_the_overlay_back() {
    let backend = StubBackend::new(vec![("pillow", 10, 10)]);
    backend.fail_mutations.store(true, Ordering::SeqCst);
    let store = holdings_store(backend);

    let result = store
        .send_and_wait_for(
            HoldingsAction::Issue {
                student: StudentId::new(1),
                kind: KindTag::Known(ItemKind::Pillow),
                quantity: 2,
            },
            |a| matches!(a, HoldingsAction::OperationFailed { .. }),
            WAIT,
        )
        .await
        .unwrap();
    store.send(result).await.unwrap();

    store
        .state(|s| {
            assert!(s.pending.is_empty());
            assert!(s.entries.is_empty());
            assert_eq!(
                s.held_quantity(StudentId::new(1), &KindTag::Known(ItemKind::Pillow)),
                0
            );
            assert!(matches!(
                s.last_error,
                Some(EngineError::Remote {
                    status: Some(409),
                    ..
                })
            ));
        })
        .await;
}

#[tokio::test]
async fn issuance_moves_availability_but_never_totals() {
    let backend = StubBackend::new(vec![("pillow", 10, 10), ("blanket", 5, 5)]);
    let stock = stock_store(backend.clone());
    let holdings = holdings_store(backend);

    let loaded = stock
        .send_and_wait_for(
            StockAction::Refresh,
            |a| matches!(a, StockAction::Loaded(_) | StockAction::LoadFailed(_)),
            WAIT,
        )
        .await
        .unwrap();
    stock.send(loaded).await.unwrap();
    let before = stock.state(StockState::sums).await;
    assert_eq!(before.total, 15);
    assert_eq!(before.available, 15);

    let confirmed = holdings
        .send_and_wait_for(
            HoldingsAction::Issue {
                student: StudentId::new(1),
                kind: KindTag::Known(ItemKind::Pillow),
                quantity: 3,
            },
            |a| matches!(a, HoldingsAction::IssueConfirmed { .. }),
            WAIT,
        )
        .await
        .unwrap();
    holdings.send(confirmed).await.unwrap();

    let reloaded = stock
        .send_and_wait_for(
            StockAction::Refresh,
            |a| matches!(a, StockAction::Loaded(_)),
            WAIT,
        )
        .await
        .unwrap();
    stock.send(reloaded).await.unwrap();

    let after = stock.state(StockState::sums).await;
    assert_eq!(after.total, 15, "issuance must never change totals");
    assert_eq!(after.available, 12);
    assert_eq!(after.issued, 3);
}

#[tokio::test]
async fn return_closes_what_issue_opened() {
    let backend = StubBackend::new(vec![("sheet", 4, 4)]);
    let store = holdings_store(backend);

    let confirmed = store
        .send_and_wait_for(
            HoldingsAction::Issue {
                student: StudentId::new(9),
                kind: KindTag::Known(ItemKind::Sheet),
                quantity: 2,
            },
            |a| matches!(a, HoldingsAction::IssueConfirmed { .. }),
            WAIT,
        )
        .await
        .unwrap();
    store.send(confirmed).await.unwrap();

    let returned = store
        .send_and_wait_for(
            HoldingsAction::Return {
                student: StudentId::new(9),
                kind: KindTag::Known(ItemKind::Sheet),
                quantity: 2,
            },
            |a| matches!(a, HoldingsAction::ReturnConfirmed { .. }),
            WAIT,
        )
        .await
        .unwrap();
    store.send(returned).await.unwrap();

    store
        .state(|s| {
            assert_eq!(
                s.held_quantity(StudentId::new(9), &KindTag::Known(ItemKind::Sheet)),
                0
            );
            assert!(s.current_holdings(StudentId::new(9)).is_empty());
            // The record survives, closed
            assert_eq!(s.entries.len(), 1);
            assert!(!s.entries[0].is_active());
        })
        .await;
}

#[tokio::test]
async fn audit_create_then_delete_runs_the_cache_lifecycle() {
    let backend = StubBackend::new(vec![]);
    let store = audit_store(backend);

    let rows = vec![SnapshotRow {
        name: "Ковдра".into(),
        issued: 3,
        available: 7,
        total: 10,
    }];
    let created = store
        .send_and_wait_for(
            AuditAction::CreateSnapshot {
                date: chrono::NaiveDate::from_ymd_opt(2025, 3, 2).unwrap(),
                rows,
            },
            |a| matches!(a, AuditAction::CreateConfirmed(_) | AuditAction::AuditFailed(_)),
            WAIT,
        )
        .await
        .unwrap();
    assert!(matches!(created, AuditAction::CreateConfirmed(_)));
    store.send(created).await.unwrap();

    store
        .state(|s| {
            assert_eq!(s.last_created.as_deref(), Some(AUDIT_ID));
            assert!(s.list_stale);
            let snap = s.snapshot(AUDIT_ID).unwrap();
            assert_eq!(snap.sum_total, 10);
            assert_eq!(snap.sum_issued + snap.sum_available, snap.sum_total);
        })
        .await;

    let deleted = store
        .send_and_wait_for(
            AuditAction::DeleteSnapshot(AUDIT_ID.to_owned()),
            |a| matches!(a, AuditAction::DeleteConfirmed { .. }),
            WAIT,
        )
        .await
        .unwrap();
    store.send(deleted).await.unwrap();

    store
        .state(|s| {
            assert!(s.snapshot(AUDIT_ID).is_none());
            assert!(s.last_created.is_none());
        })
        .await;
}

#[tokio::test]
async fn store_shuts_down_cleanly_after_work() {
    let backend = StubBackend::new(vec![("pillow", 10, 10)]);
    let store = holdings_store(backend);

    let mut handle = store
        .send(HoldingsAction::Issue {
            student: StudentId::new(1),
            kind: KindTag::Known(ItemKind::Pillow),
            quantity: 1,
        })
        .await
        .unwrap();
    handle.wait().await;

    store.shutdown(WAIT).await.unwrap();
    assert!(store.send(HoldingsAction::LoadItems(StudentId::new(1))).await.is_err());
}
