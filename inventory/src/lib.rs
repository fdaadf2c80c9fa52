//! # Bursa Inventory
//!
//! The dormitory stock ledger and audit snapshot engine.
//!
//! This crate owns the quantity bookkeeping for a fixed catalog of linen and
//! bedding kinds:
//!
//! - **Kind catalog** ([`kind`]): the closed set of item kinds with their wire
//!   codes and display labels, plus a passthrough for kinds the backend sends
//!   that we do not recognize.
//! - **Stock aggregate** ([`stock`]): per-kind `total`/`available` counts with
//!   optimistic upserts and exact rollback on backend failure.
//! - **Student holdings ledger** ([`holdings`], [`operations`]): per-student
//!   issuance records, aggregation into current holdings, history timelines,
//!   and the issue/return operation handler with per-operation delta tracking.
//! - **Audit snapshots** ([`audit`]): immutable point-in-time captures of the
//!   stock aggregate with computed sums, cached by server-assigned id.
//! - **Reconciliation** ([`wire`]): normalization of the backend's canonical
//!   and legacy payload shapes into the internal records.
//!
//! The engine is built as pure reducers over explicit state; all backend
//! round-trips are [`bursa_core::Effect`]s executed by the store runtime and
//! fed back as confirmation/failure actions. The external backend is the
//! system of record; this engine only keeps a session-local, optimistically
//! updated view of it.

pub mod audit;
pub mod backend;
pub mod error;
pub mod holdings;
pub mod kind;
pub mod operations;
pub mod stock;
pub mod wire;

pub use environment::InventoryEnvironment;
pub use error::EngineError;
pub use kind::{ItemKind, KindTag};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use async_trait::async_trait;
    use bursa_testing::test_clock;

    use crate::InventoryEnvironment;
    use crate::backend::{
        BackendError, CreateAuditRequest, DeleteAck, InventoryBackend, IssueRequest,
        ReturnOutcome, ReturnRequest, UpsertStockRequest,
    };
    use crate::holdings::StudentId;
    use crate::wire::{WireAudit, WireHoldingEntry, WireLogEntry, WireStockRow};

    /// Backend stub that fails every call. Reducer tests only inspect the
    /// state transition and the shape of the returned effects, so the stub
    /// never has to answer.
    pub struct UnreachableBackend;

    fn unreachable_err() -> BackendError {
        BackendError::Network("unreachable".into())
    }

    #[async_trait]
    impl InventoryBackend for UnreachableBackend {
        async fn fetch_stock(&self) -> Result<Vec<WireStockRow>, BackendError> {
            Err(unreachable_err())
        }
        async fn upsert_stock(
            &self,
            _req: UpsertStockRequest,
        ) -> Result<WireStockRow, BackendError> {
            Err(unreachable_err())
        }
        async fn fetch_audits(&self) -> Result<Vec<WireAudit>, BackendError> {
            Err(unreachable_err())
        }
        async fn fetch_audit(&self, _id: &str) -> Result<WireAudit, BackendError> {
            Err(unreachable_err())
        }
        async fn create_audit(&self, _req: CreateAuditRequest) -> Result<WireAudit, BackendError> {
            Err(unreachable_err())
        }
        async fn delete_audit(&self, _id: &str) -> Result<DeleteAck, BackendError> {
            Err(unreachable_err())
        }
        async fn fetch_student_items(
            &self,
            _student: StudentId,
        ) -> Result<Vec<WireHoldingEntry>, BackendError> {
            Err(unreachable_err())
        }
        async fn fetch_student_logs(
            &self,
            _student: StudentId,
        ) -> Result<Vec<WireLogEntry>, BackendError> {
            Err(unreachable_err())
        }
        async fn issue(&self, _req: IssueRequest) -> Result<WireHoldingEntry, BackendError> {
            Err(unreachable_err())
        }
        async fn return_items(&self, _req: ReturnRequest) -> Result<ReturnOutcome, BackendError> {
            Err(unreachable_err())
        }
    }

    /// Environment with a fixed clock and the unreachable backend
    pub fn test_env() -> InventoryEnvironment {
        InventoryEnvironment::new(Arc::new(test_clock()), Arc::new(UnreachableBackend))
    }
}

/// Shared environment for the inventory reducers
///
/// All three reducers (stock, holdings, audit) draw their dependencies from
/// the same environment: a clock and the external backend behind a trait.
pub mod environment {
    use std::sync::Arc;

    use bursa_core::environment::Clock;

    use crate::backend::InventoryBackend;

    /// Injected dependencies for the inventory reducers
    #[derive(Clone)]
    pub struct InventoryEnvironment {
        /// Clock for timestamps (return closures, history rows)
        pub clock: Arc<dyn Clock>,
        /// The external backend owning persistence
        pub backend: Arc<dyn InventoryBackend>,
    }

    impl InventoryEnvironment {
        /// Creates a new `InventoryEnvironment`
        #[must_use]
        pub fn new(clock: Arc<dyn Clock>, backend: Arc<dyn InventoryBackend>) -> Self {
            Self { clock, backend }
        }
    }
}
