//! Backend port and its HTTP implementation.
//!
//! The engine never talks to the network directly: every round-trip goes
//! through the [`InventoryBackend`] trait, which the reducers hold as a
//! `dyn` object inside their environment. Production uses [`HttpBackend`];
//! tests substitute an in-memory stub.
//!
//! Responses are decoded into the wire types from [`crate::wire`], leaving
//! normalization to the caller. A 2xx response with an undecodable body is a
//! [`BackendError::Shape`], which is a contract violation rather than a
//! transport failure.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::SnapshotRow;
use crate::holdings::StudentId;
use crate::kind::KindTag;
use crate::wire::{WireAudit, WireHoldingEntry, WireLogEntry, WireStockRow};

/// Failure of a backend round-trip
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend answered with a non-2xx status
    #[error("backend returned {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, if readable
        message: String,
    },

    /// The request never completed (DNS, connect, timeout, body read)
    #[error("network error: {0}")]
    Network(String),

    /// The backend answered 2xx with a body that failed to decode
    #[error("malformed response body: {0}")]
    Shape(String),
}

/// Payload for a stock catalog upsert
#[derive(Clone, Debug, Serialize)]
pub struct UpsertStockRequest {
    /// Kind wire code
    pub kind: KindTag,
    /// New catalog total for the kind
    pub total: u32,
}

/// Payload for creating an audit snapshot
#[derive(Clone, Debug, Serialize)]
pub struct CreateAuditRequest {
    /// Capture date, `YYYY-MM-DD`
    pub date: NaiveDate,
    /// Per-kind rows captured from the stock aggregate
    pub rows: Vec<SnapshotRow>,
}

/// Payload for issuing items to a student
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueRequest {
    /// Receiving student
    pub student_id: i64,
    /// Kind wire code
    pub kind: KindTag,
    /// Units to issue, strictly positive
    pub quantity: u32,
}

/// Payload for returning items from a student
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnRequest {
    /// Returning student
    pub student_id: i64,
    /// Kind wire code
    pub kind: KindTag,
    /// Units to return, strictly positive
    pub quantity: u32,
}

/// Result of a return operation
///
/// The backend answers with the updated issuance record when the return was
/// partial, and with an empty body when it fully closed the student's
/// holdings of that kind.
#[derive(Clone, Debug)]
pub enum ReturnOutcome {
    /// All affected records were closed; nothing remains to report
    Closed,
    /// A record was partially returned and remains active
    Updated(WireHoldingEntry),
}

/// Acknowledgement body for deletions
#[derive(Clone, Debug, Deserialize)]
pub struct DeleteAck {
    /// Server-provided confirmation text
    pub message: String,
}

/// Port to the external inventory backend
///
/// The backend is the system of record; every mutation here is authoritative
/// and every read returns the backend's current truth. Implementations must
/// be cheap to clone behind an `Arc` and safe to call concurrently.
#[async_trait]
pub trait InventoryBackend: Send + Sync {
    /// Full stock listing
    async fn fetch_stock(&self) -> Result<Vec<WireStockRow>, BackendError>;

    /// Create or replace the catalog row for a kind
    async fn upsert_stock(&self, req: UpsertStockRequest) -> Result<WireStockRow, BackendError>;

    /// All audit snapshots, newest first as the backend orders them
    async fn fetch_audits(&self) -> Result<Vec<WireAudit>, BackendError>;

    /// One audit snapshot by server-assigned id
    async fn fetch_audit(&self, id: &str) -> Result<WireAudit, BackendError>;

    /// Capture a new audit snapshot
    async fn create_audit(&self, req: CreateAuditRequest) -> Result<WireAudit, BackendError>;

    /// Delete an audit snapshot by id
    async fn delete_audit(&self, id: &str) -> Result<DeleteAck, BackendError>;

    /// Issuance records for one student (active and returned)
    async fn fetch_student_items(
        &self,
        student: StudentId,
    ) -> Result<Vec<WireHoldingEntry>, BackendError>;

    /// Activity log for one student
    async fn fetch_student_logs(
        &self,
        student: StudentId,
    ) -> Result<Vec<WireLogEntry>, BackendError>;

    /// Issue items to a student; returns the created issuance record
    async fn issue(&self, req: IssueRequest) -> Result<WireHoldingEntry, BackendError>;

    /// Return items from a student
    async fn return_items(&self, req: ReturnRequest) -> Result<ReturnOutcome, BackendError>;
}

/// HTTP implementation of [`InventoryBackend`]
#[derive(Clone, Debug)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Creates a backend client against `base_url` (no trailing slash)
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Creates a backend client with a preconfigured `reqwest` client
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Reads the response body, mapping non-2xx statuses to [`BackendError::Status`]
    async fn read_body(response: reqwest::Response) -> Result<String, BackendError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;
        if status.is_success() {
            Ok(body)
        } else {
            tracing::warn!(status = status.as_u16(), "backend request failed");
            Err(BackendError::Status {
                status: status.as_u16(),
                message: body,
            })
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, BackendError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;
        let body = Self::read_body(response).await?;
        serde_json::from_str(&body).map_err(|e| BackendError::Shape(e.to_string()))
    }

    async fn send_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
    ) -> Result<T, BackendError> {
        let response = self
            .client
            .request(method, self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;
        let text = Self::read_body(response).await?;
        serde_json::from_str(&text).map_err(|e| BackendError::Shape(e.to_string()))
    }
}

#[async_trait]
impl InventoryBackend for HttpBackend {
    #[tracing::instrument(skip(self))]
    async fn fetch_stock(&self) -> Result<Vec<WireStockRow>, BackendError> {
        self.get_json("/inventory/stock").await
    }

    #[tracing::instrument(skip(self, req), fields(kind = %req.kind))]
    async fn upsert_stock(&self, req: UpsertStockRequest) -> Result<WireStockRow, BackendError> {
        self.send_json(reqwest::Method::POST, "/inventory/stock", &req)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_audits(&self) -> Result<Vec<WireAudit>, BackendError> {
        self.get_json("/inventories/audits").await
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_audit(&self, id: &str) -> Result<WireAudit, BackendError> {
        self.get_json(&format!("/inventories/audits/{id}")).await
    }

    #[tracing::instrument(skip(self, req), fields(date = %req.date, rows = req.rows.len()))]
    async fn create_audit(&self, req: CreateAuditRequest) -> Result<WireAudit, BackendError> {
        self.send_json(reqwest::Method::POST, "/inventories/audits", &req)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn delete_audit(&self, id: &str) -> Result<DeleteAck, BackendError> {
        let response = self
            .client
            .delete(self.url(&format!("/inventories/audits/{id}")))
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;
        let body = Self::read_body(response).await?;
        serde_json::from_str(&body).map_err(|e| BackendError::Shape(e.to_string()))
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_student_items(
        &self,
        student: StudentId,
    ) -> Result<Vec<WireHoldingEntry>, BackendError> {
        self.get_json(&format!("/inventory/students/{}/items", student.value()))
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_student_logs(
        &self,
        student: StudentId,
    ) -> Result<Vec<WireLogEntry>, BackendError> {
        self.get_json(&format!("/inventory/students/{}/logs", student.value()))
            .await
    }

    #[tracing::instrument(skip(self, req), fields(student = req.student_id, kind = %req.kind, quantity = req.quantity))]
    async fn issue(&self, req: IssueRequest) -> Result<WireHoldingEntry, BackendError> {
        self.send_json(reqwest::Method::POST, "/inventory/issue", &req)
            .await
    }

    #[tracing::instrument(skip(self, req), fields(student = req.student_id, kind = %req.kind, quantity = req.quantity))]
    async fn return_items(&self, req: ReturnRequest) -> Result<ReturnOutcome, BackendError> {
        let response = self
            .client
            .post(self.url("/inventory/return"))
            .json(&req)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;
        let body = Self::read_body(response).await?;

        // Full closure comes back as an empty body, `null`, or `{closed:true}`
        let trimmed = body.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(ReturnOutcome::Closed);
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Body {
            Closed {
                #[allow(dead_code)]
                closed: bool,
            },
            Entry(WireHoldingEntry),
        }

        match serde_json::from_str(trimmed) {
            Ok(Body::Closed { .. }) => Ok(ReturnOutcome::Closed),
            Ok(Body::Entry(entry)) => Ok(ReturnOutcome::Updated(entry)),
            Err(e) => Err(BackendError::Shape(e.to_string())),
        }
    }
}
