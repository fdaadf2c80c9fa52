//! Error taxonomy for the inventory engine.
//!
//! Three families, kept distinct end to end:
//!
//! - [`EngineError::Validation`] — rejected locally before any network call,
//!   with a field-keyed message map.
//! - [`EngineError::RemoteShape`] — the backend answered 2xx but the payload
//!   failed schema validation (a contract violation, not a transport error).
//! - [`EngineError::Remote`] — non-2xx status or a transport failure; always
//!   triggers rollback of any optimistic mutation it confirms against.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::backend::BackendError;

/// Field-keyed validation messages (`"date"`, `"quantity"`, `"rows[2]"`, …)
pub type FieldErrors = BTreeMap<String, String>;

/// Engine-level error surfaced to callers
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Local validation failure; never reaches the network
    #[error("validation failed: {fields:?}")]
    Validation {
        /// Per-field messages
        fields: FieldErrors,
    },

    /// Backend responded successfully but with a schema-invalid payload
    #[error("malformed backend payload: {detail}")]
    RemoteShape {
        /// What failed to parse
        detail: String,
    },

    /// Backend request failed (HTTP status or transport)
    #[error("backend request failed: {message}")]
    Remote {
        /// HTTP status, if one was received
        status: Option<u16>,
        /// Human-readable detail
        message: String,
    },
}

impl EngineError {
    /// A validation error for a single field
    #[must_use]
    pub fn field(name: impl Into<String>, message: impl Into<String>) -> Self {
        let mut fields = FieldErrors::new();
        fields.insert(name.into(), message.into());
        EngineError::Validation { fields }
    }

    /// A validation error from an already-built field map
    #[must_use]
    pub const fn fields(fields: FieldErrors) -> Self {
        EngineError::Validation { fields }
    }

    /// Whether this is a local validation error
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, EngineError::Validation { .. })
    }

    /// Whether this is a remote contract violation (2xx with a bad payload)
    #[must_use]
    pub const fn is_remote_shape(&self) -> bool {
        matches!(self, EngineError::RemoteShape { .. })
    }
}

impl From<BackendError> for EngineError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Status { status, message } => EngineError::Remote {
                status: Some(status),
                message,
            },
            BackendError::Network(message) => EngineError::Remote {
                status: None,
                message,
            },
            BackendError::Shape(detail) => EngineError::RemoteShape { detail },
        }
    }
}
