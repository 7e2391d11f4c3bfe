// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the replication engine.
//!
//! Errors are split by how far their damage reaches. Some belong to one
//! document and are isolated by the cycle orchestrator. Others poison the
//! whole cycle, which then aborts without touching the checkpoint.
//!
//! # Error Categories
//!
//! | Error Type | Scope | Retryable | Description |
//! |------------|-------|-----------|-------------|
//! | `Config` | engine | No | Store missing or configuration invalid |
//! | `NotFound` | document | No | Document vanished between feed and fetch |
//! | `StaleWrite` | document | No | Remote rejected the supplied revision |
//! | `Validation` | document | No | Guard rejected an operation before any mutation |
//! | `Transport` | cycle | Yes | Remote store unreachable |
//! | `Store` | cycle | No | Local store backend failure |
//! | `Database` | cycle | No | SQLite error (needs operator attention) |
//! | `Serialization` | cycle | No | Checkpoint record could not be (de)serialized |
//! | `InvalidState` | engine | No | Lifecycle method called in the wrong state |
//! | `Shutdown` | engine | No | Engine is shutting down |
//! | `Internal` | cycle | No | Unexpected internal error |
//!
//! Use [`ReplicationError::is_document_scoped()`] to decide whether a failure
//! may be skipped for the rest of the cycle, and
//! [`ReplicationError::is_retryable()`] to decide whether a later cycle is
//! likely to succeed without intervention.

use crate::store::StoreError;
use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors that can occur during replication.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Invalid or missing configuration.
    ///
    /// Raised by `start()` when either store is unset. Not retryable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A `get` found nothing for the uuid.
    ///
    /// Callers normally treat this as "does not exist yet"; it only surfaces
    /// when a document the change feed announced is gone by the time we fetch it.
    #[error("Document not found: {0}")]
    NotFound(String),

    /// Remote `save`/`delete` rejected because the revision no longer matches.
    ///
    /// The document's local flags are left as they were so the next cycle
    /// classifies it again.
    #[error("Stale write ({operation}) for {uuid}: {message}")]
    StaleWrite {
        operation: String,
        uuid: String,
        message: String,
    },

    /// Remote store unavailable.
    ///
    /// Aborts the cycle and halts scheduling. Retryable after a restart.
    #[error("Transport error ({operation}): {message}")]
    Transport { operation: String, message: String },

    /// An operation was refused before touching any store.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Local store backend failure.
    #[error("Store error ({operation}): {message}")]
    Store { operation: String, message: String },

    /// SQLite error raised while opening the SQLite local store.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Checkpoint record (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Engine state machine violation.
    ///
    /// Occurs when a lifecycle method is called in the wrong state
    /// (e.g., calling `start()` on a running engine).
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown in progress.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReplicationError {
    /// Map a store error onto the replication taxonomy.
    ///
    /// `operation` names the call that failed (e.g. `"remote.save"`) and ends
    /// up in the error message.
    pub fn from_store(operation: impl Into<String>, err: StoreError) -> Self {
        let operation = operation.into();
        match err {
            StoreError::NotFound(uuid) => Self::NotFound(uuid),
            StoreError::Conflict { uuid, message } => Self::StaleWrite {
                operation,
                uuid,
                message,
            },
            StoreError::Unavailable(message) => Self::Transport { operation, message },
            StoreError::Backend(message) => Self::Store { operation, message },
        }
    }

    /// Create a transport error.
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Check if this error only affects a single document.
    ///
    /// Document-scoped failures are logged and counted, and the cycle moves on
    /// to the next document. Everything else aborts the cycle.
    pub fn is_document_scoped(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::StaleWrite { .. } | Self::Validation(_)
        )
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Config(_) => false,
            Self::NotFound(_) => false,
            Self::StaleWrite { .. } => false,
            Self::Validation(_) => false,
            Self::Store { .. } => false,
            Self::Database(_) => false,
            Self::Serialization(_) => false,
            Self::InvalidState { .. } => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::NotFound(_) => "not_found",
            Self::StaleWrite { .. } => "stale_write",
            Self::Transport { .. } => "transport",
            Self::Validation(_) => "validation",
            Self::Store { .. } => "store",
            Self::Database(_) => "database",
            Self::Serialization(_) => "serialization",
            Self::InvalidState { .. } => "invalid_state",
            Self::Shutdown => "shutdown",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_store_not_found() {
        let err = ReplicationError::from_store("remote.get", StoreError::NotFound("a".into()));
        assert!(matches!(err, ReplicationError::NotFound(ref uuid) if uuid == "a"));
        assert!(err.is_document_scoped());
    }

    #[test]
    fn test_from_store_conflict_is_stale_write() {
        let err = ReplicationError::from_store(
            "remote.delete",
            StoreError::Conflict {
                uuid: "d".into(),
                message: "expected 1-x, found 2-y".into(),
            },
        );
        assert!(err.is_document_scoped());
        assert!(!err.is_retryable());
        let msg = err.to_string();
        assert!(msg.contains("remote.delete"));
        assert!(msg.contains("d"));
    }

    #[test]
    fn test_from_store_unavailable_is_transport() {
        let err = ReplicationError::from_store(
            "remote.get_changes",
            StoreError::Unavailable("connection refused".into()),
        );
        assert!(matches!(err, ReplicationError::Transport { .. }));
        assert!(err.is_retryable());
        assert!(!err.is_document_scoped());
    }

    #[test]
    fn test_from_store_backend_is_store() {
        let err = ReplicationError::from_store("local.save", StoreError::Backend("disk full".into()));
        assert!(matches!(err, ReplicationError::Store { .. }));
        assert!(!err.is_document_scoped());
        assert_eq!(err.kind(), "store");
    }

    #[test]
    fn test_validation_is_document_scoped() {
        let err = ReplicationError::Validation("document has unresolved conflict".into());
        assert!(err.is_document_scoped());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_not_document_scoped_config() {
        let err = ReplicationError::Config("remote store is not configured".into());
        assert!(!err.is_document_scoped());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_invalid_state_formatting() {
        let err = ReplicationError::InvalidState {
            expected: "Created".to_string(),
            actual: "Running".to_string(),
        };
        assert!(err.to_string().contains("Created"));
        assert!(err.to_string().contains("Running"));
    }

    #[test]
    fn test_transport_constructor() {
        let err = ReplicationError::transport("remote.save", "timeout");
        assert_eq!(err.kind(), "transport");
        assert!(err.to_string().contains("timeout"));
    }
}
