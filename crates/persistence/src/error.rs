//! Persistence error types for reconciliation storage.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use std::fmt;

use fleetkeeper_model::{OperationState, UnmarshalError};
use thiserror::Error;

/// Errors that can occur during persistence operations.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Another active run already holds the lock for this configuration version.
    ///
    /// Callers should treat the cluster as already scheduled.
    #[error("reconciliation for config version {config_version} already locked by run '{scheduling_id}'")]
    DuplicateLock {
        config_version: i64,
        scheduling_id: String,
    },

    /// Record not found
    #[error("record not found: {entity_type} with id '{id}'")]
    NotFound { entity_type: String, id: String },

    /// Transition not allowed by the operation state graph
    #[error("invalid operation state transition: {from} -> {to}")]
    InvalidTransition {
        from: OperationState,
        to: OperationState,
    },

    /// Stored data does not match the expected entity shape
    #[error("unmarshal failed: {0}")]
    Unmarshal(#[from] UnmarshalError),

    /// The store could not be reached
    #[error("store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    /// Query execution failed
    #[error("query failed: {reason}")]
    QueryFailed { reason: String },

    /// Transaction was rolled back or lost a write race
    #[error("transaction failed: {reason}")]
    TransactionFailed { reason: String },

    /// The run was already finished by another bookkeeper
    #[error("reconciliation '{scheduling_id}' is already finished")]
    AlreadyFinished { scheduling_id: String },

    /// Caller supplied unusable input
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    /// Schema error
    #[error("schema error: {reason}")]
    SchemaError { reason: String },
}

impl PersistenceError {
    /// Create a duplicate lock error.
    pub fn duplicate_lock(config_version: i64, scheduling_id: impl Into<String>) -> Self {
        Self::DuplicateLock {
            config_version,
            scheduling_id: scheduling_id.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Create an invalid transition error.
    pub const fn invalid_transition(from: OperationState, to: OperationState) -> Self {
        Self::InvalidTransition { from, to }
    }

    /// Create a store unavailable error.
    pub fn store_unavailable(reason: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a query failed error.
    pub fn query_failed(reason: impl Into<String>) -> Self {
        Self::QueryFailed {
            reason: reason.into(),
        }
    }

    /// Create a transaction failed error.
    pub fn transaction_failed(reason: impl Into<String>) -> Self {
        Self::TransactionFailed {
            reason: reason.into(),
        }
    }

    /// Create an already finished error.
    pub fn already_finished(scheduling_id: impl Into<String>) -> Self {
        Self::AlreadyFinished {
            scheduling_id: scheduling_id.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Create a schema error.
    pub fn schema_error(reason: impl Into<String>) -> Self {
        Self::SchemaError {
            reason: reason.into(),
        }
    }

    /// Check if error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. } | Self::TransactionFailed { .. }
        )
    }
}

/// Result type for persistence operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Helper to convert SurrealDB errors to PersistenceError.
pub fn from_surrealdb_error(err: impl fmt::Display) -> PersistenceError {
    let msg = err.to_string();
    let lower = msg.to_lowercase();

    // Categorize based on error message patterns
    if lower.contains("connection") || lower.contains("connect") || lower.contains("timeout") {
        PersistenceError::store_unavailable(msg)
    } else if lower.contains("conflict") || lower.contains("can be retried") {
        PersistenceError::transaction_failed(msg)
    } else {
        PersistenceError::query_failed(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_unavailable_is_retryable() {
        let err = PersistenceError::store_unavailable("host unreachable");
        assert!(matches!(err, PersistenceError::StoreUnavailable { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_duplicate_lock_is_not_retryable() {
        let err = PersistenceError::duplicate_lock(7, "run-1");
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "reconciliation for config version 7 already locked by run 'run-1'"
        );
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = PersistenceError::invalid_transition(OperationState::Done, OperationState::Error);
        assert_eq!(err.to_string(), "invalid operation state transition: done -> error");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unmarshal_conversion() {
        let err: PersistenceError = UnmarshalError::missing_field("operation", "state").into();
        assert!(matches!(err, PersistenceError::Unmarshal(_)));
    }

    #[test]
    fn test_from_surrealdb_error_connection() {
        let err = from_surrealdb_error("connection refused");
        assert!(matches!(err, PersistenceError::StoreUnavailable { .. }));
    }

    #[test]
    fn test_from_surrealdb_error_conflict() {
        let err = from_surrealdb_error("Failed to commit transaction due to a read or write conflict. This transaction can be retried");
        assert!(matches!(err, PersistenceError::TransactionFailed { .. }));
    }

    #[test]
    fn test_from_surrealdb_error_generic() {
        let err = from_surrealdb_error("some random error");
        assert!(matches!(err, PersistenceError::QueryFailed { .. }));
    }
}
