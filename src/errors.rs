//! Typed error hierarchy for the phase engine.
//!
//! - `WorkflowError`: every failure the engine can raise
//! - `TransactionFailure`: a failed commit or `execute`, carrying any
//!   diagnostics collected while undoing already-applied operations

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the phase engine, its storage layer, and its locks.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Storage failure at {path}: {source}")]
    StorageFailure {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out after {timeout_ms}ms waiting for lock on {path}")]
    LockTimeout { path: String, timeout_ms: u64 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WorkflowError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn storage(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::StorageFailure {
            path: path.into(),
            source,
        }
    }

    /// Short machine-readable name of the variant, used in reports and audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::ValidationFailed(_) => "validation_failed",
            Self::Conflict(_) => "conflict",
            Self::PermissionDenied(_) => "permission_denied",
            Self::StorageFailure { .. } => "storage_failure",
            Self::LockTimeout { .. } => "lock_timeout",
            Self::Other(_) => "other",
        }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Failure of a transaction commit or of `TransactionManager::execute`.
///
/// `error` is always the original cause. Problems hit while undoing applied
/// operations are listed in `rollback_errors` and never replace it.
#[derive(Debug, Error)]
#[error("Transaction {transaction_id} failed: {error}")]
pub struct TransactionFailure {
    pub transaction_id: Uuid,
    /// Index of the queued operation that failed, if the failure happened during commit.
    pub failed_operation: Option<usize>,
    #[source]
    pub error: WorkflowError,
    pub rollback_errors: Vec<String>,
}

impl TransactionFailure {
    pub fn new(transaction_id: Uuid, error: WorkflowError) -> Self {
        Self {
            transaction_id,
            failed_operation: None,
            error,
            rollback_errors: Vec::new(),
        }
    }

    /// True if storage may not match its pre-transaction state.
    pub fn is_rollback_incomplete(&self) -> bool {
        !self.rollback_errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_carries_kind_and_id() {
        let err = WorkflowError::not_found("phase", "review");
        match &err {
            WorkflowError::NotFound { kind, id } => {
                assert_eq!(*kind, "phase");
                assert_eq!(id, "review");
            }
            _ => panic!("Expected NotFound"),
        }
        assert_eq!(err.to_string(), "phase 'review' not found");
    }

    #[test]
    fn storage_failure_keeps_io_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err = WorkflowError::storage("instances/a.json", io_err);
        match &err {
            WorkflowError::StorageFailure { path, source } => {
                assert_eq!(path, "instances/a.json");
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
            }
            _ => panic!("Expected StorageFailure"),
        }
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn lock_timeout_message_names_path_and_timeout() {
        let err = WorkflowError::LockTimeout {
            path: "doc".to_string(),
            timeout_ms: 50,
        };
        let msg = err.to_string();
        assert!(msg.contains("doc"));
        assert!(msg.contains("50ms"));
        assert_eq!(err.kind(), "lock_timeout");
    }

    #[test]
    fn transaction_failure_keeps_original_error_over_rollback_errors() {
        let mut failure = TransactionFailure::new(
            Uuid::new_v4(),
            WorkflowError::Conflict("delete of missing path C".to_string()),
        );
        assert!(!failure.is_rollback_incomplete());

        failure.rollback_errors.push("restore of B failed".to_string());
        assert!(failure.is_rollback_incomplete());
        assert!(matches!(failure.error, WorkflowError::Conflict(_)));
        assert!(failure.to_string().contains("delete of missing path C"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&WorkflowError::ValidationFailed("x".into()));
        assert_std_error(&TransactionFailure::new(
            Uuid::nil(),
            WorkflowError::PermissionDenied("x".into()),
        ));
    }
}
