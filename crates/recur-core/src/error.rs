use std::time::Duration;

use recur_domain::DomainError;
use thiserror::Error;
use uuid::Uuid;

/// Failures reported by a [`crate::RecurrenceStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(String),
    #[error("Operation `{operation}` timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("Rule not found: {0}")]
    NotFound(Uuid),
    #[error("Invalid record: {0}")]
    Invalid(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<DomainError> for StoreError {
    fn from(err: DomainError) -> Self {
        StoreError::Invalid(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Lock {key} could not be coordinated: {source}")]
    Lock {
        key: i64,
        #[source]
        source: StoreError,
    },
    #[error("Scheduler task failed: {0}")]
    TaskFailed(String),
}
