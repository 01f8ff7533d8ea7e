use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("Unknown recurrence unit: {0}")]
    UnknownUnit(String),
    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
    #[error("Description must not be empty")]
    EmptyDescription,
    #[error("Checkpoint {checkpoint} precedes start date {start}")]
    CheckpointBeforeStart {
        checkpoint: NaiveDate,
        start: NaiveDate,
    },
}
