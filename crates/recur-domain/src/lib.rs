//! recur-domain
//!
//! Pure domain models for recurring ledger obligations (rules, materialized entries).
//! No I/O, no scheduling, no storage. Only data types, calendar stepping, and validation.

pub mod common;
pub mod entry;
pub mod error;
pub mod policy;
pub mod rule;

pub use common::*;
pub use entry::*;
pub use error::DomainError;
pub use policy::CheckpointPolicy;
pub use rule::*;
