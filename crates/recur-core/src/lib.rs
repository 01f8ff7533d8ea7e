//! recur-core
//!
//! Due-date calculation, materialization, single-flight locking, and the background
//! scheduler loop for recurring ledger obligations.
//! Depends on recur-domain. Persistence is reached only through [`RecurrenceStore`].

pub mod error;
pub mod lock;
pub mod materializer;
pub mod memory_store;
pub mod schedule;
pub mod scheduler;
pub mod storage;
pub mod time;

pub use error::{CoreError, StoreError};
pub use lock::{SingleFlight, DEFAULT_LOCK_KEY};
pub use materializer::{Materializer, RuleOutcome, RunSummary};
pub use memory_store::InMemoryStore;
pub use schedule::{due_dates, rule_due_dates, MAX_DUE_DATE_ITERATIONS};
pub use scheduler::{Scheduler, SchedulerOptions, SchedulerState, StopHandle};
pub use storage::{bounded, RecurrenceStore, RuleScan};
pub use time::{Clock, FixedClock, SystemClock};
