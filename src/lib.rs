//! Recur Scheduler hosts the recurrence materialization loop as a long-running
//! process over a shared JSON data directory.

pub mod daemon;
pub mod errors;
pub mod utils;

use std::sync::Once;

pub use daemon::{
    open_store, resolve_settings, run_once, scheduler_options, start, start_with_clock,
    ResolvedSettings,
};
pub use errors::AppError;

static INIT_TRACING: Once = Once::new();

/// Initializes global tracing and emits a startup info log.
pub fn init() {
    INIT_TRACING.call_once(|| {
        utils::init_tracing();
        tracing::info!("Recur scheduler tracing initialized.");
    });
}
