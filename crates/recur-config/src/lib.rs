//! recur-config
//!
//! Scheduler settings model plus disk persistence helpers.

pub mod error;
pub mod manager;
pub mod model;

pub use error::ConfigError;
pub use manager::ConfigManager;
pub use model::SchedulerSettings;
