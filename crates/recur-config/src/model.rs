use std::{path::PathBuf, time::Duration};

use recur_domain::CheckpointPolicy;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Stores the tunables of the recurrence scheduler process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "SchedulerSettings::default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "SchedulerSettings::default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
    /// Overrides the built-in lock key. Every instance sharing a store must agree on it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_key: Option<i64>,
    /// Age after which a lock left behind by a vanished holder is broken.
    #[serde(default = "SchedulerSettings::default_lock_stale_after_secs")]
    pub lock_stale_after_secs: u64,
    #[serde(default)]
    pub checkpoint_policy: CheckpointPolicy,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Optional custom directory for rules, entries and locks. Defaults to `<data dir>/recur`.
    pub data_dir: Option<PathBuf>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval_secs: Self::default_interval_secs(),
            operation_timeout_secs: Self::default_operation_timeout_secs(),
            lock_key: None,
            lock_stale_after_secs: Self::default_lock_stale_after_secs(),
            checkpoint_policy: CheckpointPolicy::default(),
            data_dir: None,
        }
    }
}

impl SchedulerSettings {
    pub fn default_interval_secs() -> u64 {
        60 * 60
    }

    pub fn default_operation_timeout_secs() -> u64 {
        10
    }

    pub fn default_lock_stale_after_secs() -> u64 {
        6 * 60 * 60
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn lock_stale_after(&self) -> Duration {
        Duration::from_secs(self.lock_stale_after_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "interval_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if self.operation_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "operation_timeout_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if self.lock_stale_after_secs <= self.operation_timeout_secs {
            return Err(ConfigError::Invalid {
                field: "lock_stale_after_secs",
                reason: "must exceed operation_timeout_secs".into(),
            });
        }
        Ok(())
    }

    pub fn resolve_data_dir(&self) -> PathBuf {
        if let Some(path) = &self.data_dir {
            return path.clone();
        }

        let base = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));

        base.join("recur")
    }
}
