//! Wiring between on-disk settings, the JSON store, and the scheduler loop.

use std::{path::PathBuf, sync::Arc};

use tracing::info;

use recur_config::{ConfigManager, SchedulerSettings};
use recur_core::{
    Clock, RunSummary, Scheduler, SchedulerOptions, StopHandle, SystemClock, DEFAULT_LOCK_KEY,
};
use recur_storage_json::JsonRecurrenceStore;

use crate::AppError;

/// Settings after command-line overrides have been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSettings {
    pub settings: SchedulerSettings,
    pub config_path: PathBuf,
    pub data_dir: PathBuf,
}

/// Loads the settings file and applies overrides.
///
/// Without an explicit `config_path` the file lives at
/// `<data dir>/config/scheduler.json`. A `data_dir` override wins over the one
/// stored in the file.
pub fn resolve_settings(
    config_path: Option<PathBuf>,
    data_dir: Option<PathBuf>,
) -> Result<ResolvedSettings, AppError> {
    let manager = match config_path {
        Some(path) => ConfigManager::new(path),
        None => {
            let base = data_dir
                .clone()
                .unwrap_or_else(|| SchedulerSettings::default().resolve_data_dir());
            ConfigManager::with_base_dir(base)?
        }
    };
    let mut settings = manager.load()?;
    if let Some(dir) = data_dir {
        settings.data_dir = Some(dir);
    }
    let data_dir = settings.resolve_data_dir();
    Ok(ResolvedSettings {
        settings,
        config_path: manager.config_path().to_path_buf(),
        data_dir,
    })
}

pub fn scheduler_options(settings: &SchedulerSettings) -> SchedulerOptions {
    SchedulerOptions {
        interval: settings.interval(),
        operation_timeout: settings.operation_timeout(),
        lock_key: settings.lock_key.unwrap_or(DEFAULT_LOCK_KEY),
        checkpoint_policy: settings.checkpoint_policy,
    }
}

pub fn open_store(resolved: &ResolvedSettings) -> Result<Arc<JsonRecurrenceStore>, AppError> {
    let store = JsonRecurrenceStore::open(resolved.data_dir.clone())?
        .with_stale_after(resolved.settings.lock_stale_after());
    Ok(Arc::new(store))
}

/// Opens the store and spawns the scheduler loop on the current runtime.
pub fn start(resolved: &ResolvedSettings) -> Result<StopHandle, AppError> {
    start_with_clock(resolved, Arc::new(SystemClock))
}

pub fn start_with_clock(
    resolved: &ResolvedSettings,
    clock: Arc<dyn Clock>,
) -> Result<StopHandle, AppError> {
    let store = open_store(resolved)?;
    let options = scheduler_options(&resolved.settings);
    info!(
        data_dir = %resolved.data_dir.display(),
        config = %resolved.config_path.display(),
        holder = %store.holder_id(),
        "starting recurrence scheduler"
    );
    Ok(Scheduler::new(store, clock, options).start())
}

/// Performs a single lock-coordinated pass and returns its summary, or `None`
/// when another instance holds the lock.
pub async fn run_once(resolved: &ResolvedSettings) -> Result<Option<RunSummary>, AppError> {
    let store = open_store(resolved)?;
    let scheduler = Scheduler::new(
        store,
        Arc::new(SystemClock),
        scheduler_options(&resolved.settings),
    );
    Ok(scheduler.run_once().await?)
}
