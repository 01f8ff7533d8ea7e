use recur_config::{ConfigError, ConfigManager, SchedulerSettings};
use recur_domain::CheckpointPolicy;
use tempfile::tempdir;

#[test]
fn missing_file_yields_defaults() {
    let dir = tempdir().expect("tempdir");
    let manager = ConfigManager::new(dir.path().join("scheduler.json"));

    let settings = manager.load().expect("load defaults");

    assert_eq!(settings, SchedulerSettings::default());
}

#[test]
fn config_manager_persists_and_loads_settings() {
    let dir = tempdir().expect("tempdir");
    let manager = ConfigManager::with_base_dir(dir.path().to_path_buf()).expect("manager");

    let settings = SchedulerSettings {
        interval_secs: 900,
        lock_key: Some(99),
        checkpoint_policy: CheckpointPolicy::StopAtFirstFailure,
        ..SchedulerSettings::default()
    };

    manager.save(&settings).expect("save settings");
    let loaded = manager.load().expect("load settings");

    assert_eq!(loaded, settings);
    assert!(manager.config_path().ends_with("config/scheduler.json"));
}

#[test]
fn invalid_file_contents_are_reported() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("scheduler.json");
    std::fs::write(&path, r#"{"interval_secs": 0}"#).expect("write");
    let manager = ConfigManager::new(path.clone());

    assert!(matches!(manager.load(), Err(ConfigError::Invalid { .. })));

    std::fs::write(&path, "not json").expect("write");
    assert!(matches!(manager.load(), Err(ConfigError::Serde(_))));
}
