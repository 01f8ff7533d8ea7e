use std::{
    fs,
    io::Write,
    sync::Arc,
    time::{Duration, SystemTime},
};

use chrono::{NaiveDate, Utc};
use recur_core::{Materializer, RecurrenceStore, StoreError};
use recur_domain::{RecurrenceRule, RecurrenceUnit, RuleStatus};
use recur_storage_json::{JsonRecurrenceStore, LockInfo};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tempfile::tempdir;
use uuid::Uuid;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn rent_rule(start: NaiveDate) -> RecurrenceRule {
    RecurrenceRule::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        Decimal::new(120_000, 2),
        "Rent",
        start,
        RecurrenceUnit::Monthly,
    )
}

fn raw_rows(store: &JsonRecurrenceStore) -> Vec<Value> {
    let data = fs::read_to_string(store.rules_path()).expect("read rules file");
    serde_json::from_str(&data).expect("rules file is a json array")
}

fn write_rows(store: &JsonRecurrenceStore, rows: &[Value]) {
    let data = serde_json::to_string_pretty(rows).expect("encode rows");
    fs::write(store.rules_path(), data).expect("write rules file");
}

#[tokio::test]
async fn rules_round_trip_through_the_rules_file() {
    let dir = tempdir().expect("tempdir");
    let store = JsonRecurrenceStore::open(dir.path().to_path_buf()).expect("open store");

    let rule = rent_rule(date(2024, 1, 31));
    store.add_rule(&rule).await.expect("add rule");

    let scans = store.query_active_rules().await.expect("query rules");
    assert_eq!(scans.len(), 1);
    let loaded = scans.into_iter().next().unwrap().expect("decodable rule");
    assert_eq!(loaded, rule);
    assert!(store.rules_path().exists());
}

#[tokio::test]
async fn invalid_rules_are_rejected_on_write() {
    let dir = tempdir().expect("tempdir");
    let store = JsonRecurrenceStore::open(dir.path().to_path_buf()).expect("open store");

    let mut rule = rent_rule(date(2024, 1, 1));
    rule.amount = Decimal::ZERO;

    let err = store.add_rule(&rule).await.expect_err("zero amount");
    assert!(matches!(err, StoreError::Invalid(_)));
    assert!(!store.rules_path().exists());
}

#[tokio::test]
async fn paused_rules_are_not_returned_as_active() {
    let dir = tempdir().expect("tempdir");
    let store = JsonRecurrenceStore::open(dir.path().to_path_buf()).expect("open store");

    let mut paused = rent_rule(date(2024, 1, 1));
    paused.status = RuleStatus::Paused;
    store.add_rule(&paused).await.expect("add paused");
    store
        .add_rule(&rent_rule(date(2024, 2, 1)))
        .await
        .expect("add active");

    let active = store.query_active_rules().await.expect("query rules");
    assert_eq!(active.len(), 1);
    assert_eq!(store.list_rules().await.expect("list rules").len(), 2);
}

#[tokio::test]
async fn corrupt_rows_are_reported_individually() {
    let dir = tempdir().expect("tempdir");
    let store = JsonRecurrenceStore::open(dir.path().to_path_buf()).expect("open store");
    store
        .add_rule(&rent_rule(date(2024, 1, 1)))
        .await
        .expect("add rule");

    let mut rows = raw_rows(&store);
    rows.push(json!({ "id": Uuid::new_v4().to_string(), "amount": "not a rule" }));
    write_rows(&store, &rows);

    let scans = store.query_active_rules().await.expect("query rules");
    assert_eq!(scans.len(), 2);
    assert_eq!(scans.iter().filter(|scan| scan.is_ok()).count(), 1);
    match &scans[1] {
        Err(StoreError::Serde(message)) => assert!(message.contains("rule row 1")),
        other => panic!("expected a decode error, got {other:?}"),
    }
}

#[tokio::test]
async fn checkpoint_update_preserves_unknown_units() {
    let dir = tempdir().expect("tempdir");
    let store = JsonRecurrenceStore::open(dir.path().to_path_buf()).expect("open store");
    let rule = rent_rule(date(2024, 1, 1));
    store.add_rule(&rule).await.expect("add rule");

    let mut rows = raw_rows(&store);
    rows[0]["unit"] = json!("fortnightly");
    write_rows(&store, &rows);

    let scans = store.query_active_rules().await.expect("query rules");
    let loaded = scans.into_iter().next().unwrap().expect("decodable rule");
    assert_eq!(loaded.unit, None);

    store
        .update_rule_checkpoint(rule.id, date(2024, 3, 1))
        .await
        .expect("update checkpoint");

    let rows = raw_rows(&store);
    assert_eq!(rows[0]["unit"], json!("fortnightly"));
    assert_eq!(rows[0]["last_occurrence"], json!("2024-03-01"));
}

#[tokio::test]
async fn checkpoint_update_for_missing_rule_is_not_found() {
    let dir = tempdir().expect("tempdir");
    let store = JsonRecurrenceStore::open(dir.path().to_path_buf()).expect("open store");
    let missing = Uuid::new_v4();

    let err = store
        .update_rule_checkpoint(missing, date(2024, 1, 1))
        .await
        .expect_err("no such rule");
    assert!(matches!(err, StoreError::NotFound(id) if id == missing));
}

#[tokio::test]
async fn entries_are_appended_and_outlive_their_rule() {
    let dir = tempdir().expect("tempdir");
    let store = JsonRecurrenceStore::open(dir.path().to_path_buf()).expect("open store");
    let rule = rent_rule(date(2024, 1, 15));
    store.add_rule(&rule).await.expect("add rule");

    let first = store
        .insert_concrete_entry(rule.entry_for(date(2024, 1, 15)))
        .await
        .expect("insert first");
    let second = store
        .insert_concrete_entry(rule.entry_for(date(2024, 2, 15)))
        .await
        .expect("insert second");

    assert!(store.remove_rule(rule.id).await.expect("remove rule"));
    assert!(!store.remove_rule(rule.id).await.expect("remove again"));

    let entries = store.list_entries().await.expect("list entries");
    assert_eq!(entries, vec![first, second]);
    assert!(store.list_rules().await.expect("list rules").is_empty());
}

#[tokio::test]
async fn two_stores_on_one_directory_exclude_each_other() {
    let dir = tempdir().expect("tempdir");
    let first = JsonRecurrenceStore::open(dir.path().to_path_buf()).expect("open first");
    let second = JsonRecurrenceStore::open(dir.path().to_path_buf()).expect("open second");

    assert!(first.try_acquire_lock(42).await.expect("first acquire"));
    assert!(!second.try_acquire_lock(42).await.expect("second acquire"));
    assert!(second.try_acquire_lock(43).await.expect("other key"));

    first.release_lock(42).await.expect("release");
    assert!(second.try_acquire_lock(42).await.expect("acquire after release"));
}

#[tokio::test]
async fn release_leaves_locks_held_by_others() {
    let dir = tempdir().expect("tempdir");
    let owner = JsonRecurrenceStore::open(dir.path().to_path_buf()).expect("open owner");
    let other = JsonRecurrenceStore::open(dir.path().to_path_buf()).expect("open other");

    assert!(owner.try_acquire_lock(7).await.expect("acquire"));
    other.release_lock(7).await.expect("foreign release is a no-op");
    assert!(owner.lock_path(7).exists());

    // Releasing a key nobody holds is fine.
    other.release_lock(8).await.expect("release unheld key");
}

#[tokio::test]
async fn stale_locks_are_broken() {
    let dir = tempdir().expect("tempdir");
    let store = JsonRecurrenceStore::open(dir.path().to_path_buf())
        .expect("open store")
        .with_stale_after(Duration::from_secs(60));

    let abandoned = LockInfo {
        holder: Uuid::new_v4(),
        pid: 1,
        hostname: "crashed-host".into(),
        acquired_at: Utc::now() - chrono::Duration::hours(2),
    };
    fs::write(
        store.lock_path(5),
        serde_json::to_vec(&abandoned).expect("encode lock"),
    )
    .expect("write lock file");

    assert!(store.try_acquire_lock(5).await.expect("acquire stale"));
    let data = fs::read(store.lock_path(5)).expect("read lock");
    let info: LockInfo = serde_json::from_slice(&data).expect("decode lock");
    assert_eq!(info.holder, store.holder_id());
}

#[tokio::test]
async fn fresh_unreadable_lock_is_still_held() {
    let dir = tempdir().expect("tempdir");
    let store = JsonRecurrenceStore::open(dir.path().to_path_buf()).expect("open store");
    fs::write(store.lock_path(9), b"").expect("write empty lock");

    assert!(!store.try_acquire_lock(9).await.expect("acquire"));
    assert!(store.lock_path(9).exists());
}

#[tokio::test]
async fn old_unreadable_lock_is_broken_by_age() {
    let dir = tempdir().expect("tempdir");
    let store = JsonRecurrenceStore::open(dir.path().to_path_buf())
        .expect("open store")
        .with_stale_after(Duration::from_secs(60));
    fs::write(store.lock_path(9), b"{").expect("write torn lock");
    fs::File::options()
        .write(true)
        .open(store.lock_path(9))
        .expect("open lock")
        .set_modified(SystemTime::now() - Duration::from_secs(2 * 60 * 60))
        .expect("age lock");

    assert!(store.try_acquire_lock(9).await.expect("acquire"));
    let info: LockInfo =
        serde_json::from_slice(&fs::read(store.lock_path(9)).expect("read lock")).expect("decode");
    assert_eq!(info.holder, store.holder_id());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_stores_grant_a_key_to_exactly_one_holder() {
    let dir = tempdir().expect("tempdir");
    for key in 0..50_i64 {
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store =
                JsonRecurrenceStore::open(dir.path().to_path_buf()).expect("open store");
            tasks.push(tokio::spawn(async move { store.try_acquire_lock(key).await }));
        }
        let mut granted = 0;
        for task in tasks {
            if task.await.expect("join").expect("acquire") {
                granted += 1;
            }
        }
        assert_eq!(granted, 1, "key {key} granted {granted} times");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_breakers_replace_a_stale_lock_once() {
    let dir = tempdir().expect("tempdir");
    for key in 0..20_i64 {
        let abandoned = LockInfo {
            holder: Uuid::new_v4(),
            pid: 1,
            hostname: "crashed-host".into(),
            acquired_at: Utc::now() - chrono::Duration::hours(2),
        };
        let seed = JsonRecurrenceStore::open(dir.path().to_path_buf()).expect("open seed");
        fs::write(
            seed.lock_path(key),
            serde_json::to_vec(&abandoned).expect("encode lock"),
        )
        .expect("write lock file");

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = JsonRecurrenceStore::open(dir.path().to_path_buf())
                .expect("open store")
                .with_stale_after(Duration::from_secs(60));
            tasks.push(tokio::spawn(async move { store.try_acquire_lock(key).await }));
        }
        let mut granted = 0;
        for task in tasks {
            if task.await.expect("join").expect("acquire") {
                granted += 1;
            }
        }
        assert_eq!(granted, 1, "key {key} granted {granted} times");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_rule_writers_do_not_lose_updates() {
    let dir = tempdir().expect("tempdir");
    let seed = JsonRecurrenceStore::open(dir.path().to_path_buf()).expect("open seed");
    let checkpointed = rent_rule(date(2024, 1, 1));
    seed.add_rule(&checkpointed).await.expect("add seed rule");

    let mut tasks = Vec::new();
    for writer in 0..6_u32 {
        let store = JsonRecurrenceStore::open(dir.path().to_path_buf()).expect("open store");
        let rule_id = checkpointed.id;
        tasks.push(tokio::spawn(async move {
            for _ in 0..5 {
                store.add_rule(&rent_rule(date(2024, 1, 1))).await?;
            }
            store
                .update_rule_checkpoint(rule_id, date(2024, 2, writer + 1))
                .await
        }));
    }
    for task in tasks {
        task.await.expect("join").expect("writer");
    }

    let rules = seed.list_rules().await.expect("list rules");
    assert_eq!(rules.len(), 31);
    assert!(rules.iter().all(|scan| scan.is_ok()));
    let rows = raw_rows(&seed);
    assert!(rows
        .iter()
        .any(|row| row["id"] == json!(checkpointed.id.to_string())
            && row["last_occurrence"].is_string()));
    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .expect("read dir")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn append_after_partial_line_keeps_new_entries_readable() {
    let dir = tempdir().expect("tempdir");
    let store = JsonRecurrenceStore::open(dir.path().to_path_buf()).expect("open store");
    let rule = rent_rule(date(2024, 1, 15));
    let first = store
        .insert_concrete_entry(rule.entry_for(date(2024, 1, 15)))
        .await
        .expect("insert first");

    let mut file = fs::OpenOptions::new()
        .append(true)
        .open(store.entries_path())
        .expect("open entries");
    file.write_all(br#"{"id":"0000"#).expect("write torn line");
    drop(file);

    let second = store
        .insert_concrete_entry(rule.entry_for(date(2024, 2, 15)))
        .await
        .expect("insert second");

    let entries = store.list_entries().await.expect("list entries");
    assert_eq!(entries, vec![first, second]);
}

#[tokio::test]
async fn materializer_runs_against_the_json_store() {
    let dir = tempdir().expect("tempdir");
    let store = Arc::new(JsonRecurrenceStore::open(dir.path().to_path_buf()).expect("open store"));
    let rule = rent_rule(date(2024, 1, 1));
    store.add_rule(&rule).await.expect("add rule");

    let materializer = Materializer::new(Arc::clone(&store));
    let summary = materializer
        .process(date(2024, 3, 10))
        .await
        .expect("first run");
    assert_eq!(summary.entries_created, 3);

    let again = materializer
        .process(date(2024, 3, 10))
        .await
        .expect("second run");
    assert_eq!(again.entries_created, 0);

    let mut dates: Vec<_> = store
        .list_entries()
        .await
        .expect("list entries")
        .into_iter()
        .map(|entry| entry.date)
        .collect();
    dates.sort();
    assert_eq!(dates, vec![date(2024, 1, 1), date(2024, 2, 1), date(2024, 3, 1)]);

    let reloaded = store
        .list_rules()
        .await
        .expect("list rules")
        .into_iter()
        .next()
        .unwrap()
        .expect("decodable rule");
    assert_eq!(reloaded.last_occurrence, Some(date(2024, 3, 1)));
}
