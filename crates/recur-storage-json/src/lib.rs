//! recur-storage-json
//!
//! Filesystem-backed [`RecurrenceStore`]: rules in `rules.json`, materialized entries
//! appended to `entries.jsonl`, and advisory locks as files under `locks/`. Several
//! processes may share one directory.
//!
//! A lock file is staged under a unique name and published with `hard_link`, which
//! fails when the target exists, so a lock is never observable half-written. The
//! directory must live on a filesystem that supports hard links.

use std::{
    io::{ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::Mutex,
};
use tracing::{debug, warn};
use uuid::Uuid;

use recur_core::{RecurrenceStore, RuleScan, StoreError};
use recur_domain::{ConcreteEntry, NewEntry, RecurrenceRule};

const RULES_FILE: &str = "rules.json";
const ENTRIES_FILE: &str = "entries.jsonl";
const LOCKS_DIR: &str = "locks";
const LOCK_EXTENSION: &str = "lock";
const BREAK_EXTENSION: &str = "break";
const STAGING_EXTENSION: &str = "tmp";
const TOMBSTONE_EXTENSION: &str = "stale";
const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(6 * 60 * 60);

/// Serializes read-modify-write cycles on `rules.json` across processes.
const RULES_LOCK_STEM: &str = "rules";
const RULES_LOCK_STALE_AFTER: Duration = Duration::from_secs(30);
const RULES_LOCK_RETRY: Duration = Duration::from_millis(10);

/// Contents of a lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub holder: Uuid,
    pub pid: u32,
    pub hostname: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockInfo {
    fn new(holder: Uuid) -> Self {
        Self {
            holder,
            pid: std::process::id(),
            hostname: hostname(),
            acquired_at: Utc::now(),
        }
    }

    pub fn is_stale(&self, threshold: Duration) -> bool {
        let elapsed = Utc::now().signed_duration_since(self.acquired_at);
        // A timestamp from the future means clock skew between hosts; treat it as live.
        elapsed.to_std().map(|age| age > threshold).unwrap_or(false)
    }
}

/// Snapshot of a lock file taken before deciding whether to break it.
struct HeldLock {
    bytes: Vec<u8>,
    stale: bool,
}

/// JSON document store for recurrence rules and the entries materialized from them.
pub struct JsonRecurrenceStore {
    root: PathBuf,
    holder: Uuid,
    stale_after: Duration,
    scratch: AtomicU64,
    write_guard: Mutex<()>,
}

impl JsonRecurrenceStore {
    pub fn open(root: PathBuf) -> Result<Self, StoreError> {
        std::fs::create_dir_all(root.join(LOCKS_DIR))?;
        Ok(Self {
            root,
            holder: Uuid::new_v4(),
            stale_after: DEFAULT_STALE_AFTER,
            scratch: AtomicU64::new(0),
            write_guard: Mutex::new(()),
        })
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Identifier written into every lock this instance takes.
    pub fn holder_id(&self) -> Uuid {
        self.holder
    }

    pub fn rules_path(&self) -> PathBuf {
        self.root.join(RULES_FILE)
    }

    pub fn entries_path(&self) -> PathBuf {
        self.root.join(ENTRIES_FILE)
    }

    pub fn lock_path(&self, key: i64) -> PathBuf {
        self.named_lock_path(&key.to_string())
    }

    fn named_lock_path(&self, stem: &str) -> PathBuf {
        self.root
            .join(LOCKS_DIR)
            .join(format!("{}.{}", stem, LOCK_EXTENSION))
    }

    /// A path no other writer, in this process or another, will pick.
    fn scratch_path(&self, dir: &Path, stem: &str, extension: &str) -> PathBuf {
        let seq = self.scratch.fetch_add(1, Ordering::Relaxed);
        dir.join(format!("{}.{}.{}.{}", stem, self.holder, seq, extension))
    }

    /// Stores a validated rule, replacing any row with the same id.
    pub async fn add_rule(&self, rule: &RecurrenceRule) -> Result<Uuid, StoreError> {
        rule.validate()?;
        let row = serde_json::to_value(rule).map_err(|err| StoreError::Serde(err.to_string()))?;
        let id = rule.id.to_string();
        self.edit_rules(|rows| {
            rows.retain(|existing| row_id(existing) != Some(id.as_str()));
            rows.push(row);
            Ok(())
        })
        .await?;
        Ok(rule.id)
    }

    /// Deletes a rule row. Entries already materialized from it stay in the ledger.
    pub async fn remove_rule(&self, rule_id: Uuid) -> Result<bool, StoreError> {
        let id = rule_id.to_string();
        self.edit_rules(|rows| {
            let before = rows.len();
            rows.retain(|existing| row_id(existing) != Some(id.as_str()));
            Ok(rows.len() != before)
        })
        .await
    }

    /// Decodes every rule row regardless of status.
    pub async fn list_rules(&self) -> Result<Vec<RuleScan>, StoreError> {
        let rows = self.read_rule_rows().await?;
        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(index, row)| decode_rule(index, row))
            .collect())
    }

    pub async fn list_entries(&self) -> Result<Vec<ConcreteEntry>, StoreError> {
        let data = match fs::read_to_string(self.entries_path()).await {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut entries = Vec::new();
        for (line_no, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ConcreteEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!(line = line_no + 1, error = %err, "skipping unreadable entry line"),
            }
        }
        Ok(entries)
    }

    async fn read_rule_rows(&self) -> Result<Vec<Value>, StoreError> {
        let data = match fs::read_to_string(self.rules_path()).await {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        if data.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&data).map_err(|err| StoreError::Serde(err.to_string()))
    }

    async fn write_rule_rows(&self, rows: &[Value]) -> Result<(), StoreError> {
        let json =
            serde_json::to_string_pretty(rows).map_err(|err| StoreError::Serde(err.to_string()))?;
        let tmp = self.scratch_path(&self.root, RULES_FILE, STAGING_EXTENSION);
        if let Err(err) = write_synced(&tmp, json.as_bytes()).await {
            discard(&tmp).await;
            return Err(err);
        }
        if let Err(err) = fs::rename(&tmp, self.rules_path()).await {
            discard(&tmp).await;
            return Err(err.into());
        }
        Ok(())
    }

    /// Runs one read-modify-write cycle on the rules file while holding the
    /// cross-process rules lock. Nothing is written when `edit` fails.
    async fn edit_rules<T, F>(&self, edit: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Vec<Value>) -> Result<T, StoreError>,
    {
        let _guard = self.write_guard.lock().await;
        let lock = self.named_lock_path(RULES_LOCK_STEM);
        while !self
            .acquire_file_lock(&lock, RULES_LOCK_STEM, RULES_LOCK_STALE_AFTER)
            .await?
        {
            tokio::time::sleep(RULES_LOCK_RETRY).await;
        }

        let result = async move {
            let mut rows = self.read_rule_rows().await?;
            let value = edit(&mut rows)?;
            self.write_rule_rows(&rows).await?;
            Ok::<T, StoreError>(value)
        }
        .await;

        if let Err(err) = self.release_file_lock(&lock).await {
            warn!(path = %lock.display(), error = %err, "failed to release rules lock");
        }
        result
    }

    /// Stages this instance's [`LockInfo`] and links it into place. `Ok(false)`
    /// when `path` already exists.
    async fn publish_lock(&self, path: &Path, stem: &str) -> Result<bool, StoreError> {
        let dir = self.root.join(LOCKS_DIR);
        let staging = self.scratch_path(&dir, stem, STAGING_EXTENSION);
        let info = serde_json::to_vec(&LockInfo::new(self.holder))
            .map_err(|err| StoreError::Serde(err.to_string()))?;

        let linked = match write_synced(&staging, &info).await {
            Ok(()) => fs::hard_link(&staging, path).await.map_err(StoreError::from),
            Err(err) => Err(err),
        };
        discard(&staging).await;

        match linked {
            Ok(()) => Ok(true),
            Err(StoreError::Io(err)) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn acquire_file_lock(
        &self,
        path: &Path,
        stem: &str,
        stale_after: Duration,
    ) -> Result<bool, StoreError> {
        if self.publish_lock(path, stem).await? {
            return Ok(true);
        }
        match inspect_lock(path, stale_after).await? {
            // Released between the attempt and the inspection.
            None => self.publish_lock(path, stem).await,
            Some(held) if !held.stale => Ok(false),
            Some(_) => self.break_stale_lock(path, stem, stale_after).await,
        }
    }

    /// Breakers serialize on a sibling `.break` file so only one of them replaces
    /// a given stale lock.
    async fn break_stale_lock(
        &self,
        path: &Path,
        stem: &str,
        stale_after: Duration,
    ) -> Result<bool, StoreError> {
        let guard = path.with_extension(BREAK_EXTENSION);
        if !self.publish_lock(&guard, stem).await? {
            if let Some(held) = inspect_lock(&guard, stale_after).await? {
                if held.stale {
                    warn!(path = %guard.display(), "removing abandoned lock-break guard");
                    remove_if_exists(&guard).await?;
                }
            }
            return Ok(false);
        }

        let outcome = self.replace_stale_lock(path, stem, stale_after).await;
        if let Err(err) = remove_if_exists(&guard).await {
            warn!(path = %guard.display(), error = %err, "failed to remove lock-break guard");
        }
        outcome
    }

    async fn replace_stale_lock(
        &self,
        path: &Path,
        stem: &str,
        stale_after: Duration,
    ) -> Result<bool, StoreError> {
        let observed = match inspect_lock(path, stale_after).await? {
            None => return self.publish_lock(path, stem).await,
            Some(held) if !held.stale => return Ok(false),
            Some(held) => held.bytes,
        };

        let dir = self.root.join(LOCKS_DIR);
        let tombstone = self.scratch_path(&dir, stem, TOMBSTONE_EXTENSION);
        match fs::rename(path, &tombstone).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return self.publish_lock(path, stem).await
            }
            Err(err) => return Err(err.into()),
        }

        let moved = fs::read(&tombstone).await?;
        if moved != observed {
            // A new holder took over after the inspection; put its lock back.
            let restored = fs::hard_link(&tombstone, path).await;
            remove_if_exists(&tombstone).await?;
            return match restored {
                Ok(()) => Ok(false),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
                Err(err) => Err(err.into()),
            };
        }

        warn!(path = %path.display(), "breaking stale advisory lock");
        remove_if_exists(&tombstone).await?;
        self.publish_lock(path, stem).await
    }

    /// Removes the lock at `path` only when this instance holds it.
    async fn release_file_lock(&self, path: &Path) -> Result<(), StoreError> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_slice::<LockInfo>(&bytes) {
            Ok(info) if info.holder == self.holder => remove_if_exists(path).await,
            Ok(info) => {
                debug!(path = %path.display(), holder = %info.holder, "lock owned by another holder; leaving it");
                Ok(())
            }
            Err(_) => {
                debug!(path = %path.display(), "unreadable lock is not ours; leaving it");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl RecurrenceStore for JsonRecurrenceStore {
    async fn query_active_rules(&self) -> Result<Vec<RuleScan>, StoreError> {
        let scans = self.list_rules().await?;
        Ok(scans
            .into_iter()
            .filter(|scan| match scan {
                Ok(rule) => rule.is_active(),
                Err(_) => true,
            })
            .collect())
    }

    async fn try_acquire_lock(&self, key: i64) -> Result<bool, StoreError> {
        let path = self.lock_path(key);
        self.acquire_file_lock(&path, &key.to_string(), self.stale_after)
            .await
    }

    async fn release_lock(&self, key: i64) -> Result<(), StoreError> {
        self.release_file_lock(&self.lock_path(key)).await
    }

    async fn insert_concrete_entry(&self, entry: NewEntry) -> Result<ConcreteEntry, StoreError> {
        let created = ConcreteEntry::from_new(entry, Utc::now());
        let mut line =
            serde_json::to_string(&created).map_err(|err| StoreError::Serde(err.to_string()))?;
        line.push('\n');

        let _guard = self.write_guard.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(self.entries_path())
            .await?;

        // An interrupted append can leave a line without its terminator.
        let len = file.metadata().await?.len();
        if len > 0 {
            file.seek(SeekFrom::Start(len - 1)).await?;
            let mut last = [0u8; 1];
            file.read_exact(&mut last).await?;
            if last[0] != b'\n' {
                warn!(path = %self.entries_path().display(), "terminating partial entry line");
                line.insert(0, '\n');
            }
        }

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(created)
    }

    async fn update_rule_checkpoint(
        &self,
        rule_id: Uuid,
        date: NaiveDate,
    ) -> Result<(), StoreError> {
        let id = rule_id.to_string();
        self.edit_rules(|rows| {
            // Only the checkpoint field is touched so values this version cannot decode survive.
            let row = rows
                .iter_mut()
                .find(|row| row_id(row) == Some(id.as_str()))
                .and_then(Value::as_object_mut)
                .ok_or(StoreError::NotFound(rule_id))?;
            row.insert(
                "last_occurrence".into(),
                Value::String(date.format("%Y-%m-%d").to_string()),
            );
            Ok(())
        })
        .await
    }
}

/// Reads the lock at `path`. Contents that do not parse are judged by the file's
/// modification time instead of being treated as abandoned.
async fn inspect_lock(path: &Path, stale_after: Duration) -> Result<Option<HeldLock>, StoreError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let stale = match serde_json::from_slice::<LockInfo>(&bytes) {
        Ok(info) => info.is_stale(stale_after),
        Err(_) => {
            let modified = match fs::metadata(path).await {
                Ok(meta) => meta.modified()?,
                Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
                Err(err) => return Err(err.into()),
            };
            modified
                .elapsed()
                .map(|age| age > stale_after)
                .unwrap_or(false)
        }
    };
    Ok(Some(HeldLock { bytes, stale }))
}

fn decode_rule(index: usize, row: Value) -> RuleScan {
    serde_json::from_value::<RecurrenceRule>(row)
        .map_err(|err| StoreError::Serde(format!("rule row {index}: {err}")))
}

fn row_id(row: &Value) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("HOST"))
        .unwrap_or_else(|_| "localhost".to_string())
}

async fn write_synced(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let mut file = fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

async fn discard(path: &Path) {
    if let Err(err) = remove_if_exists(path).await {
        debug!(path = %path.display(), error = %err, "failed to remove scratch file");
    }
}
