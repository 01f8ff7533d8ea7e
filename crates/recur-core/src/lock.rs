//! Single-flight coordination over the store's advisory locks.

use std::{future::Future, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use tracing::{debug, warn};

use crate::{storage::bounded, CoreError, RecurrenceStore, StoreError};

/// Lock key reserved for the recurring-entry materialization job.
pub const DEFAULT_LOCK_KEY: i64 = 7_301_946_205;

const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs work under a storage-backed lock so only one instance at a time executes it.
pub struct SingleFlight<S: ?Sized> {
    store: Arc<S>,
    operation_timeout: Duration,
}

impl<S: RecurrenceStore + ?Sized> SingleFlight<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Attempts the lock without waiting. `Ok(false)` is ordinary contention.
    ///
    /// When the attempt times out the store may still have granted the lock, so a
    /// release is issued before the error is returned.
    pub async fn acquire(&self, key: i64) -> Result<bool, CoreError> {
        let attempt = bounded(
            "try_acquire_lock",
            self.operation_timeout,
            self.store.try_acquire_lock(key),
        )
        .await;
        match attempt {
            Ok(acquired) => Ok(acquired),
            Err(source @ StoreError::Timeout { .. }) => {
                if let Err(err) = self.release(key).await {
                    warn!(lock_key = key, error = %err, "failed to release lock after timed-out acquire");
                }
                Err(CoreError::Lock { key, source })
            }
            Err(source) => Err(CoreError::Lock { key, source }),
        }
    }

    pub async fn release(&self, key: i64) -> Result<(), CoreError> {
        bounded(
            "release_lock",
            self.operation_timeout,
            self.store.release_lock(key),
        )
        .await
        .map_err(|source| CoreError::Lock { key, source })
    }

    /// Runs `work` while holding `key`.
    ///
    /// Returns `Ok(None)` without running `work` when another holder owns the lock.
    /// Once acquired, the lock is released after `work` finishes whatever its
    /// outcome; a panic inside `work` is re-raised after the release.
    pub async fn run_exclusive<F, T>(&self, key: i64, work: F) -> Result<Option<T>, CoreError>
    where
        F: Future<Output = T>,
    {
        if !self.acquire(key).await? {
            debug!(lock_key = key, "lock held by another instance; skipping run");
            return Ok(None);
        }

        let outcome = AssertUnwindSafe(work).catch_unwind().await;

        if let Err(err) = self.release(key).await {
            warn!(lock_key = key, error = %err, "failed to release advisory lock");
        }

        match outcome {
            Ok(value) => Ok(Some(value)),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}
