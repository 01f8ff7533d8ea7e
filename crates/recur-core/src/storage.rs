//! The persistence seam the scheduler consumes.

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use recur_domain::{ConcreteEntry, NewEntry, RecurrenceRule};

use crate::StoreError;

/// One row of an active-rule query. A row that cannot be read is reported in
/// place so the remaining rules are still processed.
pub type RuleScan = Result<RecurrenceRule, StoreError>;

/// Abstraction over the persistence collaborator that owns rules, entries, and
/// the advisory locks used to coordinate instances.
#[async_trait]
pub trait RecurrenceStore: Send + Sync {
    /// Returns every rule eligible for materialization.
    async fn query_active_rules(&self) -> Result<Vec<RuleScan>, StoreError>;

    /// Attempts a non-blocking advisory lock on `key`. `Ok(false)` means another
    /// holder currently owns it.
    async fn try_acquire_lock(&self, key: i64) -> Result<bool, StoreError>;

    /// Releases `key`. A lock held by another store instance must be left in
    /// place, since this is also called after an acquire whose outcome is unknown.
    async fn release_lock(&self, key: i64) -> Result<(), StoreError>;

    async fn insert_concrete_entry(&self, entry: NewEntry) -> Result<ConcreteEntry, StoreError>;

    /// Moves the rule's last-occurrence checkpoint. This is the only rule field
    /// the scheduler writes.
    async fn update_rule_checkpoint(&self, rule_id: Uuid, date: NaiveDate)
        -> Result<(), StoreError>;
}

#[async_trait]
impl<T: RecurrenceStore + ?Sized> RecurrenceStore for Arc<T> {
    async fn query_active_rules(&self) -> Result<Vec<RuleScan>, StoreError> {
        (**self).query_active_rules().await
    }

    async fn try_acquire_lock(&self, key: i64) -> Result<bool, StoreError> {
        (**self).try_acquire_lock(key).await
    }

    async fn release_lock(&self, key: i64) -> Result<(), StoreError> {
        (**self).release_lock(key).await
    }

    async fn insert_concrete_entry(&self, entry: NewEntry) -> Result<ConcreteEntry, StoreError> {
        (**self).insert_concrete_entry(entry).await
    }

    async fn update_rule_checkpoint(
        &self,
        rule_id: Uuid,
        date: NaiveDate,
    ) -> Result<(), StoreError> {
        (**self).update_rule_checkpoint(rule_id, date).await
    }
}

/// Runs one store call under `limit`, turning an elapsed deadline into
/// [`StoreError::Timeout`].
pub async fn bounded<T, F>(operation: &'static str, limit: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout {
            operation,
            after: limit,
        }),
    }
}
