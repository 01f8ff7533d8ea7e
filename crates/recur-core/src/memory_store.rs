//! Process-local [`RecurrenceStore`] used by embedders and tests.

use std::{
    collections::HashSet,
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use recur_domain::{ConcreteEntry, NewEntry, RecurrenceRule};

use crate::{storage::RuleScan, RecurrenceStore, StoreError};

#[derive(Debug, Default)]
struct MemoryState {
    rules: Vec<RecurrenceRule>,
    entries: Vec<ConcreteEntry>,
    locks: HashSet<i64>,
}

/// Keeps rules, entries, and lock keys behind a single mutex. Locks only
/// coordinate callers sharing this instance.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a validated rule, replacing any rule with the same id.
    pub fn insert_rule(&self, rule: RecurrenceRule) -> Result<Uuid, StoreError> {
        rule.validate()?;
        let id = rule.id;
        let mut state = self.state()?;
        state.rules.retain(|existing| existing.id != id);
        state.rules.push(rule);
        Ok(id)
    }

    /// Deletes a rule. Entries already materialized from it are kept.
    pub fn remove_rule(&self, rule_id: Uuid) -> bool {
        let mut state = self.snapshot_guard();
        let before = state.rules.len();
        state.rules.retain(|rule| rule.id != rule_id);
        state.rules.len() != before
    }

    pub fn rule(&self, rule_id: Uuid) -> Option<RecurrenceRule> {
        self.snapshot_guard()
            .rules
            .iter()
            .find(|rule| rule.id == rule_id)
            .cloned()
    }

    pub fn rules(&self) -> Vec<RecurrenceRule> {
        self.snapshot_guard().rules.clone()
    }

    pub fn entries(&self) -> Vec<ConcreteEntry> {
        self.snapshot_guard().entries.clone()
    }

    pub fn is_locked(&self, key: i64) -> bool {
        self.snapshot_guard().locks.contains(&key)
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store mutex poisoned".into()))
    }

    fn snapshot_guard(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RecurrenceStore for InMemoryStore {
    async fn query_active_rules(&self) -> Result<Vec<RuleScan>, StoreError> {
        let state = self.state()?;
        Ok(state
            .rules
            .iter()
            .filter(|rule| rule.is_active())
            .cloned()
            .map(Ok)
            .collect())
    }

    async fn try_acquire_lock(&self, key: i64) -> Result<bool, StoreError> {
        Ok(self.state()?.locks.insert(key))
    }

    async fn release_lock(&self, key: i64) -> Result<(), StoreError> {
        self.state()?.locks.remove(&key);
        Ok(())
    }

    async fn insert_concrete_entry(&self, entry: NewEntry) -> Result<ConcreteEntry, StoreError> {
        let created = ConcreteEntry::from_new(entry, Utc::now());
        self.state()?.entries.push(created.clone());
        Ok(created)
    }

    async fn update_rule_checkpoint(
        &self,
        rule_id: Uuid,
        date: NaiveDate,
    ) -> Result<(), StoreError> {
        let mut state = self.state()?;
        let rule = state
            .rules
            .iter_mut()
            .find(|rule| rule.id == rule_id)
            .ok_or(StoreError::NotFound(rule_id))?;
        rule.last_occurrence = Some(date);
        Ok(())
    }
}
