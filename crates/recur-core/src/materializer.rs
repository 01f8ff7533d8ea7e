//! Turns due dates into persisted ledger entries and advances rule checkpoints.

use std::{sync::Arc, time::Duration};

use chrono::NaiveDate;
use tracing::{debug, info, warn};
use uuid::Uuid;

use recur_domain::{CheckpointPolicy, RecurrenceRule};

use crate::{schedule::rule_due_dates, storage::bounded, CoreError, RecurrenceStore};

const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// What happened to one rule during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOutcome {
    pub rule_id: Uuid,
    pub due: usize,
    pub created: usize,
    pub failed: usize,
    /// Checkpoint written this pass, if any.
    pub checkpoint: Option<NaiveDate>,
    pub checkpoint_failed: bool,
}

impl RuleOutcome {
    fn new(rule_id: Uuid, due: usize) -> Self {
        Self {
            rule_id,
            due,
            created: 0,
            failed: 0,
            checkpoint: None,
            checkpoint_failed: false,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.checkpoint_failed
    }
}

/// Counters for one materialization run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub reference_date: NaiveDate,
    /// Rules that had at least one due date.
    pub rules_processed: usize,
    pub entries_created: usize,
    pub entries_failed: usize,
    pub rules_with_failures: usize,
    /// Rows the store could not read.
    pub rules_skipped: usize,
    pub checkpoint_failures: usize,
}

impl RunSummary {
    pub fn new(reference_date: NaiveDate) -> Self {
        Self {
            reference_date,
            rules_processed: 0,
            entries_created: 0,
            entries_failed: 0,
            rules_with_failures: 0,
            rules_skipped: 0,
            checkpoint_failures: 0,
        }
    }

    fn record(&mut self, outcome: &RuleOutcome) {
        self.rules_processed += 1;
        self.entries_created += outcome.created;
        self.entries_failed += outcome.failed;
        if outcome.checkpoint_failed {
            self.checkpoint_failures += 1;
        }
        if outcome.has_failures() {
            self.rules_with_failures += 1;
        }
    }
}

/// Materializes every missed occurrence of every active rule.
pub struct Materializer<S: ?Sized> {
    store: Arc<S>,
    policy: CheckpointPolicy,
    operation_timeout: Duration,
}

impl<S: RecurrenceStore + ?Sized> Materializer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            policy: CheckpointPolicy::default(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    pub fn with_policy(mut self, policy: CheckpointPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Runs one pass as of `as_of`.
    ///
    /// Only a failed rule query is returned as an error; every per-rule failure is
    /// logged and counted in the summary instead.
    pub async fn process(&self, as_of: NaiveDate) -> Result<RunSummary, CoreError> {
        let scans = bounded(
            "query_active_rules",
            self.operation_timeout,
            self.store.query_active_rules(),
        )
        .await?;

        let mut summary = RunSummary::new(as_of);
        for scan in scans {
            let rule = match scan {
                Ok(rule) => rule,
                Err(err) => {
                    warn!(error = %err, "skipping unreadable recurrence rule");
                    summary.rules_skipped += 1;
                    continue;
                }
            };
            if !rule.is_active() {
                continue;
            }
            if let Some(outcome) = self.process_rule(&rule, as_of).await {
                summary.record(&outcome);
            }
        }

        info!(
            reference_date = %as_of,
            rules = summary.rules_processed,
            created = summary.entries_created,
            failed = summary.entries_failed,
            rules_with_failures = summary.rules_with_failures,
            skipped = summary.rules_skipped,
            "materialization run finished"
        );
        Ok(summary)
    }

    /// Returns `None` when the rule has nothing due.
    pub async fn process_rule(&self, rule: &RecurrenceRule, as_of: NaiveDate) -> Option<RuleOutcome> {
        let due = rule_due_dates(rule, as_of);
        if due.is_empty() {
            if rule.unit.is_none() {
                debug!(rule_id = %rule.id, "rule has an unrecognized unit; nothing due");
            }
            return None;
        }

        let mut outcome = RuleOutcome::new(rule.id, due.len());
        let mut checkpoint = None;

        for date in due {
            let insert = bounded(
                "insert_concrete_entry",
                self.operation_timeout,
                self.store.insert_concrete_entry(rule.entry_for(date)),
            )
            .await;
            match insert {
                Ok(entry) => {
                    outcome.created += 1;
                    checkpoint = Some(date);
                    debug!(rule_id = %rule.id, entry_id = %entry.id, date = %date, "entry materialized");
                }
                Err(err) => {
                    outcome.failed += 1;
                    warn!(rule_id = %rule.id, date = %date, error = %err, "failed to materialize entry");
                    match self.policy {
                        CheckpointPolicy::LatestAttempted => checkpoint = Some(date),
                        CheckpointPolicy::StopAtFirstFailure => break,
                    }
                }
            }
        }

        if let Some(date) = checkpoint {
            let update = bounded(
                "update_rule_checkpoint",
                self.operation_timeout,
                self.store.update_rule_checkpoint(rule.id, date),
            )
            .await;
            match update {
                Ok(()) => outcome.checkpoint = Some(date),
                Err(err) => {
                    outcome.checkpoint_failed = true;
                    warn!(rule_id = %rule.id, date = %date, error = %err, "failed to advance rule checkpoint");
                }
            }
        }

        info!(
            rule_id = %rule.id,
            due = outcome.due,
            created = outcome.created,
            failed = outcome.failed,
            checkpoint = ?outcome.checkpoint,
            "rule processed"
        );
        Some(outcome)
    }
}
