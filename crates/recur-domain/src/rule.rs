//! Domain models for recurrence rules and their calendar stepping.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{de::Deserializer, Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    common::clamped_date,
    entry::NewEntry,
    error::DomainError,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
/// Enumerates the cadences a rule can repeat on.
pub enum RecurrenceUnit {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RecurrenceUnit {
    /// Calculates the candidate that follows `anchor` for a rule that started on `start`.
    ///
    /// Monthly and yearly steps take the day (and for yearly, the month) from `start`
    /// rather than from `anchor`, so a day-31 rule clamped to Feb 28 returns to the 31st
    /// in March. Returns `None` once the step would leave the supported calendar range.
    pub fn step(self, anchor: NaiveDate, start: NaiveDate) -> Option<NaiveDate> {
        match self {
            RecurrenceUnit::Daily => anchor.checked_add_signed(Duration::days(1)),
            RecurrenceUnit::Weekly => anchor.checked_add_signed(Duration::weeks(1)),
            RecurrenceUnit::Monthly => {
                let (year, month) = if anchor.month() == 12 {
                    (anchor.year() + 1, 1)
                } else {
                    (anchor.year(), anchor.month() + 1)
                };
                clamped_date(year, month, start.day())
            }
            RecurrenceUnit::Yearly => clamped_date(anchor.year() + 1, start.month(), start.day()),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecurrenceUnit::Daily => "daily",
            RecurrenceUnit::Weekly => "weekly",
            RecurrenceUnit::Monthly => "monthly",
            RecurrenceUnit::Yearly => "yearly",
        }
    }
}

impl fmt::Display for RecurrenceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecurrenceUnit {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(RecurrenceUnit::Daily),
            "weekly" => Ok(RecurrenceUnit::Weekly),
            "monthly" => Ok(RecurrenceUnit::Monthly),
            "yearly" => Ok(RecurrenceUnit::Yearly),
            _ => Err(DomainError::UnknownUnit(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
/// Indicates whether a rule takes part in materialization runs.
pub enum RuleStatus {
    #[default]
    Active,
    Paused,
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RuleStatus::Active => "active",
            RuleStatus::Paused => "paused",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// A user-defined template for a periodically repeating ledger obligation.
pub struct RecurrenceRule {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub category_id: Uuid,
    pub amount: Decimal,
    pub description: String,
    pub start_date: NaiveDate,
    /// `None` when the stored unit is not one of the recognised cadences.
    #[serde(default, deserialize_with = "deserialize_unit")]
    pub unit: Option<RecurrenceUnit>,
    /// Most recent due date already materialized.
    #[serde(default)]
    pub last_occurrence: Option<NaiveDate>,
    #[serde(default)]
    pub status: RuleStatus,
    pub created_at: DateTime<Utc>,
}

impl RecurrenceRule {
    pub fn new(
        owner_id: Uuid,
        category_id: Uuid,
        amount: Decimal,
        description: impl Into<String>,
        start_date: NaiveDate,
        unit: RecurrenceUnit,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            category_id,
            amount,
            description: description.into(),
            start_date,
            unit: Some(unit),
            last_occurrence: None,
            status: RuleStatus::Active,
            created_at: Utc::now(),
        }
    }

    pub fn with_checkpoint(mut self, checkpoint: NaiveDate) -> Self {
        self.last_occurrence = Some(checkpoint);
        self
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, RuleStatus::Active)
    }

    /// Checks the invariants the store enforces when a rule is written.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.amount <= Decimal::ZERO {
            return Err(DomainError::NonPositiveAmount(self.amount));
        }
        if self.description.trim().is_empty() {
            return Err(DomainError::EmptyDescription);
        }
        if let Some(checkpoint) = self.last_occurrence {
            if checkpoint < self.start_date {
                return Err(DomainError::CheckpointBeforeStart {
                    checkpoint,
                    start: self.start_date,
                });
            }
        }
        Ok(())
    }

    /// Builds the insertion payload for the occurrence due on `date`.
    pub fn entry_for(&self, date: NaiveDate) -> NewEntry {
        NewEntry {
            owner_id: self.owner_id,
            category_id: self.category_id,
            amount: self.amount,
            description: self.description.clone(),
            date,
        }
    }
}

fn deserialize_unit<'de, D>(deserializer: D) -> Result<Option<RecurrenceUnit>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.and_then(|raw| raw.parse().ok()))
}
