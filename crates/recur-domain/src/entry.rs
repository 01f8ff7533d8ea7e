//! Materialized ledger entries produced from recurrence rules.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Insertion payload for one due date. The store assigns the id and creation time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewEntry {
    pub owner_id: Uuid,
    pub category_id: Uuid,
    pub amount: Decimal,
    pub description: String,
    pub date: NaiveDate,
}

/// A persisted ledger entry. Once created it belongs to the ledger store and
/// outlives the rule it was materialized from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConcreteEntry {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub category_id: Uuid,
    pub amount: Decimal,
    pub description: String,
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl ConcreteEntry {
    pub fn from_new(entry: NewEntry, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: entry.owner_id,
            category_id: entry.category_id,
            amount: entry.amount,
            description: entry.description,
            date: entry.date,
            created_at,
        }
    }
}
