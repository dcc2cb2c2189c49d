use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::partition::PartitionKey;

/// When a number was claimed. Present iff the record is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consumption {
    pub consumed_at: DateTime<Utc>,
}

/// One pre-generated value and its assignment state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberRecord {
    pub id: Uuid,
    pub partition: PartitionKey,
    pub value: String,
    /// Insertion order within the partition; claims go lowest first.
    pub sequence: u64,
    pub consumption: Option<Consumption>,
}

impl NumberRecord {
    pub fn new(partition: PartitionKey, value: String, sequence: u64) -> Self {
        NumberRecord {
            id: Uuid::new_v4(),
            partition,
            value,
            sequence,
            consumption: None,
        }
    }

    pub fn is_assigned(&self) -> bool {
        self.consumption.is_some()
    }

    pub fn consumed_at(&self) -> Option<DateTime<Utc>> {
        self.consumption.map(|c| c.consumed_at)
    }
}

/// Result of loading a batch: nothing is dropped without being reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOutcome {
    pub added: Vec<String>,
    /// Values already present in the partition, or repeated within the batch.
    pub duplicates: Vec<String>,
    /// Blank values, never inserted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<String>,
}

impl LoadOutcome {
    pub fn merge(&mut self, other: LoadOutcome) {
        self.added.extend(other.added);
        self.duplicates.extend(other.duplicates);
        self.rejected.extend(other.rejected);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseOutcome {
    Released,
    AlreadyAvailable,
    NotFound,
}

/// Result of claiming one named value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValueClaim {
    Claimed,
    AlreadyAssigned,
    NotFound,
}
