use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::error::StoreError;
use crate::number_record::{Consumption, LoadOutcome, NumberRecord, ReleaseOutcome, ValueClaim};
use crate::partition::PartitionKey;

/// Outcome of a single claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimAttempt {
    Claimed(String),
    /// No unassigned record in the partition.
    Empty,
    /// The selected record was claimed by someone else first.
    Contended,
}

/// Durable storage of number records. Each method is atomic with respect to
/// every other caller of the same store, including callers in other processes
/// when the backend is shared.
#[async_trait]
pub trait PoolStore: Send + Sync {
    /// Inserts unassigned records for values not yet in the partition.
    /// Values must already be trimmed and non-blank.
    async fn insert_batch(&self, partition: &PartitionKey, values: &[String]) -> Result<LoadOutcome, StoreError>;

    /// Claims the lowest-sequence unassigned record as one conditional transition.
    async fn claim_first(
        &self,
        partition: &PartitionKey,
        consumed_at: DateTime<Utc>,
    ) -> Result<ClaimAttempt, StoreError>;

    /// Claims the named value only if it is currently unassigned.
    async fn claim_value(
        &self,
        partition: &PartitionKey,
        value: &str,
        consumed_at: DateTime<Utc>,
    ) -> Result<ValueClaim, StoreError>;

    async fn release(&self, partition: &PartitionKey, value: &str) -> Result<ReleaseOutcome, StoreError>;

    /// Removes the named records that are unassigned, returning those removed.
    async fn delete_unassigned(&self, partition: &PartitionKey, values: &[String]) -> Result<Vec<String>, StoreError>;

    /// Removes every record in the partition, returning how many were removed.
    async fn purge(&self, partition: &PartitionKey) -> Result<usize, StoreError>;

    async fn get(&self, partition: &PartitionKey, value: &str) -> Result<Option<NumberRecord>, StoreError>;

    async fn list_available(&self, partition: &PartitionKey) -> Result<Vec<String>, StoreError>;

    async fn count_available(&self, partition: &PartitionKey) -> Result<usize, StoreError>;

    async fn list_all(&self, partition: &PartitionKey) -> Result<Vec<String>, StoreError>;

    /// Blocks until prior writes are durable.
    async fn commit(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct PartitionRows {
    next_sequence: u64,
    by_sequence: BTreeMap<u64, NumberRecord>,
    index: HashMap<String, u64>,
}

impl PartitionRows {
    fn record_mut(&mut self, value: &str) -> Option<&mut NumberRecord> {
        let sequence = self.index.get(value)?;
        self.by_sequence.get_mut(sequence)
    }
}

/// Single-process store. Shares the claim protocol of the Redis store but
/// only serializes callers that share this instance.
#[derive(Debug, Default)]
pub struct InMemoryPoolStore {
    partitions: RwLock<HashMap<PartitionKey, PartitionRows>>,
}

impl InMemoryPoolStore {
    pub fn new() -> Self {
        InMemoryPoolStore {
            partitions: RwLock::new(HashMap::new()),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&HashMap<PartitionKey, PartitionRows>) -> T) -> Result<T, StoreError> {
        let partitions = self.partitions.read().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&partitions))
    }

    fn write<T>(&self, f: impl FnOnce(&mut HashMap<PartitionKey, PartitionRows>) -> T) -> Result<T, StoreError> {
        let mut partitions = self.partitions.write().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&mut partitions))
    }
}

#[async_trait]
impl PoolStore for InMemoryPoolStore {
    async fn insert_batch(&self, partition: &PartitionKey, values: &[String]) -> Result<LoadOutcome, StoreError> {
        self.write(|partitions| {
            let rows = partitions.entry(*partition).or_default();
            let mut outcome = LoadOutcome::default();
            for value in values {
                if rows.index.contains_key(value) {
                    outcome.duplicates.push(value.clone());
                    continue;
                }
                rows.next_sequence += 1;
                let sequence = rows.next_sequence;
                rows.index.insert(value.clone(), sequence);
                rows.by_sequence
                    .insert(sequence, NumberRecord::new(*partition, value.clone(), sequence));
                outcome.added.push(value.clone());
            }
            outcome
        })
    }

    async fn claim_first(
        &self,
        partition: &PartitionKey,
        consumed_at: DateTime<Utc>,
    ) -> Result<ClaimAttempt, StoreError> {
        // Select under the read lock, then flip only if the candidate is still
        // unassigned: a compare-and-swap on the record's state.
        let candidate = self.read(|partitions| {
            partitions.get(partition).and_then(|rows| {
                rows.by_sequence
                    .values()
                    .find(|record| !record.is_assigned())
                    .map(|record| record.value.clone())
            })
        })?;
        let Some(candidate) = candidate else {
            return Ok(ClaimAttempt::Empty);
        };

        self.write(|partitions| {
            let record = partitions
                .get_mut(partition)
                .and_then(|rows| rows.record_mut(&candidate));
            match record {
                Some(record) if !record.is_assigned() => {
                    record.consumption = Some(Consumption { consumed_at });
                    ClaimAttempt::Claimed(candidate)
                }
                _ => ClaimAttempt::Contended,
            }
        })
    }

    async fn claim_value(
        &self,
        partition: &PartitionKey,
        value: &str,
        consumed_at: DateTime<Utc>,
    ) -> Result<ValueClaim, StoreError> {
        self.write(|partitions| {
            match partitions
                .get_mut(partition)
                .and_then(|rows| rows.record_mut(value))
            {
                None => ValueClaim::NotFound,
                Some(record) if record.is_assigned() => ValueClaim::AlreadyAssigned,
                Some(record) => {
                    record.consumption = Some(Consumption { consumed_at });
                    ValueClaim::Claimed
                }
            }
        })
    }

    async fn release(&self, partition: &PartitionKey, value: &str) -> Result<ReleaseOutcome, StoreError> {
        self.write(|partitions| {
            match partitions
                .get_mut(partition)
                .and_then(|rows| rows.record_mut(value))
            {
                None => ReleaseOutcome::NotFound,
                Some(record) if !record.is_assigned() => ReleaseOutcome::AlreadyAvailable,
                Some(record) => {
                    record.consumption = None;
                    ReleaseOutcome::Released
                }
            }
        })
    }

    async fn delete_unassigned(&self, partition: &PartitionKey, values: &[String]) -> Result<Vec<String>, StoreError> {
        self.write(|partitions| {
            let Some(rows) = partitions.get_mut(partition) else {
                return Vec::new();
            };
            let mut deleted = Vec::new();
            for value in values {
                let Some(&sequence) = rows.index.get(value) else {
                    continue;
                };
                let assigned = rows
                    .by_sequence
                    .get(&sequence)
                    .map_or(true, NumberRecord::is_assigned);
                if assigned {
                    continue;
                }
                rows.index.remove(value);
                rows.by_sequence.remove(&sequence);
                deleted.push(value.clone());
            }
            deleted
        })
    }

    async fn purge(&self, partition: &PartitionKey) -> Result<usize, StoreError> {
        self.write(|partitions| {
            partitions
                .remove(partition)
                .map_or(0, |rows| rows.by_sequence.len())
        })
    }

    async fn get(&self, partition: &PartitionKey, value: &str) -> Result<Option<NumberRecord>, StoreError> {
        self.read(|partitions| {
            let rows = partitions.get(partition)?;
            let sequence = rows.index.get(value)?;
            rows.by_sequence.get(sequence).cloned()
        })
    }

    async fn list_available(&self, partition: &PartitionKey) -> Result<Vec<String>, StoreError> {
        self.read(|partitions| {
            partitions.get(partition).map_or_else(Vec::new, |rows| {
                rows.by_sequence
                    .values()
                    .filter(|record| !record.is_assigned())
                    .map(|record| record.value.clone())
                    .collect()
            })
        })
    }

    async fn count_available(&self, partition: &PartitionKey) -> Result<usize, StoreError> {
        self.read(|partitions| {
            partitions.get(partition).map_or(0, |rows| {
                rows.by_sequence
                    .values()
                    .filter(|record| !record.is_assigned())
                    .count()
            })
        })
    }

    async fn list_all(&self, partition: &PartitionKey) -> Result<Vec<String>, StoreError> {
        self.read(|partitions| {
            partitions.get(partition).map_or_else(Vec::new, |rows| {
                rows.by_sequence
                    .values()
                    .map(|record| record.value.clone())
                    .collect()
            })
        })
    }

    async fn commit(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{DeploymentEnvironment, NumberKind, ProductContext, ProductId, TenantId};

    fn partition() -> PartitionKey {
        ProductContext::new(TenantId::new(), ProductId::new(), DeploymentEnvironment::Development)
            .partition(NumberKind::Policy)
    }

    fn values(items: &[&str]) -> Vec<String> {
        items.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_insert_batch_reports_duplicates_within_batch() {
        let store = InMemoryPoolStore::new();
        let partition = partition();

        let outcome = store
            .insert_batch(&partition, &values(&["A", "A", "B"]))
            .await
            .unwrap();

        assert_eq!(outcome.added, values(&["A", "B"]));
        assert_eq!(outcome.duplicates, values(&["A"]));
        assert_eq!(store.list_all(&partition).await.unwrap(), values(&["A", "B"]));
    }

    #[tokio::test]
    async fn test_claim_first_follows_insertion_order() {
        let store = InMemoryPoolStore::new();
        let partition = partition();
        store
            .insert_batch(&partition, &values(&["Z-9", "A-1"]))
            .await
            .unwrap();

        let now = Utc::now();
        assert_eq!(
            store.claim_first(&partition, now).await.unwrap(),
            ClaimAttempt::Claimed("Z-9".to_string())
        );
        assert_eq!(
            store.claim_first(&partition, now).await.unwrap(),
            ClaimAttempt::Claimed("A-1".to_string())
        );
        assert_eq!(store.claim_first(&partition, now).await.unwrap(), ClaimAttempt::Empty);

        let record = store.get(&partition, "Z-9").await.unwrap().unwrap();
        assert_eq!(record.consumed_at(), Some(now));
    }

    #[tokio::test]
    async fn test_partitions_are_isolated() {
        let store = InMemoryPoolStore::new();
        let first = partition();
        let second = partition();
        store.insert_batch(&first, &values(&["A"])).await.unwrap();

        assert_eq!(store.claim_first(&second, Utc::now()).await.unwrap(), ClaimAttempt::Empty);
        assert_eq!(store.count_available(&first).await.unwrap(), 1);
        assert_eq!(store.purge(&second).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_claim_value_is_conditional() {
        let store = InMemoryPoolStore::new();
        let partition = partition();
        store.insert_batch(&partition, &values(&["A", "B"])).await.unwrap();

        let now = Utc::now();
        assert_eq!(store.claim_value(&partition, "B", now).await.unwrap(), ValueClaim::Claimed);
        assert_eq!(
            store.claim_value(&partition, "B", now).await.unwrap(),
            ValueClaim::AlreadyAssigned
        );
        assert_eq!(store.claim_value(&partition, "Z", now).await.unwrap(), ValueClaim::NotFound);
        assert_eq!(store.list_available(&partition).await.unwrap(), values(&["A"]));
        assert_eq!(
            store.claim_first(&partition, now).await.unwrap(),
            ClaimAttempt::Claimed("A".to_string())
        );
    }

    #[tokio::test]
    async fn test_release_distinguishes_states() {
        let store = InMemoryPoolStore::new();
        let partition = partition();
        store.insert_batch(&partition, &values(&["A"])).await.unwrap();

        assert_eq!(store.release(&partition, "A").await.unwrap(), ReleaseOutcome::AlreadyAvailable);
        store.claim_first(&partition, Utc::now()).await.unwrap();
        assert_eq!(store.release(&partition, "A").await.unwrap(), ReleaseOutcome::Released);
        assert_eq!(store.release(&partition, "missing").await.unwrap(), ReleaseOutcome::NotFound);
    }
}
