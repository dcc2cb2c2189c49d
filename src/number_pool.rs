use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::metrics::PoolMetrics;
use crate::number_assembler::NumberAssembler;
use crate::number_record::{LoadOutcome, NumberRecord, ReleaseOutcome, ValueClaim};
use crate::partition::PartitionKey;
use crate::pool_store::{ClaimAttempt, PoolStore};

/// Allocates pre-generated numbers from a shared pool store.
///
/// Every mutation is delegated to one atomic store primitive; the pool adds
/// input hygiene, the bounded claim retry, logging and metrics. It holds no
/// pool state of its own, so any number of instances across processes can
/// share one store.
#[derive(Clone)]
pub struct NumberPool {
    store: Arc<dyn PoolStore>,
    config: PoolConfig,
    metrics: Option<PoolMetrics>,
}

impl NumberPool {
    pub fn new(store: Arc<dyn PoolStore>, config: PoolConfig) -> Self {
        NumberPool {
            store,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: PoolMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn record(&self, select: impl Fn(&PoolMetrics) -> &prometheus::IntCounterVec, partition: &PartitionKey, by: usize) {
        if let Some(metrics) = &self.metrics {
            PoolMetrics::inc(select(metrics), partition, by as u64);
        }
    }

    /// Loads the kind's default batch. Re-seeding only reports duplicates.
    #[instrument(skip(self), fields(partition = %partition))]
    pub async fn seed(&self, partition: &PartitionKey) -> Result<LoadOutcome, PoolError> {
        let Some(rule) = self.config.seed_rule(partition.kind()) else {
            debug!("no default batch for this kind");
            return Ok(LoadOutcome::default());
        };
        let values = NumberAssembler::new().assemble_batch(&rule);
        self.load_batch(partition, values).await
    }

    /// Adds unassigned records for new values. Duplicates and blank values
    /// are reported in the outcome and never fail the batch.
    #[instrument(skip(self, values), fields(partition = %partition))]
    pub async fn load_batch<I, V>(&self, partition: &PartitionKey, values: I) -> Result<LoadOutcome, PoolError>
    where
        I: IntoIterator<Item = V>,
        V: AsRef<str>,
    {
        let mut rejected = Vec::new();
        let mut accepted = Vec::new();
        for value in values {
            let trimmed = value.as_ref().trim();
            if trimmed.is_empty() {
                rejected.push(value.as_ref().to_string());
            } else {
                accepted.push(trimmed.to_string());
            }
        }

        let mut outcome = self.store.insert_batch(partition, &accepted).await?;
        outcome.rejected = rejected;

        self.record(|m| &m.loaded, partition, outcome.added.len());
        self.record(|m| &m.duplicates, partition, outcome.duplicates.len());
        info!(
            added = outcome.added.len(),
            duplicates = outcome.duplicates.len(),
            rejected = outcome.rejected.len(),
            "loaded numbers"
        );
        Ok(outcome)
    }

    /// Claims the oldest unassigned number, or `None` when the pool is empty.
    #[instrument(skip(self), fields(partition = %partition))]
    pub async fn consume_one(&self, partition: &PartitionKey) -> Result<Option<String>, PoolError> {
        for attempt in 1..=self.config.claim_retries.max(1) {
            match self.store.claim_first(partition, Utc::now()).await? {
                ClaimAttempt::Claimed(value) => {
                    self.record(|m| &m.consumed, partition, 1);
                    debug!(%value, attempt, "claimed number");
                    return Ok(Some(value));
                }
                ClaimAttempt::Empty => {
                    self.record(|m| &m.exhausted, partition, 1);
                    warn!("number pool exhausted");
                    return Ok(None);
                }
                ClaimAttempt::Contended => {
                    self.record(|m| &m.claim_contention, partition, 1);
                    debug!(attempt, "lost claim race, retrying");
                }
            }
        }
        self.record(|m| &m.exhausted, partition, 1);
        warn!(retries = self.config.claim_retries, "gave up claiming after repeated contention");
        Ok(None)
    }

    /// Claims a number and makes the claim durable before returning it.
    /// When the commit fails the number goes back to the pool.
    pub async fn consume_and_commit(&self, partition: &PartitionKey) -> Result<String, PoolError> {
        let value = self
            .consume_one(partition)
            .await?
            .ok_or_else(|| PoolError::exhausted(partition))?;
        self.commit_claim(partition, &value).await?;
        Ok(value)
    }

    /// Claims the named number if it is still unassigned and commits the
    /// claim. Returns the claim time.
    #[instrument(skip(self), fields(partition = %partition))]
    pub async fn claim_value(&self, partition: &PartitionKey, value: &str) -> Result<DateTime<Utc>, PoolError> {
        let value = value.trim();
        let consumed_at = Utc::now();
        match self.store.claim_value(partition, value, consumed_at).await? {
            ValueClaim::Claimed => {
                self.record(|m| &m.consumed, partition, 1);
                debug!(value, "claimed named number");
            }
            ValueClaim::AlreadyAssigned => {
                return Err(PoolError::AlreadyAssigned {
                    pool: partition.kind().pool_name(),
                    value: value.to_string(),
                })
            }
            ValueClaim::NotFound => {
                return Err(PoolError::NotFound {
                    pool: partition.kind().pool_name(),
                    value: value.to_string(),
                })
            }
        }
        self.commit_claim(partition, value).await?;
        Ok(consumed_at)
    }

    async fn commit_claim(&self, partition: &PartitionKey, value: &str) -> Result<(), PoolError> {
        let Err(error) = self.store.commit().await else {
            return Ok(());
        };
        match self.store.release(partition, value).await {
            Ok(_) => warn!(value, %error, "commit failed, claim returned to the pool"),
            Err(release_error) => warn!(value, %error, %release_error, "commit failed and the claim is still held"),
        }
        Err(error.into())
    }

    /// Returns a number to the pool. Releasing an unassigned or unknown
    /// value changes nothing.
    #[instrument(skip(self), fields(partition = %partition))]
    pub async fn release(&self, partition: &PartitionKey, value: &str) -> Result<ReleaseOutcome, PoolError> {
        let outcome = self.store.release(partition, value.trim()).await?;
        match outcome {
            ReleaseOutcome::Released => {
                self.record(|m| &m.released, partition, 1);
                debug!(value, "released number");
            }
            ReleaseOutcome::AlreadyAvailable => debug!(value, "number was not assigned"),
            ReleaseOutcome::NotFound => warn!(value, "released a number this pool does not hold"),
        }
        Ok(outcome)
    }

    /// A failed commit leaves the release applied; the error only says it
    /// may not have reached the replicas.
    pub async fn release_and_commit(&self, partition: &PartitionKey, value: &str) -> Result<ReleaseOutcome, PoolError> {
        let outcome = self.release(partition, value).await?;
        self.store.commit().await?;
        Ok(outcome)
    }

    /// Deletes the named numbers that are unassigned and returns those
    /// actually removed. Assigned numbers stay.
    #[instrument(skip(self, values), fields(partition = %partition))]
    pub async fn delete<I, V>(&self, partition: &PartitionKey, values: I) -> Result<Vec<String>, PoolError>
    where
        I: IntoIterator<Item = V>,
        V: AsRef<str>,
    {
        let values: Vec<String> = values
            .into_iter()
            .map(|v| v.as_ref().trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        let deleted = self.store.delete_unassigned(partition, &values).await?;
        self.record(|m| &m.deleted, partition, deleted.len());
        info!(
            requested = values.len(),
            deleted = deleted.len(),
            "deleted numbers"
        );
        Ok(deleted)
    }

    /// Removes every number in the partition, assigned or not. Not safe to
    /// run while the partition is issuing numbers.
    #[instrument(skip(self), fields(partition = %partition))]
    pub async fn purge(&self, partition: &PartitionKey) -> Result<usize, PoolError> {
        let removed = self.store.purge(partition).await?;
        self.store.commit().await?;
        self.record(|m| &m.purged, partition, removed);
        warn!(removed, "purged number pool");
        Ok(removed)
    }

    pub async fn get(&self, partition: &PartitionKey, value: &str) -> Result<Option<NumberRecord>, PoolError> {
        Ok(self.store.get(partition, value.trim()).await?)
    }

    pub async fn list_available(&self, partition: &PartitionKey) -> Result<Vec<String>, PoolError> {
        Ok(self.store.list_available(partition).await?)
    }

    pub async fn count_available(&self, partition: &PartitionKey) -> Result<usize, PoolError> {
        Ok(self.store.count_available(partition).await?)
    }

    pub async fn list_all(&self, partition: &PartitionKey) -> Result<Vec<String>, PoolError> {
        Ok(self.store.list_all(partition).await?)
    }
}
