use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::number_record::{Consumption, LoadOutcome, NumberRecord, ReleaseOutcome, ValueClaim};
use crate::partition::PartitionKey;
use crate::pool_store::{ClaimAttempt, PoolStore};

// Every script receives the partition keys in this order:
// KEYS[1] records   hash   value -> record id
// KEYS[2] consumed  hash   value -> RFC 3339 claim time
// KEYS[3] all       zset   value -> sequence
// KEYS[4] available zset   value -> sequence
// KEYS[5] seq       string insertion counter

const INSERT_SCRIPT: &str = r"
local added = {}
local duplicates = {}
for i = 1, #ARGV, 2 do
  local value = ARGV[i]
  if redis.call('HSETNX', KEYS[1], value, ARGV[i + 1]) == 1 then
    local sequence = redis.call('INCR', KEYS[5])
    redis.call('ZADD', KEYS[3], sequence, value)
    redis.call('ZADD', KEYS[4], sequence, value)
    added[#added + 1] = value
  else
    duplicates[#duplicates + 1] = value
  end
end
return {added, duplicates}
";

const CLAIM_SCRIPT: &str = r"
local popped = redis.call('ZPOPMIN', KEYS[4])
if #popped == 0 then
  return false
end
redis.call('HSET', KEYS[2], popped[1], ARGV[1])
return popped[1]
";

const CLAIM_VALUE_SCRIPT: &str = r"
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 0 then
  return 'not-found'
end
if redis.call('HSETNX', KEYS[2], ARGV[1], ARGV[2]) == 0 then
  return 'already-assigned'
end
redis.call('ZREM', KEYS[4], ARGV[1])
return 'claimed'
";

const RELEASE_SCRIPT: &str = r"
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 0 then
  return 'not-found'
end
if redis.call('HDEL', KEYS[2], ARGV[1]) == 0 then
  return 'already-available'
end
redis.call('ZADD', KEYS[4], redis.call('ZSCORE', KEYS[3], ARGV[1]), ARGV[1])
return 'released'
";

const DELETE_SCRIPT: &str = r"
local deleted = {}
for i = 1, #ARGV do
  local value = ARGV[i]
  if redis.call('HEXISTS', KEYS[1], value) == 1 and redis.call('HEXISTS', KEYS[2], value) == 0 then
    redis.call('HDEL', KEYS[1], value)
    redis.call('ZREM', KEYS[3], value)
    redis.call('ZREM', KEYS[4], value)
    deleted[#deleted + 1] = value
  end
end
return deleted
";

const PURGE_SCRIPT: &str = r"
local removed = redis.call('HLEN', KEYS[1])
redis.call('DEL', KEYS[1], KEYS[2], KEYS[3], KEYS[4], KEYS[5])
return removed
";

/// Values sent per script call when loading large batches.
const INSERT_CHUNK: usize = 1_000;

struct PartitionKeys {
    records: String,
    consumed: String,
    all: String,
    available: String,
    seq: String,
}

impl PartitionKeys {
    fn new(partition: &PartitionKey) -> Self {
        // The hash tag keeps one partition on one cluster slot.
        let base = format!("numpool:{{{partition}}}");
        PartitionKeys {
            records: format!("{base}:records"),
            consumed: format!("{base}:consumed"),
            all: format!("{base}:all"),
            available: format!("{base}:available"),
            seq: format!("{base}:seq"),
        }
    }

    fn in_order(&self) -> [&str; 5] {
        [&self.records, &self.consumed, &self.all, &self.available, &self.seq]
    }
}

struct Scripts {
    insert: Script,
    claim: Script,
    claim_value: Script,
    release: Script,
    delete: Script,
    purge: Script,
}

/// Pool store shared by every process pointed at the same Redis. Each
/// mutation is one Lua script, so Redis is the only serialization point.
pub struct RedisPoolStore {
    connection: MultiplexedConnection,
    scripts: Scripts,
    commit_replicas: usize,
    commit_timeout: Duration,
}

impl RedisPoolStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        Ok(RedisPoolStore {
            connection,
            scripts: Scripts {
                insert: Script::new(INSERT_SCRIPT),
                claim: Script::new(CLAIM_SCRIPT),
                claim_value: Script::new(CLAIM_VALUE_SCRIPT),
                release: Script::new(RELEASE_SCRIPT),
                delete: Script::new(DELETE_SCRIPT),
                purge: Script::new(PURGE_SCRIPT),
            },
            commit_replicas: 0,
            commit_timeout: Duration::from_secs(1),
        })
    }

    /// Makes `commit` wait until `replicas` replicas acknowledged prior writes.
    pub fn with_commit_replicas(mut self, replicas: usize, timeout: Duration) -> Self {
        self.commit_replicas = replicas;
        self.commit_timeout = timeout;
        self
    }

    fn invocation<'a>(script: &'a Script, keys: &PartitionKeys) -> redis::ScriptInvocation<'a> {
        let mut invocation = script.prepare_invoke();
        for key in keys.in_order() {
            invocation.key(key);
        }
        invocation
    }

    fn corrupt(partition: &PartitionKey, value: &str, reason: impl ToString) -> StoreError {
        StoreError::Corrupt {
            partition: partition.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl PoolStore for RedisPoolStore {
    async fn insert_batch(&self, partition: &PartitionKey, values: &[String]) -> Result<LoadOutcome, StoreError> {
        let keys = PartitionKeys::new(partition);
        let mut conn = self.connection.clone();
        let mut outcome = LoadOutcome::default();
        for chunk in values.chunks(INSERT_CHUNK) {
            let mut invocation = Self::invocation(&self.scripts.insert, &keys);
            for value in chunk {
                invocation.arg(value).arg(Uuid::new_v4().to_string());
            }
            let (added, duplicates): (Vec<String>, Vec<String>) = invocation.invoke_async(&mut conn).await?;
            outcome.merge(LoadOutcome {
                added,
                duplicates,
                rejected: Vec::new(),
            });
        }
        Ok(outcome)
    }

    async fn claim_first(
        &self,
        partition: &PartitionKey,
        consumed_at: DateTime<Utc>,
    ) -> Result<ClaimAttempt, StoreError> {
        let keys = PartitionKeys::new(partition);
        let mut conn = self.connection.clone();
        let mut invocation = Self::invocation(&self.scripts.claim, &keys);
        invocation.arg(consumed_at.to_rfc3339());
        let claimed: Option<String> = invocation.invoke_async(&mut conn).await?;
        // The pop and the flag are one script, so a claim never loses a race here.
        Ok(claimed.map_or(ClaimAttempt::Empty, ClaimAttempt::Claimed))
    }

    async fn claim_value(
        &self,
        partition: &PartitionKey,
        value: &str,
        consumed_at: DateTime<Utc>,
    ) -> Result<ValueClaim, StoreError> {
        let keys = PartitionKeys::new(partition);
        let mut conn = self.connection.clone();
        let mut invocation = Self::invocation(&self.scripts.claim_value, &keys);
        invocation.arg(value).arg(consumed_at.to_rfc3339());
        let status: String = invocation.invoke_async(&mut conn).await?;
        match status.as_str() {
            "claimed" => Ok(ValueClaim::Claimed),
            "already-assigned" => Ok(ValueClaim::AlreadyAssigned),
            "not-found" => Ok(ValueClaim::NotFound),
            other => Err(Self::corrupt(partition, value, format!("unexpected claim status {other}"))),
        }
    }

    async fn release(&self, partition: &PartitionKey, value: &str) -> Result<ReleaseOutcome, StoreError> {
        let keys = PartitionKeys::new(partition);
        let mut conn = self.connection.clone();
        let mut invocation = Self::invocation(&self.scripts.release, &keys);
        invocation.arg(value);
        let status: String = invocation.invoke_async(&mut conn).await?;
        match status.as_str() {
            "released" => Ok(ReleaseOutcome::Released),
            "already-available" => Ok(ReleaseOutcome::AlreadyAvailable),
            "not-found" => Ok(ReleaseOutcome::NotFound),
            other => Err(Self::corrupt(partition, value, format!("unexpected release status {other}"))),
        }
    }

    async fn delete_unassigned(&self, partition: &PartitionKey, values: &[String]) -> Result<Vec<String>, StoreError> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let keys = PartitionKeys::new(partition);
        let mut conn = self.connection.clone();
        let mut invocation = Self::invocation(&self.scripts.delete, &keys);
        for value in values {
            invocation.arg(value);
        }
        Ok(invocation.invoke_async(&mut conn).await?)
    }

    async fn purge(&self, partition: &PartitionKey) -> Result<usize, StoreError> {
        let keys = PartitionKeys::new(partition);
        let mut conn = self.connection.clone();
        let removed: usize = Self::invocation(&self.scripts.purge, &keys)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn get(&self, partition: &PartitionKey, value: &str) -> Result<Option<NumberRecord>, StoreError> {
        let keys = PartitionKeys::new(partition);
        let mut conn = self.connection.clone();
        let (id, consumed_at, sequence): (Option<String>, Option<String>, Option<f64>) = redis::pipe()
            .atomic()
            .hget(&keys.records, value)
            .hget(&keys.consumed, value)
            .zscore(&keys.all, value)
            .query_async(&mut conn)
            .await?;

        let Some(id) = id else {
            return Ok(None);
        };
        let id = Uuid::parse_str(&id).map_err(|e| Self::corrupt(partition, value, e))?;
        let sequence = sequence.ok_or_else(|| Self::corrupt(partition, value, "missing sequence"))?;
        let consumption = consumed_at
            .map(|at| {
                DateTime::parse_from_rfc3339(&at)
                    .map(|at| Consumption {
                        consumed_at: at.with_timezone(&Utc),
                    })
                    .map_err(|e| Self::corrupt(partition, value, e))
            })
            .transpose()?;

        Ok(Some(NumberRecord {
            id,
            partition: *partition,
            value: value.to_string(),
            sequence: sequence as u64,
            consumption,
        }))
    }

    async fn list_available(&self, partition: &PartitionKey) -> Result<Vec<String>, StoreError> {
        let keys = PartitionKeys::new(partition);
        let mut conn = self.connection.clone();
        Ok(conn.zrange(&keys.available, 0, -1).await?)
    }

    async fn count_available(&self, partition: &PartitionKey) -> Result<usize, StoreError> {
        let keys = PartitionKeys::new(partition);
        let mut conn = self.connection.clone();
        Ok(conn.zcard(&keys.available).await?)
    }

    async fn list_all(&self, partition: &PartitionKey) -> Result<Vec<String>, StoreError> {
        let keys = PartitionKeys::new(partition);
        let mut conn = self.connection.clone();
        Ok(conn.zrange(&keys.all, 0, -1).await?)
    }

    async fn commit(&self) -> Result<(), StoreError> {
        if self.commit_replicas == 0 {
            return Ok(());
        }
        let mut conn = self.connection.clone();
        let acknowledged: usize = redis::cmd("WAIT")
            .arg(self.commit_replicas)
            .arg(self.commit_timeout.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        debug!(acknowledged, expected = self.commit_replicas, "Redis WAIT returned");
        if acknowledged < self.commit_replicas {
            return Err(StoreError::Durability {
                expected: self.commit_replicas,
                acknowledged,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{DeploymentEnvironment, NumberKind, ProductContext, ProductId, TenantId};

    fn redis_url() -> String {
        std::env::var("NUMBER_POOL_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string())
    }

    fn partition() -> PartitionKey {
        ProductContext::new(TenantId::new(), ProductId::new(), DeploymentEnvironment::Development)
            .partition(NumberKind::Policy)
    }

    fn values(items: &[&str]) -> Vec<String> {
        items.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_partition_keys_share_hash_tag() {
        let partition = partition();
        let keys = PartitionKeys::new(&partition);
        let tag = format!("{{{partition}}}");
        for key in keys.in_order() {
            assert!(key.contains(&tag), "{key} is missing {tag}");
        }
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_claim_release_and_delete_against_redis() -> Result<(), StoreError> {
        let store = RedisPoolStore::connect(&redis_url()).await?;
        let partition = partition();

        let outcome = store
            .insert_batch(&partition, &values(&["P-1001", "P-1002", "P-1001"]))
            .await?;
        assert_eq!(outcome.added, values(&["P-1001", "P-1002"]));
        assert_eq!(outcome.duplicates, values(&["P-1001"]));

        let now = Utc::now();
        assert_eq!(
            store.claim_first(&partition, now).await?,
            ClaimAttempt::Claimed("P-1001".to_string())
        );
        let record = store.get(&partition, "P-1001").await?.expect("record exists");
        assert!(record.is_assigned());
        assert_eq!(record.sequence, 1);

        assert_eq!(
            store.delete_unassigned(&partition, &values(&["P-1001", "P-1002"])).await?,
            values(&["P-1002"])
        );
        assert_eq!(store.claim_first(&partition, now).await?, ClaimAttempt::Empty);

        assert_eq!(store.release(&partition, "P-1001").await?, ReleaseOutcome::Released);
        assert_eq!(store.release(&partition, "P-1001").await?, ReleaseOutcome::AlreadyAvailable);
        assert_eq!(store.list_available(&partition).await?, values(&["P-1001"]));

        assert_eq!(store.purge(&partition).await?, 1);
        assert!(store.list_all(&partition).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_claim_value_against_redis() -> Result<(), StoreError> {
        let store = RedisPoolStore::connect(&redis_url()).await?;
        let partition = partition();
        store.insert_batch(&partition, &values(&["A", "B"])).await?;

        let now = Utc::now();
        assert_eq!(store.claim_value(&partition, "B", now).await?, ValueClaim::Claimed);
        assert_eq!(store.claim_value(&partition, "B", now).await?, ValueClaim::AlreadyAssigned);
        assert_eq!(store.claim_value(&partition, "Z", now).await?, ValueClaim::NotFound);
        assert_eq!(store.list_available(&partition).await?, values(&["A"]));

        store.purge(&partition).await?;
        Ok(())
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server without replicas"]
    async fn test_commit_reports_missing_replicas() -> Result<(), StoreError> {
        let store = RedisPoolStore::connect(&redis_url())
            .await?
            .with_commit_replicas(1, Duration::from_millis(50));

        let error = store.commit().await.unwrap_err();

        assert!(matches!(
            error,
            StoreError::Durability {
                expected: 1,
                acknowledged: 0
            }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_connection_error() {
        let result = RedisPoolStore::connect("redis://127.0.0.1:1234/").await;
        assert!(result.is_err());
    }
}
