pub mod config;
pub mod error;
pub mod metrics;
pub mod number_assembler;
pub mod number_pool;
pub mod number_record;
pub mod partition;
pub mod pool_store;
pub mod redis_pool_store;
pub mod reference_number;
pub mod reference_number_repository;
pub mod seed_rule;
pub mod unique_identifier;

pub use config::PoolConfig;
pub use error::{PoolError, StoreError};
pub use number_pool::NumberPool;
pub use number_record::{LoadOutcome, NumberRecord, ReleaseOutcome};
pub use partition::{DeploymentEnvironment, IdentifierType, NumberKind, PartitionKey, ProductContext, ProductId, TenantId};
pub use pool_store::{InMemoryPoolStore, PoolStore};
pub use redis_pool_store::RedisPoolStore;
pub use unique_identifier::{UniqueIdentifier, UniqueIdentifierService};
