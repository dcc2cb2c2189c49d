use redis::RedisError;
use serde_json::json;
use thiserror::Error;

use crate::partition::{NumberKind, PartitionKey, ProductId, TenantId};

/// Faults raised by a pool store. Propagated to the caller as-is.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("pool store lock poisoned")]
    Poisoned,

    #[error("commit acknowledged by {acknowledged} of {expected} replicas")]
    Durability { expected: usize, acknowledged: usize },

    #[error("corrupt record {value} in {partition}: {reason}")]
    Corrupt {
        partition: String,
        value: String,
        reason: String,
    },
}

/// Domain errors surfaced by the allocator and the value objects.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no {pool} numbers available for tenant {tenant_id}, product {product_id} ({environment})")]
    NoNumbersAvailable {
        tenant_id: TenantId,
        product_id: ProductId,
        environment: String,
        pool: String,
    },

    #[error("{pool} number {value} has already been assigned")]
    AlreadyAssigned { pool: String, value: String },

    #[error("{pool} number {value} is not in the pool")]
    NotFound { pool: String, value: String },

    #[error("record {value} belongs to the {actual} pool, expected {expected}")]
    KindMismatch {
        value: String,
        expected: NumberKind,
        actual: NumberKind,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PoolError {
    pub fn exhausted(partition: &PartitionKey) -> Self {
        PoolError::NoNumbersAvailable {
            tenant_id: partition.tenant_id(),
            product_id: partition.product_id(),
            environment: partition.environment().to_string(),
            pool: partition.kind().pool_name(),
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            PoolError::NoNumbersAvailable { .. } => "number.pool.exhausted",
            PoolError::AlreadyAssigned { .. } => "number.already.assigned",
            PoolError::NotFound { .. } => "number.not.found",
            PoolError::KindMismatch { .. } => "number.kind.mismatch",
            PoolError::Store(_) => "number.pool.store.failure",
        }
    }

    /// HTTP-style status for whoever renders the error.
    pub fn status(&self) -> u16 {
        match self {
            PoolError::NoNumbersAvailable { .. } | PoolError::AlreadyAssigned { .. } => 409,
            PoolError::NotFound { .. } => 404,
            PoolError::KindMismatch { .. } => 400,
            PoolError::Store(_) => 500,
        }
    }

    /// Structured context for operators.
    pub fn data(&self) -> serde_json::Value {
        match self {
            PoolError::NoNumbersAvailable {
                tenant_id,
                product_id,
                environment,
                pool,
            } => json!({
                "tenantId": tenant_id,
                "productId": product_id,
                "environment": environment,
                "pool": pool,
            }),
            PoolError::AlreadyAssigned { pool, value } | PoolError::NotFound { pool, value } => {
                json!({ "pool": pool, "number": value })
            }
            PoolError::KindMismatch {
                value,
                expected,
                actual,
            } => json!({
                "number": value,
                "expected": expected.pool_name(),
                "actual": actual.pool_name(),
            }),
            PoolError::Store(_) => json!({}),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, PoolError::NoNumbersAvailable { .. })
    }
}
