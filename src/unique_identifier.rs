use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::error::PoolError;
use crate::number_pool::NumberPool;
use crate::number_record::{Consumption, LoadOutcome};
use crate::partition::{IdentifierType, NumberKind, PartitionKey, ProductContext};

/// A general-purpose identifier and, once claimed, when it was claimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueIdentifier {
    pub id: Uuid,
    pub partition: PartitionKey,
    pub identifier_type: IdentifierType,
    pub value: String,
    pub consumption: Option<Consumption>,
}

impl UniqueIdentifier {
    pub fn is_consumed(&self) -> bool {
        self.consumption.is_some()
    }

    pub fn consumed_at(&self) -> Option<DateTime<Utc>> {
        self.consumption.map(|c| c.consumed_at)
    }
}

/// Hands out identifiers of any [`IdentifierType`] from the same pools as
/// reference numbers. Identifiers are never released once consumed.
#[derive(Clone)]
pub struct UniqueIdentifierService {
    pool: NumberPool,
}

impl UniqueIdentifierService {
    pub fn new(pool: NumberPool) -> Self {
        UniqueIdentifierService { pool }
    }

    fn partition(identifier_type: IdentifierType, context: &ProductContext) -> PartitionKey {
        context.partition(NumberKind::Identifier(identifier_type))
    }

    #[instrument(skip(self))]
    pub async fn consume(&self, identifier_type: IdentifierType, context: &ProductContext) -> Result<String, PoolError> {
        self.pool
            .consume_and_commit(&Self::partition(identifier_type, context))
            .await
    }

    pub async fn load<I, V>(
        &self,
        identifier_type: IdentifierType,
        context: &ProductContext,
        values: I,
    ) -> Result<LoadOutcome, PoolError>
    where
        I: IntoIterator<Item = V>,
        V: AsRef<str>,
    {
        self.pool
            .load_batch(&Self::partition(identifier_type, context), values)
            .await
    }

    pub async fn get_available(
        &self,
        context: &ProductContext,
        identifier_type: IdentifierType,
    ) -> Result<Vec<String>, PoolError> {
        self.pool
            .list_available(&Self::partition(identifier_type, context))
            .await
    }

    pub async fn get(
        &self,
        identifier_type: IdentifierType,
        context: &ProductContext,
        value: &str,
    ) -> Result<Option<UniqueIdentifier>, PoolError> {
        let record = self
            .pool
            .get(&Self::partition(identifier_type, context), value)
            .await?;
        Ok(record.map(|record| UniqueIdentifier {
            id: record.id,
            partition: record.partition,
            identifier_type,
            value: record.value,
            consumption: record.consumption,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::partition::{DeploymentEnvironment, ProductId, TenantId};
    use crate::pool_store::InMemoryPoolStore;
    use std::sync::Arc;

    fn service() -> UniqueIdentifierService {
        UniqueIdentifierService::new(NumberPool::new(Arc::new(InMemoryPoolStore::new()), PoolConfig::default()))
    }

    fn context() -> ProductContext {
        ProductContext::new(TenantId::new(), ProductId::new(), DeploymentEnvironment::Development)
    }

    #[tokio::test]
    async fn test_consume_records_when() {
        let service = service();
        let context = context();
        service
            .load(IdentifierType::Quote, &context, ["Q-1", "Q-2"])
            .await
            .unwrap();

        let before = Utc::now();
        let value = service.consume(IdentifierType::Quote, &context).await.unwrap();
        assert_eq!(value, "Q-1");

        let identifier = service
            .get(IdentifierType::Quote, &context, &value)
            .await
            .unwrap()
            .unwrap();
        assert!(identifier.is_consumed());
        assert!(identifier.consumed_at().unwrap() >= before);
        assert_eq!(identifier.identifier_type, IdentifierType::Quote);

        let untouched = service
            .get(IdentifierType::Quote, &context, "Q-2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(untouched.consumption, None);
    }

    #[tokio::test]
    async fn test_identifier_types_do_not_share_values() {
        let service = service();
        let context = context();
        service
            .load(IdentifierType::Customer, &context, ["X-1"])
            .await
            .unwrap();
        let outcome = service
            .load(IdentifierType::Quote, &context, ["X-1"])
            .await
            .unwrap();
        assert_eq!(outcome.added, vec!["X-1"]);

        assert_eq!(service.consume(IdentifierType::Customer, &context).await.unwrap(), "X-1");
        assert_eq!(
            service.get_available(&context, IdentifierType::Quote).await.unwrap(),
            vec!["X-1"]
        );
        assert!(service
            .get_available(&context, IdentifierType::Customer)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_exhaustion_names_identifier_pool() {
        let service = service();
        let error = service
            .consume(IdentifierType::Organisation, &context())
            .await
            .unwrap_err();
        assert_eq!(error.data()["pool"], "identifier:organisation");
    }
}
