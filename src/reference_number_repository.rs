use std::marker::PhantomData;

use crate::error::PoolError;
use crate::number_pool::NumberPool;
use crate::number_record::{LoadOutcome, ReleaseOutcome};
use crate::partition::{PartitionKey, ProductContext};
use crate::reference_number::{ClaimNumber, CreditNoteNumber, InvoiceNumber, PolicyNumber, ReferenceNumber};

/// Repository for one reference-number kind, addressed by product context.
pub struct ReferenceNumberRepository<R: ReferenceNumber> {
    pool: NumberPool,
    _kind: PhantomData<fn() -> R>,
}

pub type PolicyNumberRepository = ReferenceNumberRepository<PolicyNumber>;
pub type InvoiceNumberRepository = ReferenceNumberRepository<InvoiceNumber>;
pub type ClaimNumberRepository = ReferenceNumberRepository<ClaimNumber>;
pub type CreditNoteNumberRepository = ReferenceNumberRepository<CreditNoteNumber>;

impl<R: ReferenceNumber> Clone for ReferenceNumberRepository<R> {
    fn clone(&self) -> Self {
        ReferenceNumberRepository {
            pool: self.pool.clone(),
            _kind: PhantomData,
        }
    }
}

impl<R: ReferenceNumber> ReferenceNumberRepository<R> {
    pub fn new(pool: NumberPool) -> Self {
        ReferenceNumberRepository {
            pool,
            _kind: PhantomData,
        }
    }

    fn partition(context: &ProductContext) -> PartitionKey {
        context.partition(R::KIND)
    }

    pub async fn seed(&self, context: &ProductContext) -> Result<LoadOutcome, PoolError> {
        self.pool.seed(&Self::partition(context)).await
    }

    pub async fn load_for_product<I, V>(&self, context: &ProductContext, numbers: I) -> Result<LoadOutcome, PoolError>
    where
        I: IntoIterator<Item = V>,
        V: AsRef<str>,
    {
        self.pool.load_batch(&Self::partition(context), numbers).await
    }

    /// Claims a number without waiting for durability; `None` when exhausted.
    pub async fn consume_for_product(&self, context: &ProductContext) -> Result<Option<String>, PoolError> {
        self.pool.consume_one(&Self::partition(context)).await
    }

    /// Claims a durable number or fails with [`PoolError::NoNumbersAvailable`].
    pub async fn consume_and_save(&self, context: &ProductContext) -> Result<String, PoolError> {
        self.pool.consume_and_commit(&Self::partition(context)).await
    }

    pub async fn unconsume(&self, context: &ProductContext, number: &str) -> Result<ReleaseOutcome, PoolError> {
        self.pool.release(&Self::partition(context), number).await
    }

    pub async fn unconsume_and_save(&self, context: &ProductContext, number: &str) -> Result<ReleaseOutcome, PoolError> {
        self.pool.release_and_commit(&Self::partition(context), number).await
    }

    pub async fn delete_for_product<I, V>(&self, context: &ProductContext, numbers: I) -> Result<Vec<String>, PoolError>
    where
        I: IntoIterator<Item = V>,
        V: AsRef<str>,
    {
        self.pool.delete(&Self::partition(context), numbers).await
    }

    pub async fn purge_for_product(&self, context: &ProductContext) -> Result<usize, PoolError> {
        self.pool.purge(&Self::partition(context)).await
    }

    pub async fn get_available_for_product(&self, context: &ProductContext) -> Result<Vec<String>, PoolError> {
        self.pool.list_available(&Self::partition(context)).await
    }

    pub async fn get_available_reference_numbers_count(&self, context: &ProductContext) -> Result<usize, PoolError> {
        self.pool.count_available(&Self::partition(context)).await
    }

    pub async fn get_all_for_product(&self, context: &ProductContext) -> Result<Vec<String>, PoolError> {
        self.pool.list_all(&Self::partition(context)).await
    }

    /// Consumes `number` in the pool and then on the value object. Fails with
    /// [`PoolError::AlreadyAssigned`] if either already has it assigned.
    pub async fn consume_number(&self, number: &mut R) -> Result<String, PoolError> {
        if number.is_assigned() {
            return Err(PoolError::AlreadyAssigned {
                pool: R::KIND.pool_name(),
                value: number.number().to_string(),
            });
        }
        let consumed_at = self.pool.claim_value(&number.partition(), number.number()).await?;
        Ok(number.consume_at(consumed_at)?.to_string())
    }

    /// Returns `number` to the pool and marks the value object unassigned.
    pub async fn unconsume_number(&self, number: &mut R) -> Result<ReleaseOutcome, PoolError> {
        let outcome = self.pool.release_and_commit(&number.partition(), number.number()).await?;
        number.unconsume();
        Ok(outcome)
    }

    /// The stored number as a value object.
    pub async fn find(&self, context: &ProductContext, number: &str) -> Result<Option<R>, PoolError> {
        self.pool
            .get(&Self::partition(context), number)
            .await?
            .map(R::try_from)
            .transpose()
    }
}
