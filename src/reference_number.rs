//! Per-kind reference number value objects.
//!
//! A value object mirrors one number record for domain code. Its own
//! `consume`/`unconsume` only change the copy; the repository's
//! `consume_number`/`unconsume_number` apply the same transitions to the
//! pool store, which is what guarantees uniqueness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PoolError;
use crate::number_record::{Consumption, NumberRecord};
use crate::partition::{DeploymentEnvironment, NumberKind, PartitionKey, ProductContext, ProductId, TenantId};

pub trait ReferenceNumber: TryFrom<NumberRecord, Error = PoolError> {
    const KIND: NumberKind;

    fn number(&self) -> &str;

    fn is_assigned(&self) -> bool;

    fn partition(&self) -> PartitionKey;

    /// Marks the number assigned at `consumed_at`. Fails if it already is.
    fn consume_at(&mut self, consumed_at: DateTime<Utc>) -> Result<&str, PoolError>;

    /// Marks the number assigned and returns it. Fails if it already is.
    fn consume(&mut self) -> Result<&str, PoolError> {
        self.consume_at(Utc::now())
    }

    /// Marks the number unassigned. A no-op when it is not assigned.
    fn unconsume(&mut self);
}

macro_rules! define_reference_number {
    ($name:ident, $kind:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $name {
            id: Uuid,
            tenant_id: TenantId,
            product_id: ProductId,
            environment: DeploymentEnvironment,
            number: String,
            consumption: Option<Consumption>,
        }

        impl $name {
            /// An unassigned number that has not been stored yet.
            pub fn new(context: ProductContext, number: impl Into<String>) -> Self {
                $name {
                    id: Uuid::new_v4(),
                    tenant_id: context.tenant_id,
                    product_id: context.product_id,
                    environment: context.environment,
                    number: number.into(),
                    consumption: None,
                }
            }

            pub fn id(&self) -> Uuid {
                self.id
            }

            pub fn tenant_id(&self) -> TenantId {
                self.tenant_id
            }

            pub fn product_id(&self) -> ProductId {
                self.product_id
            }

            pub fn environment(&self) -> DeploymentEnvironment {
                self.environment
            }

            pub fn consumed_at(&self) -> Option<DateTime<Utc>> {
                self.consumption.map(|c| c.consumed_at)
            }
        }

        impl ReferenceNumber for $name {
            const KIND: NumberKind = $kind;

            fn number(&self) -> &str {
                &self.number
            }

            fn is_assigned(&self) -> bool {
                self.consumption.is_some()
            }

            fn partition(&self) -> PartitionKey {
                PartitionKey::new(self.tenant_id, self.product_id, self.environment, $kind)
            }

            fn consume_at(&mut self, consumed_at: DateTime<Utc>) -> Result<&str, PoolError> {
                if self.consumption.is_some() {
                    return Err(PoolError::AlreadyAssigned {
                        pool: $kind.pool_name(),
                        value: self.number.clone(),
                    });
                }
                self.consumption = Some(Consumption { consumed_at });
                Ok(&self.number)
            }

            fn unconsume(&mut self) {
                self.consumption = None;
            }
        }

        impl TryFrom<NumberRecord> for $name {
            type Error = PoolError;

            fn try_from(record: NumberRecord) -> Result<Self, Self::Error> {
                if record.partition.kind() != $kind {
                    return Err(PoolError::KindMismatch {
                        value: record.value,
                        expected: $kind,
                        actual: record.partition.kind(),
                    });
                }
                Ok($name {
                    id: record.id,
                    tenant_id: record.partition.tenant_id(),
                    product_id: record.partition.product_id(),
                    environment: record.partition.environment(),
                    number: record.value,
                    consumption: record.consumption,
                })
            }
        }
    };
}

define_reference_number!(PolicyNumber, NumberKind::Policy);
define_reference_number!(InvoiceNumber, NumberKind::Invoice);
define_reference_number!(ClaimNumber, NumberKind::Claim);
define_reference_number!(CreditNoteNumber, NumberKind::CreditNote);

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ProductContext {
        ProductContext::new(TenantId::new(), ProductId::new(), DeploymentEnvironment::Staging)
    }

    #[test]
    fn test_consume_then_unconsume() {
        let mut number = InvoiceNumber::new(context(), "INV-000042");

        assert_eq!(number.consume().unwrap(), "INV-000042");
        assert!(number.is_assigned());
        assert!(number.consumed_at().is_some());

        number.unconsume();
        assert!(!number.is_assigned());
        number.unconsume();
        assert!(!number.is_assigned());
    }

    #[test]
    fn test_double_consume_fails_for_every_kind() {
        let context = context();
        let mut policy = PolicyNumber::new(context, "P-1");
        let mut invoice = InvoiceNumber::new(context, "INV-1");
        let mut claim = ClaimNumber::new(context, "C-1");
        let mut credit_note = CreditNoteNumber::new(context, "CN-1");

        policy.consume().unwrap();
        invoice.consume().unwrap();
        claim.consume().unwrap();
        credit_note.consume().unwrap();

        assert!(matches!(policy.consume(), Err(PoolError::AlreadyAssigned { .. })));
        assert!(matches!(invoice.consume(), Err(PoolError::AlreadyAssigned { .. })));
        assert!(matches!(claim.consume(), Err(PoolError::AlreadyAssigned { .. })));
        let error = credit_note.consume().unwrap_err();
        assert_eq!(error.data()["pool"], "credit-note");
        assert_eq!(error.status(), 409);
    }

    #[test]
    fn test_try_from_record_checks_kind() {
        let context = context();
        let mut record = NumberRecord::new(context.partition(NumberKind::Claim), "C-7".to_string(), 7);
        record.consumption = Some(Consumption {
            consumed_at: Utc::now(),
        });

        let claim = ClaimNumber::try_from(record.clone()).unwrap();
        assert_eq!(claim.number(), "C-7");
        assert_eq!(claim.id(), record.id);
        assert!(claim.is_assigned());
        assert_eq!(claim.partition(), record.partition);

        let error = PolicyNumber::try_from(record).unwrap_err();
        assert!(matches!(
            error,
            PoolError::KindMismatch {
                expected: NumberKind::Policy,
                actual: NumberKind::Claim,
                ..
            }
        ));
    }
}
