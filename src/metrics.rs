use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

use crate::partition::PartitionKey;

const LABELS: [&str; 2] = ["kind", "environment"];

/// Allocation counters, labelled by pool kind and environment.
///
/// A long-running service that embeds the crate attaches these with
/// [`NumberPool::with_metrics`](crate::NumberPool::with_metrics) and serves
/// [`PoolMetrics::gather_text`] from its own scrape endpoint. The
/// `number-pool-admin` binary exits after one command, so it attaches none.
#[derive(Clone)]
pub struct PoolMetrics {
    registry: Registry,
    pub consumed: IntCounterVec,
    pub exhausted: IntCounterVec,
    pub released: IntCounterVec,
    pub loaded: IntCounterVec,
    pub duplicates: IntCounterVec,
    pub deleted: IntCounterVec,
    pub purged: IntCounterVec,
    pub claim_contention: IntCounterVec,
}

impl PoolMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let counter = |name: &str, help: &str| -> Result<IntCounterVec, prometheus::Error> {
            let counter = IntCounterVec::new(Opts::new(name, help).namespace("number_pool"), &LABELS)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        let consumed = counter("consumed_total", "Numbers claimed")?;
        let exhausted = counter("exhausted_total", "Consume calls that found no number")?;
        let released = counter("released_total", "Numbers returned to the pool")?;
        let loaded = counter("loaded_total", "Numbers added by seed or load")?;
        let duplicates = counter("duplicates_total", "Loaded values that already existed")?;
        let deleted = counter("deleted_total", "Unassigned numbers deleted")?;
        let purged = counter("purged_total", "Numbers removed by purge")?;
        let claim_contention = counter("claim_contention_total", "Claim attempts lost to another caller")?;

        Ok(PoolMetrics {
            registry,
            consumed,
            exhausted,
            released,
            loaded,
            duplicates,
            deleted,
            purged,
            claim_contention,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn inc(counter: &IntCounterVec, partition: &PartitionKey, by: u64) {
        if by == 0 {
            return;
        }
        let pool = partition.kind().pool_name();
        counter
            .with_label_values(&[pool.as_str(), partition.environment().as_str()])
            .inc_by(by);
    }

    /// Prometheus text exposition of every counter.
    pub fn gather_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{DeploymentEnvironment, NumberKind, ProductContext, ProductId, TenantId};

    #[test]
    fn test_counters_are_labelled_by_pool() {
        let metrics = PoolMetrics::new().unwrap();
        let partition = ProductContext::new(TenantId::new(), ProductId::new(), DeploymentEnvironment::Staging)
            .partition(NumberKind::CreditNote);

        PoolMetrics::inc(&metrics.consumed, &partition, 2);
        PoolMetrics::inc(&metrics.exhausted, &partition, 0);

        assert_eq!(
            metrics
                .consumed
                .with_label_values(&["credit-note", "staging"])
                .get(),
            2
        );
        let text = metrics.gather_text().unwrap();
        assert!(text.contains("number_pool_consumed_total{environment=\"staging\",kind=\"credit-note\"} 2"));
        assert!(!text.contains("number_pool_exhausted_total{"));
    }
}
