use serde::{Deserialize, Serialize};

use crate::partition::NumberKind;

/// Describes the default batch a partition is seeded with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedRule {
    pub prefix: String,
    pub format: String,
    pub seq_length: u32,
    pub initial_seq: u64,
    pub count: u64,
}

impl SeedRule {
    /// Built-in batch for a kind. Unique identifiers have none.
    pub fn default_for(kind: NumberKind) -> Option<SeedRule> {
        let prefix = match kind {
            NumberKind::Policy => "P",
            NumberKind::Invoice => "INV",
            NumberKind::Claim => "C",
            NumberKind::CreditNote => "CN",
            NumberKind::Identifier(_) => return None,
        };
        Some(SeedRule {
            prefix: prefix.to_string(),
            format: "{prefix}-{SEQ}".to_string(),
            seq_length: 6,
            initial_seq: 1,
            count: 1_000,
        })
    }
}
