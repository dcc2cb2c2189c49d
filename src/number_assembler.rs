use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use std::sync::LazyLock;

use crate::seed_rule::SeedRule;

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z0-9_]+)(?::(\d+))?\}").expect("token pattern compiles"));

/// Renders seed rule templates such as `{prefix}-{year}-{SEQ:4}`.
/// Unknown tokens are left in place.
pub struct NumberAssembler {
    issued_at: DateTime<Utc>,
}

impl NumberAssembler {
    pub fn new() -> Self {
        NumberAssembler::at(Utc::now())
    }

    /// Pins `{year}` to the given instant.
    pub fn at(issued_at: DateTime<Utc>) -> Self {
        NumberAssembler { issued_at }
    }

    pub fn assemble_number(&self, seed_rule: &SeedRule, sequence: u64) -> String {
        let year = self.issued_at.format("%Y").to_string();
        TOKEN
            .replace_all(&seed_rule.format, |caps: &Captures| {
                let width = caps
                    .get(2)
                    .and_then(|w| w.as_str().parse::<usize>().ok())
                    .unwrap_or(seed_rule.seq_length as usize);
                match &caps[1] {
                    "prefix" => seed_rule.prefix.clone(),
                    "year" => year.clone(),
                    "SEQ" => format!("{:0width$}", sequence, width = width),
                    _ => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Every value of the rule's batch, in sequence order.
    pub fn assemble_batch(&self, seed_rule: &SeedRule) -> Vec<String> {
        (0..seed_rule.count)
            .map(|offset| self.assemble_number(seed_rule, seed_rule.initial_seq + offset))
            .collect()
    }
}

impl Default for NumberAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn rule(format: &str) -> SeedRule {
        SeedRule {
            prefix: "TEST".to_string(),
            format: format.to_string(),
            seq_length: 4,
            initial_seq: 1,
            count: 3,
        }
    }

    #[test]
    fn test_assemble_number() {
        let assembler = NumberAssembler::at(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());

        let assembled_number = assembler.assemble_number(&rule("TEST-{year}-{SEQ:4}"), 123);

        assert_eq!(assembled_number, "TEST-2024-0123");
    }

    #[test]
    fn test_assemble_number_with_prefix_only() {
        let assembler = NumberAssembler::new();
        let mut seed_rule = rule("{prefix}-{SEQ}");
        seed_rule.prefix = "ORDER".to_string();
        seed_rule.seq_length = 6;

        assert_eq!(assembler.assemble_number(&seed_rule, 456), "ORDER-000456");
    }

    #[test]
    fn test_token_width_overrides_seq_length() {
        let assembler = NumberAssembler::new();
        assert_eq!(assembler.assemble_number(&rule("{SEQ:2}/{SEQ}"), 7), "07/0007");
    }

    #[test]
    fn test_unknown_tokens_are_kept() {
        let assembler = NumberAssembler::new();
        assert_eq!(assembler.assemble_number(&rule("{branch}-{SEQ}"), 9), "{branch}-0009");
    }

    #[test]
    fn test_assemble_batch() {
        let assembler = NumberAssembler::new();
        let mut seed_rule = rule("{prefix}{SEQ}");
        seed_rule.initial_seq = 1001;

        assert_eq!(
            assembler.assemble_batch(&seed_rule),
            vec!["TEST1001", "TEST1002", "TEST1003"]
        );
    }
}
