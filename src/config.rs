use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::partition::NumberKind;
use crate::seed_rule::SeedRule;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/";
pub const DEFAULT_CLAIM_RETRIES: u32 = 5;
pub const DEFAULT_COMMIT_TIMEOUT_MS: u64 = 1_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} is not a valid value: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("NUMBER_POOL_SEED_RULES is not valid JSON: {0}")]
    SeedRules(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub redis_url: String,
    /// Claim attempts per consume before giving up.
    pub claim_retries: u32,
    /// Replicas that must acknowledge a commit. Zero disables the wait.
    pub commit_replicas: usize,
    pub commit_timeout_ms: u64,
    /// Overrides keyed by pool name, e.g. `"invoice"`.
    #[serde(default)]
    pub seed_rules: HashMap<String, SeedRule>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            claim_retries: DEFAULT_CLAIM_RETRIES,
            commit_replicas: 0,
            commit_timeout_ms: DEFAULT_COMMIT_TIMEOUT_MS,
            seed_rules: HashMap::new(),
        }
    }
}

impl PoolConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through `lookup`, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = PoolConfig::default();

        if let Some(url) = lookup("NUMBER_POOL_REDIS_URL") {
            config.redis_url = url;
        }
        if let Some(retries) = lookup("NUMBER_POOL_CLAIM_RETRIES") {
            config.claim_retries = match retries.trim().parse::<u32>() {
                Ok(n) if n >= 1 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "NUMBER_POOL_CLAIM_RETRIES",
                        value: retries,
                    })
                }
            };
        }
        if let Some(replicas) = lookup("NUMBER_POOL_COMMIT_REPLICAS") {
            config.commit_replicas = replicas.trim().parse().map_err(|_| ConfigError::Invalid {
                name: "NUMBER_POOL_COMMIT_REPLICAS",
                value: replicas.clone(),
            })?;
        }
        if let Some(timeout) = lookup("NUMBER_POOL_COMMIT_TIMEOUT_MS") {
            config.commit_timeout_ms = timeout.trim().parse().map_err(|_| ConfigError::Invalid {
                name: "NUMBER_POOL_COMMIT_TIMEOUT_MS",
                value: timeout.clone(),
            })?;
        }
        if let Some(rules) = lookup("NUMBER_POOL_SEED_RULES") {
            let rules: HashMap<String, SeedRule> = serde_json::from_str(&rules)?;
            config.seed_rules = rules
                .into_iter()
                .map(|(name, rule)| match name.parse::<NumberKind>() {
                    Ok(kind) => Ok((kind.pool_name(), rule)),
                    Err(_) => Err(ConfigError::Invalid {
                        name: "NUMBER_POOL_SEED_RULES",
                        value: name,
                    }),
                })
                .collect::<Result<_, _>>()?;
        }

        Ok(config)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }

    /// Configured rule for a kind, else the built-in one.
    pub fn seed_rule(&self, kind: NumberKind) -> Option<SeedRule> {
        self.seed_rules
            .get(&kind.pool_name())
            .cloned()
            .or_else(|| SeedRule::default_for(kind))
    }
}
