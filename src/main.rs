//! Operator tool for replenishing and retiring number pools in Redis.

use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use number_pool::{
    DeploymentEnvironment, NumberKind, NumberPool, PartitionKey, PoolConfig, ProductId, RedisPoolStore, TenantId,
};

#[derive(Parser, Debug)]
#[command(name = "number-pool-admin")]
#[command(about = "Seed, load, inspect and retire reference number pools")]
struct Cli {
    /// Overrides NUMBER_POOL_REDIS_URL
    #[arg(long)]
    redis_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct PartitionArgs {
    #[arg(long)]
    tenant: TenantId,
    #[arg(long)]
    product: ProductId,
    /// development, staging or production
    #[arg(long)]
    environment: DeploymentEnvironment,
    /// policy, invoice, claim, credit-note or identifier:<type>
    #[arg(long)]
    kind: NumberKind,
}

impl PartitionArgs {
    fn key(&self) -> PartitionKey {
        PartitionKey::new(self.tenant, self.product, self.environment, self.kind)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the kind's default batch
    Seed(PartitionArgs),
    /// Load numbers given as arguments or read from a file, one per line
    Load {
        #[command(flatten)]
        partition: PartitionArgs,
        #[arg(long)]
        file: Option<PathBuf>,
        numbers: Vec<String>,
    },
    /// Delete unassigned numbers
    Delete {
        #[command(flatten)]
        partition: PartitionArgs,
        #[arg(required = true)]
        numbers: Vec<String>,
    },
    /// Remove every number in the pool, assigned or not
    Purge {
        #[command(flatten)]
        partition: PartitionArgs,
        #[arg(long)]
        confirm: bool,
    },
    /// List unassigned numbers
    Available(PartitionArgs),
    /// Count unassigned numbers
    Count(PartitionArgs),
    /// List every number in insertion order
    List(PartitionArgs),
}

/// Requested numbers that were not deleted, compared after trimming.
fn skipped<'a>(requested: &'a [String], deleted: &[String]) -> Vec<&'a str> {
    requested
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty() && !deleted.iter().any(|d| d == n))
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("number_pool=info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = PoolConfig::from_env()?;
    if let Some(url) = cli.redis_url {
        config.redis_url = url;
    }

    let store = RedisPoolStore::connect(&config.redis_url)
        .await?
        .with_commit_replicas(config.commit_replicas, config.commit_timeout());
    let pool = NumberPool::new(Arc::new(store), config);

    let output = match cli.command {
        Command::Seed(partition) => serde_json::to_value(pool.seed(&partition.key()).await?)?,
        Command::Load {
            partition,
            file,
            mut numbers,
        } => {
            if let Some(file) = file {
                let contents = tokio::fs::read_to_string(&file).await?;
                numbers.extend(
                    contents
                        .lines()
                        .filter(|line| !line.trim().is_empty())
                        .map(str::to_string),
                );
            }
            serde_json::to_value(pool.load_batch(&partition.key(), numbers).await?)?
        }
        Command::Delete { partition, numbers } => {
            let deleted = pool.delete(&partition.key(), &numbers).await?;
            let skipped = skipped(&numbers, &deleted);
            json!({ "deleted": deleted, "skipped": skipped })
        }
        Command::Purge { partition, confirm } => {
            if !confirm {
                return Err("purge removes assigned numbers too; pass --confirm".into());
            }
            json!({ "purged": pool.purge(&partition.key()).await? })
        }
        Command::Available(partition) => json!(pool.list_available(&partition.key()).await?),
        Command::Count(partition) => json!({ "available": pool.count_available(&partition.key()).await? }),
        Command::List(partition) => json!(pool.list_all(&partition.key()).await?),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skipped_ignores_surrounding_whitespace() {
        let requested = vec![" P-1 ".to_string(), "P-2".to_string(), "  ".to_string()];
        let deleted = vec!["P-1".to_string()];

        assert_eq!(skipped(&requested, &deleted), vec!["P-2"]);
    }
}
