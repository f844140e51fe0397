//! Tiered Cache Demo
//!
//! Walks through get-or-fetch, mirrored writes, rule-based invalidation and
//! the metrics output over three in-process tiers.
//!
//! Usage:
//!   RUST_LOG=cachegate_kv=debug cargo run --example tiered_demo

use cachegate_kv::{Cache, CacheConfig, CacheType, SubjectIds};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Portfolio {
    tokens: Vec<String>,
    total_usd: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cache = Cache::from_config(&CacheConfig::tiered_in_memory()).await?;

    // First call fetches, second is served from the cache
    for attempt in 1..=2 {
        let portfolio: Portfolio = cache
            .get_or_fetch(CacheType::Portfolio, "42", || async {
                info!("Fetching portfolio from upstream");
                Ok(Portfolio {
                    tokens: vec!["SOL".to_string(), "BONK".to_string()],
                    total_usd: 1_234.5,
                })
            })
            .await?;
        info!("Attempt {}: {:?}", attempt, portfolio);
    }

    cache
        .set(CacheType::WalletBalance, "Wallet42", &2_500_000u64, None)
        .await?;
    cache.set(CacheType::MainMenu, "42", &"main menu v1", None).await?;

    let subject = SubjectIds::user("42").with_wallet("Wallet42");
    let report = cache.invalidate("sell", &subject).await;
    info!("{}", report);

    let balance: Option<u64> = cache.get(CacheType::WalletBalance, "Wallet42").await;
    info!("Balance after sell: {:?}", balance);

    cache.shutdown(Duration::from_secs(1)).await;
    info!("{}", cache.stats());
    println!("{}", cache.metrics().render_prometheus()?);
    Ok(())
}
