//! Health Check Demo Application
//!
//! Probes every configured store once, then runs the probe loop for a few
//! seconds and prints the routing flags.
//!
//! Usage:
//!   cargo run --example health_check_demo
//!
//! Environment variables:
//!   CACHEGATE_STORE_PRIMARY_URL - Redis URL for the primary store (default: in-memory)
//!   CACHEGATE_ENV               - Active environment (default: production)

use cachegate_kv::{Cache, CacheConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("=== Store Health Check Demo ===");

    let mut config = CacheConfig::tiered_in_memory();
    config.apply_env_overrides(|name| std::env::var(name).ok());
    config.validate()?;

    let cache = Arc::new(Cache::from_config(&config).await?);

    info!("\n--- Single probe round ---");
    for result in cache.health_monitor().probe_all().await {
        info!(
            "{} ({}): {:?} in {}ms (http {})",
            result.store,
            result.role,
            result.status,
            result.response_time_ms,
            result.status.to_http_status_code()
        );
        if let Some(error) = &result.error {
            info!("  error: {}", error);
        }
    }

    info!("\n--- Probe loop ---");
    let shutdown = cache.start_maintenance();
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        info!("Routing flags: {:?}", cache.health_check());
    }
    shutdown.send(true)?;

    cache.shutdown(Duration::from_secs(1)).await;
    info!("=== Demo Complete ===");
    Ok(())
}
