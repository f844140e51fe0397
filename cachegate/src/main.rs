use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cachegate::api::server::{ApiServer, ApiServerConfig};
use cachegate_kv::store::redis_store::redact;
use cachegate_kv::{Cache, CacheConfig, CacheType, ResolvedTtl, StoreBackend, TtlRegistry};

#[derive(Parser)]
#[command(name = "cachegate")]
#[command(about = "Tiered cache coordination service", long_about = None)]
struct Cli {
    /// YAML config file; built-in defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect the stores and serve /health, /metrics and /stats
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },

    /// Load and validate the configuration without connecting
    Validate,

    /// Probe every store once and report its health
    Probe,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "cachegate=info,cachegate_kv=info".into())
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = CacheConfig::load(cli.config.as_deref())
        .with_context(|| match &cli.config {
            Some(path) => format!("invalid configuration in {:?}", path),
            None => "invalid default configuration".to_string(),
        })?;

    match cli.command {
        Commands::Serve { ref host, port } => {
            let cache = Arc::new(Cache::from_config(&config).await?);
            let maintenance = cache.start_maintenance();

            let server = ApiServer::new(
                ApiServerConfig {
                    host: host.clone(),
                    port,
                },
                cache.clone(),
            );
            println!("Starting cachegate on {}:{}", host, port);
            server.start_with_shutdown(shutdown_signal()).await?;

            let _ = maintenance.send(true);
            let report = cache.close().await;
            if report.aborted > 0 {
                warn!(aborted = report.aborted, "Mirror writes aborted at shutdown");
            }
            info!("Shutdown complete");
        }

        Commands::Validate => {
            print_summary(&config)?;
            println!("Configuration OK");
        }

        Commands::Probe => {
            let cache = Cache::from_config(&config).await?;
            let monitor = cache.health_monitor();

            println!("{:<12} {:<10} {:<10} {:>8}  ERROR", "STORE", "ROLE", "STATUS", "LATENCY");
            for result in monitor.probe_all().await {
                println!(
                    "{:<12} {:<10} {:<10} {:>6}ms  {}",
                    result.store,
                    result.role.to_string(),
                    format!("{:?}", result.status).to_lowercase(),
                    result.response_time_ms,
                    result.error.as_deref().unwrap_or("-"),
                );
            }

            let healthy = monitor.primary_healthy();
            cache.shutdown(std::time::Duration::ZERO).await;
            if !healthy {
                anyhow::bail!("primary store is unhealthy");
            }
        }
    }

    Ok(())
}

fn print_summary(config: &CacheConfig) -> Result<()> {
    println!("Environment: {}", config.environment);
    println!("Key prefix:  {}", config.key_prefix);

    println!("\nStores:");
    for store in &config.stores {
        let backend = match &store.backend {
            StoreBackend::Memory { max_entries } => format!("memory (max {} entries)", max_entries),
            StoreBackend::Redis { url } => format!("redis {}", redact(url)),
        };
        println!(
            "  {:<12} {:<10} {}  timeout {}ms",
            store.name,
            store.role.to_string(),
            backend,
            store.timeout_ms
        );
    }

    let registry = TtlRegistry::new(&config.ttl, &config.environment)?;
    println!("\nTTL ({}):", config.environment);
    for cache_type in CacheType::ALL {
        let ttl = match registry.resolve(cache_type) {
            ResolvedTtl::Permanent => "permanent".to_string(),
            ResolvedTtl::Expires(ttl) => format!("{}s", ttl.as_secs()),
        };
        let routing = config
            .routing
            .get(&cache_type)
            .map(|r| format!("{:?} via {:?}", r.write_mode, r.read_order))
            .unwrap_or_else(|| "primary only".to_string());
        println!("  {:<16} {:<10} {}", cache_type.as_str(), ttl, routing);
    }

    println!("\nInvalidation rules:");
    for (operation, types) in &config.invalidation_rules {
        let names: Vec<&str> = types.iter().map(|t| t.as_str()).collect();
        println!("  {:<16} {}", operation, names.join(", "));
    }

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await
        }
    }
}
