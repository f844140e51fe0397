//! # cachegate-kv
//!
//! Cache coordination layer in front of one or more key-value stores.
//!
//! ## Features
//!
//! - One façade for get / set / get-or-fetch / delete / invalidate
//! - Per-type TTL policies, hot-reloadable without locks on the read path
//! - Primary / replica / ephemeral tiers with best-effort mirror writes
//! - Health probes with fail-fast demotion and hysteresis on recovery
//! - Background refresh of hot entries and detached warm-up at startup
//! - Redis and in-process memory backends
//!
//! ## Quick start
//!
//! ```no_run
//! use cachegate_kv::{Cache, CacheConfig, CacheType};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = CacheConfig::load(None)?;
//!     let cache = std::sync::Arc::new(Cache::from_config(&config).await?);
//!     let maintenance = cache.start_maintenance();
//!
//!     cache.set(CacheType::UserSettings, "42", &"dark", None).await?;
//!     let theme: Option<String> = cache.get(CacheType::UserSettings, "42").await;
//!     println!("theme: {:?}", theme);
//!     println!("stores: {:?}", cache.health_check());
//!
//!     maintenance.send(true)?;
//!     cache.shutdown(Duration::from_secs(5)).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Health checks
//!
//! Every store is probed on a fixed interval. A failed probe removes the
//! store from routing at once; it is used again only after
//! `recovery_threshold` consecutive successful probes.
//!
//! ```no_run
//! use cachegate_kv::{Cache, CacheConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let cache = Cache::from_config(&CacheConfig::tiered_in_memory()).await?;
//! for result in cache.health_monitor().probe_all().await {
//!     println!("{}: {:?} in {}ms", result.store, result.status, result.response_time_ms);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod error;
pub mod health;
pub mod scheduler;
pub mod store;

// Re-export main types for convenience
pub use cache::{
    Cache, CacheConfig, CacheConfigBuilder, CacheEntry, CacheKey, CacheStats, CacheType,
    CacheValue, DrainReport, FetchOptions, IdentifierKind, InvalidationReport, InvalidationRules,
    KeyCodec, MetricsCollector, ResolvedTtl, RoutingStrategy, SubjectIds, TierRouter, TtlPolicy,
    TtlRegistry, WriteMode,
};
pub use error::{CacheError, Result};
pub use health::{
    HealthConfig, HealthMonitor, HealthStatus, HealthTransition, ProbeOutcome, ProbeResult,
};
pub use scheduler::{RefreshScheduler, RefreshSource, RefreshStats, SchedulerConfig, WarmSubject};
pub use store::{KvStore, MemoryStore, RedisStore, StoreBackend, StoreConfig, StoreHandle, StoreRole};
