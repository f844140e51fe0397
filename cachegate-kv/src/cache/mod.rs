//! # Tiered cache coordination
//!
//! Decides, per cache type, where values are read from and written to,
//! how long they live, and which entries an application operation evicts.
//!
//! ## Features
//!
//! - **Typed keys**: `{prefix}{type}:{identifier}`, collision-free across types
//! - **TTL policies**: permanent or fixed lifetimes with per-environment overrides
//! - **Tier routing**: primary, replica and ephemeral stores with mirrored writes
//! - **Health-aware**: unhealthy stores drop out of routing until they recover
//! - **Rule-based invalidation**: operations map to the cache types they make stale
//!
//! ## Example
//!
//! ```no_run
//! use cachegate_kv::cache::{Cache, CacheConfig, CacheType, SubjectIds};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let cache = Cache::from_config(&CacheConfig::tiered_in_memory()).await?;
//!
//! let balance: u64 = cache
//!     .get_or_fetch(CacheType::WalletBalance, "W1", || async { Ok(1_500_000u64) })
//!     .await?;
//!
//! // After a sale the balance, portfolio and menu are stale
//! let subject = SubjectIds::user("42").with_wallet("W1");
//! let report = cache.invalidate("sell", &subject).await;
//! println!("{} ({} lamports before)", report, balance);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entry;
pub mod facade;
pub mod invalidation;
pub mod key;
pub mod metrics;
pub mod mirror;
pub mod policy;
pub mod router;
pub mod types;

pub use config::{CacheConfig, CacheConfigBuilder};
pub use entry::CacheEntry;
pub use facade::{Cache, FetchOptions};
pub use invalidation::{DeleteFailure, InvalidationReport, InvalidationRules, SubjectIds};
pub use key::{KeyCodec, DEFAULT_KEY_PREFIX};
pub use metrics::MetricsCollector;
pub use mirror::DrainReport;
pub use policy::{ResolvedTtl, TtlPolicy, TtlRegistry};
pub use router::{RoutingStrategy, TierRouter, WriteMode};
pub use types::{CacheKey, CacheStats, CacheType, CacheValue, IdentifierKind};
