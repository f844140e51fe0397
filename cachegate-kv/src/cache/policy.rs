//! Per-type freshness policies
//!
//! Each [`CacheType`] carries a [`TtlPolicy`]. The registry resolves every
//! policy once for the active environment and keeps the result in an
//! immutable snapshot that is swapped atomically on reload.

use crate::cache::types::CacheType;
use crate::error::{CacheError, Result};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Freshness policy for one cache type
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TtlPolicy {
    /// Lifetime in seconds; `None` means the value never expires
    #[serde(default)]
    pub ttl_seconds: Option<u32>,

    /// Per-environment replacement for `ttl_seconds`
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment_override: HashMap<String, u32>,
}

impl TtlPolicy {
    pub fn permanent() -> Self {
        Self::default()
    }

    pub fn fixed(seconds: u32) -> Self {
        Self {
            ttl_seconds: Some(seconds),
            environment_override: HashMap::new(),
        }
    }

    pub fn with_override(mut self, environment: impl Into<String>, seconds: u32) -> Self {
        self.environment_override.insert(environment.into(), seconds);
        self
    }

    /// Resolve against an environment, without validation
    pub fn resolve_for(&self, environment: &str) -> ResolvedTtl {
        match self
            .environment_override
            .get(environment)
            .copied()
            .or(self.ttl_seconds)
        {
            Some(seconds) => ResolvedTtl::Expires(Duration::from_secs(u64::from(seconds))),
            None => ResolvedTtl::Permanent,
        }
    }

    fn validate(&self, cache_type: CacheType) -> Result<()> {
        if self.ttl_seconds == Some(0) {
            return Err(CacheError::Config(format!(
                "ttl_seconds for '{}' must be greater than 0 (use null for no expiry)",
                cache_type
            )));
        }
        if let Some((env, _)) = self.environment_override.iter().find(|(_, s)| **s == 0) {
            return Err(CacheError::Config(format!(
                "environment override '{}' for '{}' must be greater than 0",
                env, cache_type
            )));
        }
        Ok(())
    }
}

/// A policy resolved for the active environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedTtl {
    Permanent,
    Expires(Duration),
}

impl ResolvedTtl {
    /// TTL to hand to a store; `None` for permanent values
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            ResolvedTtl::Permanent => None,
            ResolvedTtl::Expires(ttl) => Some(*ttl),
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, ResolvedTtl::Permanent)
    }
}

#[derive(Debug)]
struct TtlSnapshot {
    environment: String,
    resolved: [ResolvedTtl; CacheType::ALL.len()],
}

impl TtlSnapshot {
    fn build(table: &BTreeMap<CacheType, TtlPolicy>, environment: &str) -> Result<Self> {
        let mut resolved = [ResolvedTtl::Permanent; CacheType::ALL.len()];
        for cache_type in CacheType::ALL {
            let policy = table.get(&cache_type).ok_or_else(|| {
                CacheError::Config(format!("no TTL policy configured for '{}'", cache_type))
            })?;
            policy.validate(cache_type)?;
            resolved[cache_type.index()] = policy.resolve_for(environment);
        }
        Ok(Self {
            environment: environment.to_string(),
            resolved,
        })
    }
}

/// Resolved TTLs for every cache type.
///
/// Lookups are lock-free; `reload` validates the new table before swapping,
/// so a rejected table leaves the current snapshot untouched.
pub struct TtlRegistry {
    snapshot: ArcSwap<TtlSnapshot>,
}

impl TtlRegistry {
    pub fn new(table: &BTreeMap<CacheType, TtlPolicy>, environment: &str) -> Result<Self> {
        let snapshot = TtlSnapshot::build(table, environment)?;
        Ok(Self {
            snapshot: ArcSwap::from_pointee(snapshot),
        })
    }

    pub fn resolve(&self, cache_type: CacheType) -> ResolvedTtl {
        self.snapshot.load().resolved[cache_type.index()]
    }

    /// Environment the current snapshot was resolved for
    pub fn environment(&self) -> String {
        self.snapshot.load().environment.clone()
    }

    pub fn reload(&self, table: &BTreeMap<CacheType, TtlPolicy>, environment: &str) -> Result<()> {
        let snapshot = TtlSnapshot::build(table, environment)?;
        self.snapshot.store(Arc::new(snapshot));
        info!(environment = %environment, "TTL policies reloaded");
        Ok(())
    }
}

impl std::fmt::Debug for TtlRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlRegistry")
            .field("snapshot", &*self.snapshot.load())
            .finish()
    }
}

/// Built-in TTL table
pub fn default_ttl_table() -> BTreeMap<CacheType, TtlPolicy> {
    BTreeMap::from([
        (CacheType::User, TtlPolicy::fixed(3600)),
        (CacheType::UserSettings, TtlPolicy::permanent()),
        (
            CacheType::WalletBalance,
            TtlPolicy::fixed(30).with_override("test", 2),
        ),
        (CacheType::Portfolio, TtlPolicy::fixed(60)),
        (CacheType::MainMenu, TtlPolicy::fixed(300)),
        (CacheType::TokenInfo, TtlPolicy::fixed(3600)),
        (CacheType::PriceQuote, TtlPolicy::fixed(15)),
        (CacheType::SessionState, TtlPolicy::fixed(1800)),
    ])
}
