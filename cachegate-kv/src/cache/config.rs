//! Configuration for the cache system
//!
//! Configuration is a typed YAML document. Every field has a built-in
//! default, `CACHEGATE_*` environment variables override the deployment
//! specific parts, and [`CacheConfig::validate`] rejects inconsistent setups
//! before any traffic is served.

use crate::cache::invalidation::{default_rule_table, InvalidationRules};
use crate::cache::key::DEFAULT_KEY_PREFIX;
use crate::cache::policy::{default_ttl_table, TtlPolicy, TtlRegistry};
use crate::cache::router::{RoutingStrategy, WriteMode};
use crate::cache::types::CacheType;
use crate::error::{CacheError, Result};
use crate::health::HealthConfig;
use crate::scheduler::SchedulerConfig;
use crate::store::{StoreBackend, StoreConfig, StoreRole};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable selecting the active environment
pub const ENV_ENVIRONMENT: &str = "CACHEGATE_ENV";
/// Environment variable overriding the key prefix
pub const ENV_KEY_PREFIX: &str = "CACHEGATE_KEY_PREFIX";
/// Prefix of per-store URL overrides, e.g. `CACHEGATE_STORE_PRIMARY_URL`
pub const ENV_STORE_URL_PREFIX: &str = "CACHEGATE_STORE_";

/// Complete configuration of a cache instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Active environment, selects TTL overrides
    pub environment: String,

    /// Namespace prepended to every key
    pub key_prefix: String,

    pub stores: Vec<StoreConfig>,

    /// One policy per cache type; missing types fail validation
    pub ttl: BTreeMap<CacheType, TtlPolicy>,

    /// Types without an entry use single-write, primary-only reads
    pub routing: BTreeMap<CacheType, RoutingStrategy>,

    pub invalidation_rules: BTreeMap<String, Vec<CacheType>>,

    pub health: HealthConfig,

    pub scheduler: SchedulerConfig,

    /// Upper bound for one `invalidate` fan-out
    pub invalidation_timeout_ms: u64,

    /// How long shutdown waits for pending mirror writes
    pub mirror_drain_grace_ms: u64,

    /// Interval of the expired-entry sweep for in-process stores
    pub memory_sweep_interval_secs: u64,

    /// Mirror writes that may wait for a worker before being dropped
    pub mirror_queue_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            environment: "production".to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            stores: vec![StoreConfig::memory("primary", StoreRole::Primary)],
            ttl: default_ttl_table(),
            routing: BTreeMap::new(),
            invalidation_rules: default_rule_table(),
            health: HealthConfig::default(),
            scheduler: SchedulerConfig::default(),
            invalidation_timeout_ms: 2_000,
            mirror_drain_grace_ms: 5_000,
            memory_sweep_interval_secs: 60,
            mirror_queue_capacity: 1_024,
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CacheError::Config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Load `.env`, read the file (or defaults), apply environment overrides
    /// and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Ok(env_file) = dotenv::dotenv() {
            debug!("Loaded environment from {}", env_file.display());
        }

        let mut config = match path {
            Some(path) => {
                info!("Loading cache configuration from {}", path.display());
                Self::from_file(path)?
            }
            None => {
                info!("No configuration file given, using built-in defaults");
                Self::default()
            }
        };

        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `CACHEGATE_*` overrides read through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(environment) = lookup(ENV_ENVIRONMENT) {
            self.environment = environment;
        }
        if let Some(prefix) = lookup(ENV_KEY_PREFIX) {
            self.key_prefix = prefix;
        }

        for store in &mut self.stores {
            let var = format!(
                "{}{}_URL",
                ENV_STORE_URL_PREFIX,
                store.name.to_uppercase().replace('-', "_")
            );
            if let Some(url) = lookup(&var) {
                debug!(store = %store.name, "Store URL overridden from {}", var);
                store.backend = StoreBackend::Redis { url };
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.environment.trim().is_empty() {
            return Err(CacheError::Config("environment must not be empty".to_string()));
        }

        if self.key_prefix.is_empty() {
            return Err(CacheError::Config("key_prefix must not be empty".to_string()));
        }

        let mut names = HashSet::new();
        for store in &self.stores {
            if !names.insert(store.name.as_str()) {
                return Err(CacheError::Config(format!(
                    "duplicate store name '{}'",
                    store.name
                )));
            }
            if store.timeout_ms == 0 {
                return Err(CacheError::Config(format!(
                    "timeout_ms for store '{}' must be greater than 0",
                    store.name
                )));
            }
        }

        let primaries = self
            .stores
            .iter()
            .filter(|s| s.role == StoreRole::Primary)
            .count();
        if primaries != 1 {
            return Err(CacheError::Config(format!(
                "exactly one primary store is required, found {}",
                primaries
            )));
        }

        let roles: HashSet<StoreRole> = self.stores.iter().map(|s| s.role).collect();
        for (cache_type, strategy) in &self.routing {
            if strategy.read_order.is_empty() {
                return Err(CacheError::Config(format!(
                    "read_order for '{}' is empty",
                    cache_type
                )));
            }
            let needed = strategy
                .read_order
                .iter()
                .chain(strategy.write_mode.mirror_roles());
            for role in needed {
                if !roles.contains(role) {
                    return Err(CacheError::Config(format!(
                        "routing for '{}' uses role '{}' with no configured store",
                        cache_type, role
                    )));
                }
            }
        }

        TtlRegistry::new(&self.ttl, &self.environment)?;
        InvalidationRules::from_table(self.invalidation_rules.clone())?;

        if self.health.probe_interval_ms == 0 || self.health.probe_timeout_ms == 0 {
            return Err(CacheError::Config(
                "health probe interval and timeout must be greater than 0".to_string(),
            ));
        }
        if self.health.recovery_threshold == 0 {
            return Err(CacheError::Config(
                "health recovery_threshold must be at least 1".to_string(),
            ));
        }

        if self.invalidation_timeout_ms == 0 {
            return Err(CacheError::Config(
                "invalidation_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.mirror_queue_capacity == 0 {
            return Err(CacheError::Config(
                "mirror_queue_capacity must be greater than 0".to_string(),
            ));
        }

        self.scheduler.validate()?;
        Ok(())
    }

    pub fn invalidation_timeout(&self) -> Duration {
        Duration::from_millis(self.invalidation_timeout_ms)
    }

    pub fn mirror_drain_grace(&self) -> Duration {
        Duration::from_millis(self.mirror_drain_grace_ms)
    }

    pub fn memory_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.memory_sweep_interval_secs)
    }
}

/// Preset configurations
impl CacheConfig {
    /// Three in-process tiers with the standard per-type routing.
    ///
    /// Useful for local runs and tests; production swaps the primary and
    /// replica for Redis stores through the config file or environment.
    pub fn tiered_in_memory() -> Self {
        use CacheType::*;
        use StoreRole::*;

        let replicated = RoutingStrategy::new(WriteMode::MirrorReplica, vec![Primary, Replica]);
        let volatile = RoutingStrategy::new(WriteMode::MirrorEphemeral, vec![Ephemeral, Primary]);
        let primary_only = RoutingStrategy::default();

        Self {
            stores: vec![
                StoreConfig::memory("primary", Primary),
                StoreConfig::memory("replica", Replica),
                StoreConfig::memory("hot", Ephemeral),
            ],
            routing: BTreeMap::from([
                (User, replicated.clone()),
                (UserSettings, replicated.clone()),
                (Portfolio, replicated),
                (WalletBalance, volatile.clone()),
                (PriceQuote, volatile),
                (
                    TokenInfo,
                    RoutingStrategy::new(WriteMode::MirrorBoth, vec![Ephemeral, Primary, Replica]),
                ),
                (MainMenu, primary_only.clone()),
                (SessionState, primary_only),
            ]),
            ..Default::default()
        }
    }
}

/// Builder for cache configuration with validation
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    base: Option<CacheConfig>,
    environment: Option<String>,
    key_prefix: Option<String>,
    stores: Option<Vec<StoreConfig>>,
    ttl: Vec<(CacheType, TtlPolicy)>,
    routing: Vec<(CacheType, RoutingStrategy)>,
    rules: Vec<(String, Vec<CacheType>)>,
    health: Option<HealthConfig>,
    scheduler: Option<SchedulerConfig>,
    invalidation_timeout: Option<Duration>,
    mirror_drain_grace: Option<Duration>,
}

impl CacheConfigBuilder {
    /// Start from a preset instead of the defaults
    pub fn base(mut self, config: CacheConfig) -> Self {
        self.base = Some(config);
        self
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Replace the store list
    pub fn stores(mut self, stores: Vec<StoreConfig>) -> Self {
        self.stores = Some(stores);
        self
    }

    pub fn ttl(mut self, cache_type: CacheType, policy: TtlPolicy) -> Self {
        self.ttl.push((cache_type, policy));
        self
    }

    pub fn routing(mut self, cache_type: CacheType, strategy: RoutingStrategy) -> Self {
        self.routing.push((cache_type, strategy));
        self
    }

    pub fn invalidation_rule(mut self, operation: impl Into<String>, types: Vec<CacheType>) -> Self {
        self.rules.push((operation.into(), types));
        self
    }

    pub fn health(mut self, health: HealthConfig) -> Self {
        self.health = Some(health);
        self
    }

    pub fn scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn invalidation_timeout(mut self, timeout: Duration) -> Self {
        self.invalidation_timeout = Some(timeout);
        self
    }

    pub fn mirror_drain_grace(mut self, grace: Duration) -> Self {
        self.mirror_drain_grace = Some(grace);
        self
    }

    /// Build the configuration without validating it
    pub fn build(self) -> CacheConfig {
        let mut config = self.base.unwrap_or_default();

        if let Some(environment) = self.environment {
            config.environment = environment;
        }
        if let Some(prefix) = self.key_prefix {
            config.key_prefix = prefix;
        }
        if let Some(stores) = self.stores {
            config.stores = stores;
        }
        config.ttl.extend(self.ttl);
        config.routing.extend(self.routing);
        config.invalidation_rules.extend(self.rules);
        if let Some(health) = self.health {
            config.health = health;
        }
        if let Some(scheduler) = self.scheduler {
            config.scheduler = scheduler;
        }
        if let Some(timeout) = self.invalidation_timeout {
            config.invalidation_timeout_ms = timeout.as_millis() as u64;
        }
        if let Some(grace) = self.mirror_drain_grace {
            config.mirror_drain_grace_ms = grace.as_millis() as u64;
        }
        config
    }

    /// Build and validate
    pub fn try_build(self) -> Result<CacheConfig> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}
