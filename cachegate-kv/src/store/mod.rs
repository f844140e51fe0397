//! Backing store connections
//!
//! A [`StoreHandle`] wraps one long-lived connection to a key-value store
//! together with its tier role, its per-call timeout and the health state
//! written by the [`HealthMonitor`](crate::health::HealthMonitor).

pub mod memory;
pub mod redis_store;

use crate::cache::types::CacheValue;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

/// Minimal key-value operations every backing store provides
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Short backend name for logs ("memory", "redis")
    fn backend(&self) -> &'static str;

    /// Read a value; `Ok(None)` is a miss (absent or expired)
    async fn get(&self, key: &str) -> Result<Option<CacheValue>>;

    /// Fully replace the value stored under `key`
    async fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()>;

    /// Remove a key, returning whether it was present
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Lightweight round trip used by health probes
    async fn ping(&self) -> Result<()>;

    /// Drop expired entries for stores that do not expire on their own
    async fn sweep_expired(&self) -> Result<usize> {
        Ok(0)
    }
}

/// Tier a store serves in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreRole {
    /// Durability anchor, every write lands here first
    Primary,
    /// Read offload / backup copy
    Replica,
    /// Fast, volatile tier for short-lived data
    Ephemeral,
}

impl fmt::Display for StoreRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreRole::Primary => write!(f, "primary"),
            StoreRole::Replica => write!(f, "replica"),
            StoreRole::Ephemeral => write!(f, "ephemeral"),
        }
    }
}

/// Backend selection for a configured store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process map with TTL enforcement
    Memory {
        #[serde(default = "default_memory_capacity")]
        max_entries: usize,
    },
    /// Redis server reached through a connection manager
    Redis { url: String },
}

fn default_memory_capacity() -> usize {
    100_000
}

fn default_store_timeout_ms() -> u64 {
    250
}

/// Connection settings for one backing store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub name: String,
    pub role: StoreRole,
    pub backend: StoreBackend,
    /// Upper bound for any single call against this store
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

impl StoreConfig {
    pub fn memory(name: impl Into<String>, role: StoreRole) -> Self {
        Self {
            name: name.into(),
            role,
            backend: StoreBackend::Memory {
                max_entries: default_memory_capacity(),
            },
            timeout_ms: default_store_timeout_ms(),
        }
    }

    pub fn redis(name: impl Into<String>, role: StoreRole, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role,
            backend: StoreBackend::Redis { url: url.into() },
            timeout_ms: default_store_timeout_ms(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Liveness bookkeeping for one store.
///
/// Only the health monitor mutates this; every cache operation reads
/// `healthy` without taking a lock.
#[derive(Debug)]
pub struct HealthState {
    healthy: AtomicBool,
    consecutive_successes: AtomicU32,
    last_latency_us: AtomicU64,
    last_probe_unix_ms: AtomicI64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            consecutive_successes: AtomicU32::new(0),
            last_latency_us: AtomicU64::new(0),
            last_probe_unix_ms: AtomicI64::new(0),
        }
    }
}

impl HealthState {
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes.load(Ordering::Acquire)
    }

    pub fn last_latency(&self) -> Duration {
        Duration::from_micros(self.last_latency_us.load(Ordering::Relaxed))
    }

    pub fn last_probe_unix_ms(&self) -> i64 {
        self.last_probe_unix_ms.load(Ordering::Relaxed)
    }

    /// Record a successful probe. Returns true when this probe flipped the
    /// store back to healthy.
    pub(crate) fn record_success(&self, latency: Duration, recovery_threshold: u32) -> bool {
        self.stamp(latency);
        let successes = self
            .consecutive_successes
            .fetch_add(1, Ordering::AcqRel)
            .saturating_add(1);

        if self.is_healthy() {
            return false;
        }

        if successes >= recovery_threshold.max(1) {
            self.healthy.store(true, Ordering::Release);
            return true;
        }
        false
    }

    /// Record a failed probe. Returns true when this probe flipped the store
    /// to unhealthy.
    pub(crate) fn record_failure(&self, latency: Duration) -> bool {
        self.stamp(latency);
        self.consecutive_successes.store(0, Ordering::Release);
        self.healthy.swap(false, Ordering::AcqRel)
    }

    fn stamp(&self, latency: Duration) {
        self.last_latency_us
            .store(latency.as_micros() as u64, Ordering::Relaxed);
        self.last_probe_unix_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }
}

/// One backing store with its role, timeout and health state
pub struct StoreHandle {
    name: String,
    role: StoreRole,
    timeout: Duration,
    store: Arc<dyn KvStore>,
    health: HealthState,
}

impl StoreHandle {
    pub fn new(
        name: impl Into<String>,
        role: StoreRole,
        store: Arc<dyn KvStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            role,
            timeout,
            store,
            health: HealthState::default(),
        }
    }

    /// Open the connection described by `config`
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let store: Arc<dyn KvStore> = match &config.backend {
            StoreBackend::Memory { max_entries } => Arc::new(MemoryStore::new(*max_entries)),
            StoreBackend::Redis { url } => Arc::new(RedisStore::connect(url).await?),
        };

        info!(
            store = %config.name,
            role = %config.role,
            backend = store.backend(),
            timeout_ms = config.timeout_ms,
            "Store connected"
        );

        Ok(Self::new(
            config.name.clone(),
            config.role,
            store,
            config.timeout(),
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> StoreRole {
        self.role
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub fn is_healthy(&self) -> bool {
        self.health.is_healthy()
    }

    pub fn health(&self) -> &HealthState {
        &self.health
    }

    pub async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        self.bounded(self.store.get(key)).await
    }

    pub async fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()> {
        self.bounded(self.store.set(key, value, ttl)).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.bounded(self.store.delete(key)).await
    }

    /// Probe round trip bounded by `timeout` instead of the operation timeout
    pub async fn ping(&self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.store.ping()).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout {
                store: self.name.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    pub async fn sweep_expired(&self) -> Result<usize> {
        self.store.sweep_expired().await
    }

    async fn bounded<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, operation).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(CacheError::Driver(e))) => Err(CacheError::StoreUnavailable {
                store: self.name.clone(),
                reason: e.to_string(),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CacheError::Timeout {
                store: self.name.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("backend", &self.store.backend())
            .field("healthy", &self.is_healthy())
            .finish()
    }
}
