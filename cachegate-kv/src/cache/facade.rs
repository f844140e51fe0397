//! The cache façade
//!
//! [`Cache`] composes the key codec, TTL registry, tier router, health
//! monitor, invalidation rules and metrics into the API the application
//! uses. It is `Send + Sync` and meant to be shared through an `Arc`.

use crate::cache::config::CacheConfig;
use crate::cache::invalidation::{
    DeleteFailure, InvalidationReport, InvalidationRules, SubjectIds, SETTINGS_CHANGE,
};
use crate::cache::key::KeyCodec;
use crate::cache::metrics::MetricsCollector;
use crate::cache::mirror::{DrainReport, MirrorJob, MirrorWriter};
use crate::cache::policy::{TtlPolicy, TtlRegistry};
use crate::cache::router::TierRouter;
use crate::cache::types::{CacheKey, CacheStats, CacheType, CacheValue};
use crate::error::{CacheError, Result};
use crate::health::HealthMonitor;
use crate::store::StoreHandle;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Per-call knobs for [`Cache::get_or_fetch_with`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Skip the read and always call the fetch function
    pub force_refresh: bool,
    /// Replaces the type's TTL for the write-back
    pub ttl_override: Option<Duration>,
    /// Upper bound for the fetch function
    pub deadline: Option<Duration>,
}

impl FetchOptions {
    pub fn force_refresh() -> Self {
        Self {
            force_refresh: true,
            ..Default::default()
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_override = Some(ttl);
        self
    }
}

/// Tiered cache in front of the configured stores
#[derive(Debug)]
pub struct Cache {
    codec: KeyCodec,
    ttl: TtlRegistry,
    router: TierRouter,
    rules: InvalidationRules,
    monitor: Arc<HealthMonitor>,
    metrics: Arc<MetricsCollector>,
    mirror: MirrorWriter,
    invalidation_timeout: Duration,
    mirror_drain_grace: Duration,
    sweep_interval: Duration,
}

impl Cache {
    /// Validate `config`, connect every store and assemble the cache
    pub async fn from_config(config: &CacheConfig) -> Result<Self> {
        config.validate()?;

        let mut handles = Vec::with_capacity(config.stores.len());
        for store in &config.stores {
            handles.push(Arc::new(StoreHandle::connect(store).await?));
        }

        Self::from_parts(config, handles)
    }

    /// Assemble the cache over already-connected handles
    pub fn from_parts(config: &CacheConfig, handles: Vec<Arc<StoreHandle>>) -> Result<Self> {
        let ttl = TtlRegistry::new(&config.ttl, &config.environment)?;
        let router = TierRouter::new(handles.clone(), &config.routing)?;
        let rules = InvalidationRules::from_table(config.invalidation_rules.clone())?;
        let monitor = Arc::new(HealthMonitor::new(handles, config.health.clone()));
        let metrics = Arc::new(MetricsCollector::new()?);
        let mirror = MirrorWriter::new(config.mirror_queue_capacity, metrics.clone());

        info!(
            environment = %config.environment,
            stores = router.handles().len(),
            primary = %router.primary().name(),
            rules = rules.len(),
            "Cache initialized"
        );

        Ok(Self {
            codec: KeyCodec::new(config.key_prefix.clone()),
            ttl,
            router,
            rules,
            monitor,
            metrics,
            mirror,
            invalidation_timeout: config.invalidation_timeout(),
            mirror_drain_grace: config.mirror_drain_grace(),
            sweep_interval: config.memory_sweep_interval(),
        })
    }

    pub fn key_codec(&self) -> &KeyCodec {
        &self.codec
    }

    pub fn router(&self) -> &TierRouter {
        &self.router
    }

    pub fn ttl_registry(&self) -> &TtlRegistry {
        &self.ttl
    }

    pub fn rules(&self) -> &InvalidationRules {
        &self.rules
    }

    pub fn health_monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot()
    }

    /// Routing flag per store name
    pub fn health_check(&self) -> BTreeMap<String, bool> {
        self.monitor.snapshot()
    }

    /// Build the key for a typed entry
    pub fn key(&self, cache_type: CacheType, identifier: &str) -> CacheKey {
        self.codec.key(cache_type, identifier)
    }

    /// Read and decode a value. Store and decode failures are logged and
    /// reported as a miss.
    pub async fn get<T: DeserializeOwned>(&self, cache_type: CacheType, id: &str) -> Option<T> {
        let start = Instant::now();
        let key = self.codec.key(cache_type, id);

        let value = match self.read(cache_type, &key).await {
            Some(bytes) => match serde_json::from_slice::<T>(&bytes) {
                Ok(value) => {
                    self.metrics.record_hit();
                    Some(value)
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Cached value failed to decode, treating as miss");
                    self.metrics.record_error();
                    self.metrics.record_miss();
                    None
                }
            },
            None => {
                self.metrics.record_miss();
                None
            }
        };

        self.metrics.record_latency(start.elapsed());
        debug!(key = %key, hit = value.is_some(), "Cache GET");
        value
    }

    /// Read the raw bytes of an entry
    pub async fn get_raw(&self, cache_type: CacheType, id: &str) -> Option<CacheValue> {
        let start = Instant::now();
        let key = self.codec.key(cache_type, id);
        let value = self.read(cache_type, &key).await;

        if value.is_some() {
            self.metrics.record_hit();
        } else {
            self.metrics.record_miss();
        }
        self.metrics.record_latency(start.elapsed());
        value
    }

    async fn read(&self, cache_type: CacheType, key: &str) -> Option<CacheValue> {
        for handle in self.router.read_targets(cache_type) {
            match handle.get(key).await {
                Ok(Some(value)) => {
                    debug!(key = %key, store = %handle.name(), "Read hit");
                    return Some(value);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %key, store = %handle.name(), error = %e, "Read failed, trying next store");
                    self.metrics.record_error();
                }
            }
        }
        None
    }

    /// Encode and store a value.
    ///
    /// Succeeds once the primary write lands; mirror copies follow in the
    /// background. `ttl_override` replaces the type's TTL for this write.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        cache_type: CacheType,
        id: &str,
        value: &T,
        ttl_override: Option<Duration>,
    ) -> Result<()> {
        let start = Instant::now();
        let bytes = serde_json::to_vec(value)?;
        let key = self.codec.key(cache_type, id);
        let ttl = ttl_override.or_else(|| self.ttl.resolve(cache_type).as_duration());

        let result = self.write(cache_type, key, bytes, ttl).await;
        self.metrics.record_latency(start.elapsed());
        result
    }

    async fn write(
        &self,
        cache_type: CacheType,
        key: CacheKey,
        value: CacheValue,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let mut targets = self.router.write_targets(cache_type).into_iter();
        let Some(primary) = targets.next() else {
            return Err(CacheError::Config("no write target".to_string()));
        };

        if !primary.is_healthy() {
            self.metrics.record_error();
            error!(key = %key, store = %primary.name(), "Primary store unavailable, write rejected");
            return Err(CacheError::StoreUnavailable {
                store: primary.name().to_string(),
                reason: "marked unhealthy by health monitor".to_string(),
            });
        }

        if let Err(e) = primary.set(&key, value.clone(), ttl).await {
            self.metrics.record_error();
            error!(key = %key, store = %primary.name(), error = %e, "Primary write failed");
            return Err(e);
        }
        self.metrics.record_write();
        debug!(key = %key, ttl_ms = ttl.map(|t| t.as_millis() as u64), "Cache SET");

        for handle in targets {
            self.mirror.submit(MirrorJob {
                handle,
                key: key.clone(),
                value: value.clone(),
                ttl,
            });
        }
        Ok(())
    }

    /// Return the cached value or fetch, store and return a fresh one
    pub async fn get_or_fetch<T, F, Fut>(&self, cache_type: CacheType, id: &str, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.get_or_fetch_with(cache_type, id, FetchOptions::default(), fetch)
            .await
    }

    /// [`Cache::get_or_fetch`] with explicit [`FetchOptions`].
    ///
    /// A fetch error is returned as [`CacheError::Fetch`] holding the
    /// caller's error unchanged. A failed write-back is logged and the
    /// fetched value is still returned.
    pub async fn get_or_fetch_with<T, F, Fut>(
        &self,
        cache_type: CacheType,
        id: &str,
        options: FetchOptions,
        fetch: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if !options.force_refresh {
            if let Some(value) = self.get(cache_type, id).await {
                return Ok(value);
            }
        }

        let key = self.codec.key(cache_type, id);
        self.metrics.record_fetch();
        debug!(key = %key, force_refresh = options.force_refresh, "Fetching from source");

        let fetched = match options.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, fetch()).await {
                Ok(result) => result,
                Err(_) => {
                    self.metrics.record_fetch_error();
                    warn!(key = %key, deadline_ms = deadline.as_millis() as u64, "Fetch missed its deadline");
                    return Err(CacheError::DeadlineExceeded {
                        key,
                        deadline_ms: deadline.as_millis() as u64,
                    });
                }
            },
            None => fetch().await,
        };

        let value = match fetched {
            Ok(value) => value,
            Err(e) => {
                self.metrics.record_fetch_error();
                debug!(key = %key, error = %e, "Fetch failed");
                return Err(CacheError::Fetch(e));
            }
        };

        if let Err(e) = self.set(cache_type, id, &value, options.ttl_override).await {
            warn!(key = %key, error = %e, "Failed to cache fetched value");
        }
        Ok(value)
    }

    /// Remove an entry from every store that may hold it.
    ///
    /// On mirror stores the delete runs after any mirror write of the key
    /// still queued, so an older copy cannot reappear. Returns true when at
    /// least one store removed the key.
    pub async fn delete(&self, cache_type: CacheType, id: &str) -> bool {
        let key = self.codec.key(cache_type, id);
        let targets = self.router.delete_targets(cache_type);

        let results = futures::future::join_all(
            targets.iter().map(|handle| self.mirror.delete(handle, &key)),
        )
        .await;

        let mut removed = false;
        for (handle, result) in targets.iter().zip(results) {
            match result {
                Ok(true) => removed = true,
                Ok(false) => {}
                Err(e) => {
                    warn!(key = %key, store = %handle.name(), error = %e, "Delete failed");
                    self.metrics.record_error();
                }
            }
        }

        if removed {
            self.metrics.record_deletes(1);
        }
        debug!(key = %key, removed, "Cache DELETE");
        removed
    }

    /// Evict every entry `operation` makes stale for the given subject.
    ///
    /// Deletes run concurrently, are ordered after queued mirror writes of
    /// the same key and are abandoned once the invalidation timeout elapses.
    pub async fn invalidate(&self, operation: &str, subject: &SubjectIds) -> InvalidationReport {
        let mut report = InvalidationReport::new(operation);
        let types = self.rules.affected_types(operation);
        if types.is_empty() {
            debug!(operation = %operation, "No invalidation rule for operation");
            return report;
        }

        let mirror = &self.mirror;
        let mut pending = FuturesUnordered::new();
        for &cache_type in types {
            let Some(id) = subject.for_kind(cache_type.identifier_kind()) else {
                report.skipped.push(cache_type);
                continue;
            };
            let key = self.codec.key(cache_type, id);
            for handle in self.router.delete_targets(cache_type) {
                let key = key.clone();
                pending.push(async move {
                    let result = mirror.delete(&handle, &key).await;
                    (key, handle, result)
                });
            }
        }

        let deadline = tokio::time::sleep(self.invalidation_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                next = pending.next() => match next {
                    Some((key, _, Ok(true))) => {
                        if !report.deleted.contains(&key) {
                            report.deleted.push(key);
                        }
                    }
                    Some((_, _, Ok(false))) => {}
                    Some((key, handle, Err(e))) => {
                        warn!(key = %key, store = %handle.name(), error = %e, "Invalidation delete failed");
                        self.metrics.record_error();
                        report.failed.push(DeleteFailure {
                            key,
                            store: handle.name().to_string(),
                            error: e.to_string(),
                        });
                    }
                    None => break,
                },
                _ = &mut deadline => {
                    report.timed_out = pending.len();
                    warn!(
                        operation = %operation,
                        abandoned = report.timed_out,
                        timeout_ms = self.invalidation_timeout.as_millis() as u64,
                        "Invalidation timed out"
                    );
                    break;
                }
            }
        }

        self.metrics.record_deletes(report.deleted.len() as u64);
        info!(
            operation = %operation,
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Invalidation complete"
        );
        report
    }

    /// Run [`Cache::invalidate`] in the background and return immediately
    pub fn invalidate_detached(
        self: &Arc<Self>,
        operation: impl Into<String>,
        subject: SubjectIds,
    ) -> JoinHandle<InvalidationReport> {
        let cache = Arc::clone(self);
        let operation = operation.into();
        tokio::spawn(async move { cache.invalidate(&operation, &subject).await })
    }

    /// Evict a user's settings and everything derived from them
    pub async fn invalidate_user_settings(&self, user_id: &str) -> InvalidationReport {
        self.invalidate(SETTINGS_CHANGE, &SubjectIds::user(user_id))
            .await
    }

    /// Swap in a new TTL table; a rejected table keeps the current one
    pub fn reload_ttl(&self, table: &BTreeMap<CacheType, TtlPolicy>, environment: &str) -> Result<()> {
        self.ttl.reload(table, environment)
    }

    /// Start health probes and the expired-entry sweep.
    ///
    /// Returns a shutdown sender that stops both loops.
    pub fn start_maintenance(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.monitor.clone().spawn(shutdown_rx.clone());

        let cache = Arc::clone(self);
        let mut shutdown_rx = shutdown_rx;
        tokio::spawn(async move {
            let mut ticker = interval(cache.sweep_interval.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        cache.sweep_expired().await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            debug!("Expiry sweep stopped");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    /// Drop expired entries from stores that do not expire on their own
    pub async fn sweep_expired(&self) -> usize {
        let mut swept = 0;
        for handle in self.router.handles() {
            match handle.sweep_expired().await {
                Ok(count) => swept += count,
                Err(e) => warn!(store = %handle.name(), error = %e, "Expiry sweep failed"),
            }
        }
        if swept > 0 {
            debug!(swept, "Expired entries removed");
        }
        swept
    }

    /// Drain pending mirror writes for up to `grace`, then abort the rest
    pub async fn shutdown(&self, grace: Duration) -> DrainReport {
        info!(grace_ms = grace.as_millis() as u64, "Cache shutting down");
        self.mirror.shutdown(grace).await
    }

    /// [`Cache::shutdown`] with the configured grace period
    pub async fn close(&self) -> DrainReport {
        self.shutdown(self.mirror_drain_grace).await
    }
}
