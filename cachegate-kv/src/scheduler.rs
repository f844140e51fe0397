//! Background refresh and cold-start warming
//!
//! The [`RefreshScheduler`] keeps hot entries fresh without waiting for a
//! client request. Subjects reported active by the application are refreshed
//! on one interval, subject-independent entries on a second, longer one.
//! Warming runs once at startup as a detached task.

use crate::cache::facade::{Cache, FetchOptions};
use crate::cache::invalidation::SubjectIds;
use crate::cache::types::CacheType;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Refresh intervals, warming bounds and activity tracking settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Subjects idle longer than this stop being refreshed
    pub inactivity_threshold_secs: u64,
    pub subject_refresh_interval_secs: u64,
    pub global_refresh_interval_secs: u64,
    /// Most subjects read from the source at startup
    pub warm_limit: usize,
    pub warm_timeout_secs: u64,
    /// Upper bound of the random delay before each loop's first run
    pub max_start_jitter_ms: u64,
    /// Refresh fetches in flight at once
    pub refresh_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            inactivity_threshold_secs: 1_800,
            subject_refresh_interval_secs: 30,
            global_refresh_interval_secs: 60,
            warm_limit: 100,
            warm_timeout_secs: 30,
            max_start_jitter_ms: 2_000,
            refresh_concurrency: 8,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.subject_refresh_interval_secs == 0 || self.global_refresh_interval_secs == 0 {
            return Err(CacheError::Config(
                "scheduler refresh intervals must be greater than 0".to_string(),
            ));
        }
        if self.warm_timeout_secs == 0 {
            return Err(CacheError::Config(
                "scheduler warm_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.refresh_concurrency == 0 {
            return Err(CacheError::Config(
                "scheduler refresh_concurrency must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn inactivity_threshold(&self) -> Duration {
        Duration::from_secs(self.inactivity_threshold_secs)
    }

    pub fn subject_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.subject_refresh_interval_secs)
    }

    pub fn global_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.global_refresh_interval_secs)
    }

    pub fn warm_timeout(&self) -> Duration {
        Duration::from_secs(self.warm_timeout_secs)
    }
}

/// A subject read from the source of truth for warming
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmSubject {
    pub subject_id: String,
    pub wallet: Option<String>,
}

/// Data source the scheduler refreshes from, supplied by the application
#[async_trait]
pub trait RefreshSource: Send + Sync {
    /// Hot types refreshed for every active subject
    fn subject_types(&self) -> Vec<CacheType>;

    async fn fetch_subject(
        &self,
        cache_type: CacheType,
        identifier: &str,
    ) -> anyhow::Result<serde_json::Value>;

    /// Subject-independent entries, e.g. `(PriceQuote, "SOL")`
    fn global_entries(&self) -> Vec<(CacheType, String)>;

    async fn fetch_global(
        &self,
        cache_type: CacheType,
        identifier: &str,
    ) -> anyhow::Result<serde_json::Value>;

    /// Most recently active subjects, newest first
    async fn recently_active(&self, limit: usize) -> anyhow::Result<Vec<WarmSubject>>;
}

/// Activity record for one subject
#[derive(Debug, Clone)]
pub struct ActiveSubject {
    pub last_seen: Instant,
    pub wallet: Option<String>,
}

/// Counts from one refresh or warm pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshStats {
    pub refreshed: usize,
    pub failed: usize,
    /// Subject types whose identifier was unknown for a subject
    pub skipped: usize,
    /// Subjects dropped by the inactivity prune
    pub pruned: usize,
}

impl RefreshStats {
    fn absorb(&mut self, other: RefreshStats) {
        self.refreshed += other.refreshed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.pruned += other.pruned;
    }
}

#[derive(Debug, Clone, Copy)]
enum RefreshLoop {
    Subjects,
    Globals,
}

/// Drives periodic refresh and startup warming over a shared [`Cache`]
pub struct RefreshScheduler {
    cache: Arc<Cache>,
    source: Arc<dyn RefreshSource>,
    config: SchedulerConfig,
    active: RwLock<HashMap<String, ActiveSubject>>,
}

impl RefreshScheduler {
    pub fn new(cache: Arc<Cache>, source: Arc<dyn RefreshSource>, config: SchedulerConfig) -> Self {
        Self {
            cache,
            source,
            config,
            active: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Mark a subject as active now
    pub async fn record_activity(&self, subject_id: &str, wallet: Option<&str>) {
        let mut active = self.active.write().await;
        let entry = active
            .entry(subject_id.to_string())
            .or_insert_with(|| ActiveSubject {
                last_seen: Instant::now(),
                wallet: None,
            });
        entry.last_seen = Instant::now();
        if let Some(wallet) = wallet {
            entry.wallet = Some(wallet.to_string());
        }
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    /// Drop subjects idle longer than the inactivity threshold
    pub async fn prune(&self) -> usize {
        let threshold = self.config.inactivity_threshold();
        let mut active = self.active.write().await;
        let before = active.len();
        active.retain(|_, subject| subject.last_seen.elapsed() <= threshold);

        let pruned = before - active.len();
        if pruned > 0 {
            debug!(pruned, remaining = active.len(), "Pruned inactive subjects");
        }
        pruned
    }

    /// One pass over every active subject's hot types
    pub async fn refresh_subjects(&self) -> RefreshStats {
        let pruned = self.prune().await;
        let subjects: Vec<SubjectIds> = self
            .active
            .read()
            .await
            .iter()
            .map(|(id, subject)| SubjectIds {
                user: Some(id.clone()),
                wallet: subject.wallet.clone(),
                token: None,
            })
            .collect();

        let mut stats = self.refresh_for(&subjects).await;
        stats.pruned = pruned;
        stats
    }

    async fn refresh_for(&self, subjects: &[SubjectIds]) -> RefreshStats {
        let types = self.source.subject_types();
        let mut stats = RefreshStats::default();
        let mut jobs = Vec::new();

        for subject in subjects {
            for &cache_type in &types {
                match subject.for_kind(cache_type.identifier_kind()) {
                    Some(id) => jobs.push((cache_type, id.to_string())),
                    None => stats.skipped += 1,
                }
            }
        }

        let source = &self.source;
        let outcome = self
            .run_jobs(jobs, |cache_type, id| async move {
                source.fetch_subject(cache_type, &id).await
            })
            .await;
        stats.absorb(outcome);
        stats
    }

    /// One pass over every global entry
    pub async fn refresh_globals(&self) -> RefreshStats {
        let source = &self.source;
        self.run_jobs(source.global_entries(), |cache_type, id| async move {
            source.fetch_global(cache_type, &id).await
        })
        .await
    }

    async fn run_jobs<F, Fut>(&self, jobs: Vec<(CacheType, String)>, fetch: F) -> RefreshStats
    where
        F: Fn(CacheType, String) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<serde_json::Value>>,
    {
        let fetch = &fetch;
        let results: Vec<(CacheType, String, Result<serde_json::Value>)> = stream::iter(jobs)
            .map(|(cache_type, id)| async move {
                let result = self
                    .cache
                    .get_or_fetch_with(
                        cache_type,
                        &id,
                        FetchOptions::force_refresh(),
                        || fetch(cache_type, id.clone()),
                    )
                    .await;
                (cache_type, id, result)
            })
            .buffer_unordered(self.config.refresh_concurrency.max(1))
            .collect()
            .await;

        let mut stats = RefreshStats::default();
        for (cache_type, id, result) in results {
            match result {
                Ok(_) => stats.refreshed += 1,
                Err(e) => {
                    stats.failed += 1;
                    warn!(cache_type = %cache_type, id = %id, error = %e, "Refresh failed");
                }
            }
        }
        stats
    }

    /// Seed the active set from the source and populate hot entries
    pub async fn warm(&self) -> Result<RefreshStats> {
        let subjects = self
            .source
            .recently_active(self.config.warm_limit)
            .await
            .map_err(CacheError::Fetch)?;
        let subjects: Vec<WarmSubject> = subjects.into_iter().take(self.config.warm_limit).collect();

        for subject in &subjects {
            self.record_activity(&subject.subject_id, subject.wallet.as_deref())
                .await;
        }

        let ids: Vec<SubjectIds> = subjects
            .into_iter()
            .map(|s| SubjectIds {
                user: Some(s.subject_id),
                wallet: s.wallet,
                token: None,
            })
            .collect();
        Ok(self.refresh_for(&ids).await)
    }

    /// Run [`RefreshScheduler::warm`] in a detached task bounded by the warm
    /// timeout. The task never fails; problems are logged.
    pub fn spawn_warm(self: &Arc<Self>) -> JoinHandle<Option<RefreshStats>> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let started = Instant::now();
            match tokio::time::timeout(scheduler.config.warm_timeout(), scheduler.warm()).await {
                Ok(Ok(stats)) => {
                    info!(
                        refreshed = stats.refreshed,
                        failed = stats.failed,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Cache warm-up complete"
                    );
                    Some(stats)
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Cache warm-up failed");
                    None
                }
                Err(_) => {
                    warn!(
                        timeout_secs = scheduler.config.warm_timeout_secs,
                        "Cache warm-up timed out"
                    );
                    None
                }
            }
        })
    }

    /// Start the subject and global refresh loops.
    ///
    /// Returns a shutdown sender that stops both loops.
    pub fn start(self: Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        if !self.config.enabled {
            info!("Refresh scheduler disabled");
            return shutdown_tx;
        }

        tokio::spawn(self.clone().run_loop(RefreshLoop::Subjects, shutdown_rx.clone()));
        tokio::spawn(self.run_loop(RefreshLoop::Globals, shutdown_rx));
        shutdown_tx
    }

    async fn run_loop(self: Arc<Self>, kind: RefreshLoop, mut shutdown_rx: watch::Receiver<bool>) {
        let period = match kind {
            RefreshLoop::Subjects => self.config.subject_refresh_interval(),
            RefreshLoop::Globals => self.config.global_refresh_interval(),
        };
        let offset = start_jitter(self.config.max_start_jitter_ms);
        info!(
            loop_kind = ?kind,
            period_secs = period.as_secs(),
            jitter_ms = offset.as_millis() as u64,
            "Refresh loop started"
        );

        tokio::select! {
            _ = tokio::time::sleep(offset) => {}
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return;
                }
            }
        }

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = match kind {
                        RefreshLoop::Subjects => self.refresh_subjects().await,
                        RefreshLoop::Globals => self.refresh_globals().await,
                    };
                    debug!(
                        loop_kind = ?kind,
                        refreshed = stats.refreshed,
                        failed = stats.failed,
                        pruned = stats.pruned,
                        "Refresh pass finished"
                    );
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(loop_kind = ?kind, "Refresh loop shutting down");
                        break;
                    }
                }
            }
        }
    }
}

fn start_jitter(max_ms: u64) -> Duration {
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::CacheConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSource {
        subject_fetches: AtomicUsize,
        global_fetches: AtomicUsize,
    }

    #[async_trait]
    impl RefreshSource for CountingSource {
        fn subject_types(&self) -> Vec<CacheType> {
            vec![CacheType::WalletBalance, CacheType::Portfolio]
        }

        async fn fetch_subject(
            &self,
            cache_type: CacheType,
            identifier: &str,
        ) -> anyhow::Result<serde_json::Value> {
            self.subject_fetches.fetch_add(1, Ordering::SeqCst);
            if identifier == "broken" {
                anyhow::bail!("upstream error for {}", identifier);
            }
            Ok(json!({ "type": cache_type.as_str(), "id": identifier }))
        }

        fn global_entries(&self) -> Vec<(CacheType, String)> {
            vec![(CacheType::PriceQuote, "SOL".to_string())]
        }

        async fn fetch_global(
            &self,
            _cache_type: CacheType,
            _identifier: &str,
        ) -> anyhow::Result<serde_json::Value> {
            self.global_fetches.fetch_add(1, Ordering::SeqCst);
            Ok(json!(142.5))
        }

        async fn recently_active(&self, limit: usize) -> anyhow::Result<Vec<WarmSubject>> {
            Ok((0..10)
                .map(|i| WarmSubject {
                    subject_id: format!("u{}", i),
                    wallet: Some(format!("w{}", i)),
                })
                .take(limit)
                .collect())
        }
    }

    async fn scheduler(config: SchedulerConfig) -> (Arc<RefreshScheduler>, Arc<CountingSource>) {
        let cache = Arc::new(Cache::from_config(&CacheConfig::default()).await.unwrap());
        let source = Arc::new(CountingSource::default());
        let scheduler = Arc::new(RefreshScheduler::new(cache, source.clone(), config));
        (scheduler, source)
    }

    #[tokio::test]
    async fn test_refresh_subjects_skips_missing_wallet() {
        let (scheduler, source) = scheduler(SchedulerConfig::default()).await;
        scheduler.record_activity("42", Some("W42")).await;
        scheduler.record_activity("7", None).await;

        let stats = scheduler.refresh_subjects().await;
        assert_eq!(stats.refreshed, 3);
        assert_eq!(stats.skipped, 1);
        assert_eq!(source.subject_fetches.load(Ordering::SeqCst), 3);

        let balance: Option<serde_json::Value> =
            scheduler.cache.get(CacheType::WalletBalance, "W42").await;
        assert_eq!(balance.unwrap()["id"], "W42");
    }

    #[tokio::test]
    async fn test_refresh_always_fetches() {
        let (scheduler, source) = scheduler(SchedulerConfig::default()).await;
        scheduler.refresh_globals().await;
        scheduler.refresh_globals().await;
        assert_eq!(source.global_fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_are_counted() {
        let (scheduler, _) = scheduler(SchedulerConfig::default()).await;
        scheduler.record_activity("broken", None).await;

        let stats = scheduler.refresh_subjects().await;
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.refreshed, 0);
    }

    #[tokio::test]
    async fn test_prune_inactive() {
        let (scheduler, _) = scheduler(SchedulerConfig {
            inactivity_threshold_secs: 0,
            ..Default::default()
        })
        .await;
        scheduler.record_activity("1", None).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(scheduler.prune().await, 1);
        assert_eq!(scheduler.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_warm_respects_limit() {
        let (scheduler, source) = scheduler(SchedulerConfig {
            warm_limit: 3,
            ..Default::default()
        })
        .await;

        let stats = scheduler.spawn_warm().await.unwrap().unwrap();
        assert_eq!(scheduler.active_count().await, 3);
        assert_eq!(stats.refreshed, 6);
        assert_eq!(source.subject_fetches.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_loops_run_and_stop() {
        let (scheduler, source) = scheduler(SchedulerConfig {
            max_start_jitter_ms: 0,
            ..Default::default()
        })
        .await;

        let shutdown = scheduler.clone().start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(source.global_fetches.load(Ordering::SeqCst), 1);
        shutdown.send(true).unwrap();
    }

    #[test]
    fn test_config_validation() {
        assert!(SchedulerConfig::default().validate().is_ok());
        let config = SchedulerConfig {
            refresh_concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
