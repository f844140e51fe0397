//! Store liveness tracking
//!
//! The [`HealthMonitor`] probes every [`StoreHandle`] on a fixed interval and
//! is the only writer of their health flags. A single failed probe demotes a
//! store; it is promoted again after `recovery_threshold` consecutive
//! successful probes.

use crate::store::{StoreHandle, StoreRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Probe scheduling and hysteresis settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub probe_interval_ms: u64,
    /// Upper bound for a single probe
    pub probe_timeout_ms: u64,
    /// Consecutive successful probes before an unhealthy store is used again
    pub recovery_threshold: u32,
    /// Successful probes slower than this are reported as degraded
    pub degraded_threshold_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: 5_000,
            probe_timeout_ms: 500,
            recovery_threshold: 3,
            degraded_threshold_ms: 100,
        }
    }
}

impl HealthConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Health status of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Store answered within the degraded threshold
    Healthy,
    /// Store answered, but slowly
    Degraded,
    /// Store failed or timed out
    Unhealthy,
}

impl HealthStatus {
    /// Convert to HTTP status code equivalent
    pub fn to_http_status_code(&self) -> u16 {
        match self {
            HealthStatus::Healthy => 200,
            HealthStatus::Degraded => 200,
            HealthStatus::Unhealthy => 503,
        }
    }

    /// Check if status is healthy or degraded (operational)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

/// Raw result of one probe, before hysteresis is applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success { latency: Duration },
    Failure { latency: Duration, error: String },
}

impl ProbeOutcome {
    pub fn success() -> Self {
        ProbeOutcome::Success {
            latency: Duration::ZERO,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        ProbeOutcome::Failure {
            latency: Duration::ZERO,
            error: error.into(),
        }
    }

    fn latency(&self) -> Duration {
        match self {
            ProbeOutcome::Success { latency } | ProbeOutcome::Failure { latency, .. } => *latency,
        }
    }
}

/// A change of a store's healthy flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthTransition {
    Demoted,
    Recovered,
}

/// Outcome of one probe after it was applied to the store's state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub store: String,
    pub role: StoreRole,
    pub status: HealthStatus,
    pub response_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
    /// Routing flag after this probe
    pub healthy: bool,
    pub transition: Option<HealthTransition>,
}

/// Probes stores and maintains their health flags
#[derive(Debug)]
pub struct HealthMonitor {
    handles: Vec<Arc<StoreHandle>>,
    config: HealthConfig,
}

impl HealthMonitor {
    pub fn new(handles: Vec<Arc<StoreHandle>>, config: HealthConfig) -> Self {
        Self { handles, config }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Apply a probe outcome to `handle` and log any transition
    pub fn record_probe(&self, handle: &StoreHandle, outcome: ProbeOutcome) -> ProbeResult {
        let latency = outcome.latency();
        let response_time_ms = latency.as_millis() as u64;

        let (status, error, transition) = match outcome {
            ProbeOutcome::Success { .. } => {
                let recovered = handle
                    .health()
                    .record_success(latency, self.config.recovery_threshold);
                if recovered {
                    info!(
                        store = %handle.name(),
                        role = %handle.role(),
                        successes = handle.health().consecutive_successes(),
                        "Store recovered, routing traffic to it again"
                    );
                }
                let status = if response_time_ms > self.config.degraded_threshold_ms {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                };
                (status, None, recovered.then_some(HealthTransition::Recovered))
            }
            ProbeOutcome::Failure { error, .. } => {
                let demoted = handle.health().record_failure(latency);
                if demoted {
                    warn!(
                        store = %handle.name(),
                        role = %handle.role(),
                        error = %error,
                        "Store probe failed, marking unavailable"
                    );
                } else {
                    debug!(store = %handle.name(), error = %error, "Store still unavailable");
                }
                (
                    HealthStatus::Unhealthy,
                    Some(error),
                    demoted.then_some(HealthTransition::Demoted),
                )
            }
        };

        ProbeResult {
            store: handle.name().to_string(),
            role: handle.role(),
            status,
            response_time_ms,
            timestamp: Utc::now(),
            error,
            healthy: handle.is_healthy(),
            transition,
        }
    }

    /// Probe one store, bounded by the probe timeout
    pub async fn probe(&self, handle: &StoreHandle) -> ProbeResult {
        let start = Instant::now();
        let outcome = match handle.ping(self.config.probe_timeout()).await {
            Ok(()) => ProbeOutcome::Success {
                latency: start.elapsed(),
            },
            Err(e) => ProbeOutcome::Failure {
                latency: start.elapsed(),
                error: e.to_string(),
            },
        };
        self.record_probe(handle, outcome)
    }

    /// One probe round across all stores, run concurrently
    pub async fn probe_all(&self) -> Vec<ProbeResult> {
        futures::future::join_all(self.handles.iter().map(|h| self.probe(h))).await
    }

    /// Current routing flag per store name
    pub fn snapshot(&self) -> BTreeMap<String, bool> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.is_healthy()))
            .collect()
    }

    /// Whether the primary store is currently routable
    pub fn primary_healthy(&self) -> bool {
        self.handles
            .iter()
            .filter(|h| h.role() == StoreRole::Primary)
            .all(|h| h.is_healthy())
    }

    /// Start the probe loop in a background task.
    ///
    /// Returns a shutdown sender that can be used to stop the loop.
    pub fn start(self: Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.spawn(shutdown_rx);
        shutdown_tx
    }

    /// Run the probe loop until `shutdown_rx` flips to true
    pub fn spawn(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                stores = self.handles.len(),
                probe_interval_ms = self.config.probe_interval_ms,
                recovery_threshold = self.config.recovery_threshold,
                "Health monitor started"
            );

            let mut ticker = interval(self.config.probe_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.probe_all().await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("Health monitor shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::types::CacheValue;
    use crate::error::{CacheError, Result};
    use crate::store::{KvStore, MemoryStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlakyStore {
        up: AtomicBool,
    }

    #[async_trait]
    impl KvStore for FlakyStore {
        fn backend(&self) -> &'static str {
            "flaky"
        }

        async fn get(&self, _key: &str) -> Result<Option<CacheValue>> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: CacheValue, _ttl: Option<Duration>) -> Result<()> {
            Ok(())
        }

        async fn delete(&self, _key: &str) -> Result<bool> {
            Ok(false)
        }

        async fn ping(&self) -> Result<()> {
            if self.up.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(CacheError::StoreUnavailable {
                    store: "flaky".to_string(),
                    reason: "connection refused".to_string(),
                })
            }
        }
    }

    fn memory_handle(name: &str, role: StoreRole) -> Arc<StoreHandle> {
        Arc::new(StoreHandle::new(
            name,
            role,
            Arc::new(MemoryStore::new(8)),
            Duration::from_millis(100),
        ))
    }

    #[test]
    fn test_health_status_http_codes() {
        assert_eq!(HealthStatus::Healthy.to_http_status_code(), 200);
        assert_eq!(HealthStatus::Degraded.to_http_status_code(), 200);
        assert_eq!(HealthStatus::Unhealthy.to_http_status_code(), 503);
        assert!(HealthStatus::Degraded.is_operational());
        assert!(!HealthStatus::Unhealthy.is_operational());
    }

    #[test]
    fn test_hysteresis_three() {
        let handle = memory_handle("primary", StoreRole::Primary);
        let monitor = HealthMonitor::new(
            vec![handle.clone()],
            HealthConfig {
                recovery_threshold: 3,
                ..Default::default()
            },
        );

        let result = monitor.record_probe(&handle, ProbeOutcome::failure("down"));
        assert_eq!(result.transition, Some(HealthTransition::Demoted));
        assert!(!handle.is_healthy());

        assert!(!monitor.record_probe(&handle, ProbeOutcome::success()).healthy);
        assert!(!monitor.record_probe(&handle, ProbeOutcome::success()).healthy);

        let result = monitor.record_probe(&handle, ProbeOutcome::success());
        assert!(result.healthy);
        assert_eq!(result.transition, Some(HealthTransition::Recovered));
    }

    #[test]
    fn test_failure_resets_recovery() {
        let handle = memory_handle("replica", StoreRole::Replica);
        let monitor = HealthMonitor::new(vec![handle.clone()], HealthConfig::default());

        monitor.record_probe(&handle, ProbeOutcome::failure("down"));
        monitor.record_probe(&handle, ProbeOutcome::success());
        monitor.record_probe(&handle, ProbeOutcome::success());
        let result = monitor.record_probe(&handle, ProbeOutcome::failure("down again"));
        assert_eq!(result.transition, None);
        assert_eq!(result.error.as_deref(), Some("down again"));

        monitor.record_probe(&handle, ProbeOutcome::success());
        monitor.record_probe(&handle, ProbeOutcome::success());
        assert!(!handle.is_healthy());
        monitor.record_probe(&handle, ProbeOutcome::success());
        assert!(handle.is_healthy());
    }

    #[test]
    fn test_slow_success_is_degraded() {
        let handle = memory_handle("primary", StoreRole::Primary);
        let monitor = HealthMonitor::new(vec![handle.clone()], HealthConfig::default());

        let result = monitor.record_probe(
            &handle,
            ProbeOutcome::Success {
                latency: Duration::from_millis(250),
            },
        );
        assert_eq!(result.status, HealthStatus::Degraded);
        assert!(result.healthy);
    }

    #[tokio::test]
    async fn test_probe_all_and_snapshot() {
        let flaky = Arc::new(FlakyStore {
            up: AtomicBool::new(false),
        });
        let primary = memory_handle("primary", StoreRole::Primary);
        let replica = Arc::new(StoreHandle::new(
            "replica",
            StoreRole::Replica,
            flaky.clone(),
            Duration::from_millis(100),
        ));
        let monitor = HealthMonitor::new(
            vec![primary, replica],
            HealthConfig {
                recovery_threshold: 1,
                ..Default::default()
            },
        );

        let results = monitor.probe_all().await;
        assert_eq!(results.len(), 2);
        assert_eq!(
            monitor.snapshot(),
            BTreeMap::from([("primary".to_string(), true), ("replica".to_string(), false)])
        );
        assert!(monitor.primary_healthy());

        flaky.up.store(true, Ordering::SeqCst);
        monitor.probe_all().await;
        assert_eq!(monitor.snapshot().get("replica"), Some(&true));
    }

    #[tokio::test]
    async fn test_loop_stops_on_shutdown() {
        let handle = memory_handle("primary", StoreRole::Primary);
        let monitor = Arc::new(HealthMonitor::new(
            vec![handle],
            HealthConfig {
                probe_interval_ms: 10,
                ..Default::default()
            },
        ));

        let (tx, rx) = watch::channel(false);
        let task = monitor.clone().spawn(rx);
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("monitor loop did not stop")
            .unwrap();
    }
}
