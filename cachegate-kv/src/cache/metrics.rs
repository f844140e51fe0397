//! Operation counters and latency tracking
//!
//! Every [`MetricsCollector`] owns its own `prometheus::Registry`, so two
//! caches in one process never share counters.

use crate::cache::types::CacheStats;
use crate::error::{CacheError, Result};
use prometheus::{Encoder, Gauge, IntCounter, Registry, TextEncoder};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Weight of the newest sample in the rolling latency average
const LATENCY_EWMA_ALPHA: f64 = 0.1;

/// Counters for one cache instance.
///
/// Owned by the cache and shared by `Arc`; recording never fails and never
/// blocks.
pub struct MetricsCollector {
    registry: Registry,
    hits: IntCounter,
    misses: IntCounter,
    errors: IntCounter,
    writes: IntCounter,
    deletes: IntCounter,
    mirror_failures: IntCounter,
    fetches: IntCounter,
    fetch_errors: IntCounter,
    latency_avg_ms: Gauge,
    hit_rate: Gauge,
    /// f64 bits of the EWMA in milliseconds
    latency_ewma_bits: AtomicU64,
    latency_samples: AtomicU64,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let counter = IntCounter::new(name, help)
        .map_err(|e| CacheError::Config(format!("Failed to create {}: {}", name, e)))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| CacheError::Config(format!("Failed to register {}: {}", name, e)))?;
    Ok(counter)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<Gauge> {
    let gauge = Gauge::new(name, help)
        .map_err(|e| CacheError::Config(format!("Failed to create {}: {}", name, e)))?;
    registry
        .register(Box::new(gauge.clone()))
        .map_err(|e| CacheError::Config(format!("Failed to register {}: {}", name, e)))?;
    Ok(gauge)
}

impl MetricsCollector {
    /// Create the counters and register them with a fresh registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        Ok(Self {
            hits: counter(&registry, "cachegate_hits_total", "Cache reads served from a store")?,
            misses: counter(&registry, "cachegate_misses_total", "Cache reads that found nothing")?,
            errors: counter(&registry, "cachegate_errors_total", "Store or decode failures")?,
            writes: counter(&registry, "cachegate_writes_total", "Successful primary writes")?,
            deletes: counter(&registry, "cachegate_deletes_total", "Keys removed")?,
            mirror_failures: counter(
                &registry,
                "cachegate_mirror_failures_total",
                "Failed or dropped best-effort mirror writes",
            )?,
            fetches: counter(&registry, "cachegate_fetches_total", "Fetch callbacks invoked")?,
            fetch_errors: counter(
                &registry,
                "cachegate_fetch_errors_total",
                "Fetch callbacks that failed or missed their deadline",
            )?,
            latency_avg_ms: gauge(
                &registry,
                "cachegate_latency_avg_ms",
                "Rolling average operation latency",
            )?,
            hit_rate: gauge(&registry, "cachegate_hit_rate", "Hit rate in percent")?,
            registry,
            latency_ewma_bits: AtomicU64::new(0),
            latency_samples: AtomicU64::new(0),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_hit(&self) {
        self.hits.inc();
    }

    pub fn record_miss(&self) {
        self.misses.inc();
    }

    pub fn record_error(&self) {
        self.errors.inc();
    }

    pub fn record_write(&self) {
        self.writes.inc();
    }

    pub fn record_deletes(&self, count: u64) {
        self.deletes.inc_by(count);
    }

    pub fn record_mirror_failure(&self) {
        self.mirror_failures.inc();
    }

    pub fn record_fetch(&self) {
        self.fetches.inc();
    }

    pub fn record_fetch_error(&self) {
        self.fetch_errors.inc();
    }

    pub fn record_latency(&self, elapsed: Duration) {
        let sample = elapsed.as_secs_f64() * 1000.0;
        let first = self.latency_samples.fetch_add(1, Ordering::Relaxed) == 0;

        let _ = self
            .latency_ewma_bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                let next = if first {
                    sample
                } else {
                    let current = f64::from_bits(bits);
                    current + LATENCY_EWMA_ALPHA * (sample - current)
                };
                Some(next.to_bits())
            });
        self.latency_avg_ms.set(self.avg_latency_ms());
    }

    pub fn avg_latency_ms(&self) -> f64 {
        f64::from_bits(self.latency_ewma_bits.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.get(),
            misses: self.misses.get(),
            errors: self.errors.get(),
            writes: self.writes.get(),
            deletes: self.deletes.get(),
            mirror_failures: self.mirror_failures.get(),
            fetches: self.fetches.get(),
            fetch_errors: self.fetch_errors.get(),
            avg_latency_ms: self.avg_latency_ms(),
        }
    }

    /// Prometheus text exposition of the current counters
    pub fn render_prometheus(&self) -> Result<String> {
        let stats = self.snapshot();
        self.hit_rate.set(stats.hit_rate());
        self.latency_avg_ms.set(stats.avg_latency_ms);

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| CacheError::Serialization(format!("Failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer)
            .map_err(|e| CacheError::Serialization(format!("Metrics are not UTF-8: {}", e)))
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("stats", &self.snapshot())
            .finish()
    }
}
