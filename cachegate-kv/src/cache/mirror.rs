//! Best-effort mirror writes
//!
//! After the primary write succeeds, copies to mirror tiers are queued here.
//! Each mirror store gets one lane: a task that applies that store's writes
//! and deletes strictly in submission order, so a later write or delete of a
//! key always lands after an earlier one. Failures are logged and counted,
//! never returned to the caller.

use crate::cache::metrics::MetricsCollector;
use crate::cache::types::{CacheKey, CacheValue};
use crate::error::Result;
use crate::store::StoreHandle;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One pending mirror write
#[derive(Debug)]
pub struct MirrorJob {
    pub handle: Arc<StoreHandle>,
    pub key: CacheKey,
    pub value: CacheValue,
    pub ttl: Option<Duration>,
}

/// What happened to in-flight writes at shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Writes still queued or running when the grace period ran out
    pub aborted: usize,
}

enum LaneOp {
    Write {
        key: CacheKey,
        value: CacheValue,
        ttl: Option<Duration>,
    },
    /// `reply` is None for deletes issued in place of a dropped write
    Delete {
        key: CacheKey,
        reply: Option<oneshot::Sender<Result<bool>>>,
    },
}

#[derive(Default)]
struct Lanes {
    senders: HashMap<String, mpsc::UnboundedSender<LaneOp>>,
    workers: Vec<JoinHandle<()>>,
    closed: bool,
}

/// Per-store ordered lanes for mirror writes
pub struct MirrorWriter {
    lanes: Mutex<Lanes>,
    pending: Arc<AtomicUsize>,
    capacity: usize,
    metrics: Arc<MetricsCollector>,
}

impl MirrorWriter {
    /// `capacity` bounds the writes queued across all lanes
    pub fn new(capacity: usize, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            lanes: Mutex::new(Lanes::default()),
            pending: Arc::new(AtomicUsize::new(0)),
            capacity: capacity.max(1),
            metrics,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lanes> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sender for `handle`'s lane, spawning the lane on first use.
    /// None once the writer is shut down.
    fn lane(&self, handle: &Arc<StoreHandle>) -> Option<mpsc::UnboundedSender<LaneOp>> {
        let mut lanes = self.lock();
        if lanes.closed {
            return None;
        }
        if let Some(sender) = lanes.senders.get(handle.name()) {
            return Some(sender.clone());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_lane(
            handle.clone(),
            rx,
            self.pending.clone(),
            self.metrics.clone(),
        ));
        lanes.senders.insert(handle.name().to_string(), tx.clone());
        lanes.workers.push(worker);
        debug!(store = %handle.name(), "Mirror lane started");
        Some(tx)
    }

    /// Queue a write without waiting.
    ///
    /// When the queue is full the write is dropped and replaced by a delete
    /// of the key, so the mirror misses instead of keeping an older value.
    /// A dropped write counts as a mirror failure.
    pub fn submit(&self, job: MirrorJob) {
        let Some(lane) = self.lane(&job.handle) else {
            self.metrics.record_mirror_failure();
            debug!(store = %job.handle.name(), key = %job.key, "Mirror writer stopped, dropping write");
            return;
        };

        let op = if self.pending.fetch_add(1, Ordering::AcqRel) < self.capacity {
            LaneOp::Write {
                key: job.key,
                value: job.value,
                ttl: job.ttl,
            }
        } else {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            self.metrics.record_mirror_failure();
            warn!(store = %job.handle.name(), key = %job.key, "Mirror queue full, dropping write");
            LaneOp::Delete {
                key: job.key,
                reply: None,
            }
        };

        if let Err(mpsc::error::SendError(op)) = lane.send(op) {
            if let LaneOp::Write { key, .. } = op {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                self.metrics.record_mirror_failure();
                debug!(store = %job.handle.name(), key = %key, "Mirror lane closed, dropping write");
            }
        }
    }

    /// Delete `key` from `handle`, ordered after every mirror write already
    /// queued for that store.
    ///
    /// Stores without a lane, and every store after shutdown, are deleted
    /// from directly.
    pub async fn delete(&self, handle: &Arc<StoreHandle>, key: &str) -> Result<bool> {
        let lane = {
            let lanes = self.lock();
            if lanes.closed {
                None
            } else {
                lanes.senders.get(handle.name()).cloned()
            }
        };

        if let Some(lane) = lane {
            let (reply_tx, reply_rx) = oneshot::channel();
            let op = LaneOp::Delete {
                key: key.to_string(),
                reply: Some(reply_tx),
            };
            if lane.send(op).is_ok() {
                if let Ok(result) = reply_rx.await {
                    return result;
                }
            }
        }
        handle.delete(key).await
    }

    /// Writes queued or running on any lane
    pub fn queued(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Stop accepting work, let pending writes finish for up to `grace`,
    /// then abort the rest. Later calls return an empty report.
    pub async fn shutdown(&self, grace: Duration) -> DrainReport {
        let mut workers = {
            let mut lanes = self.lock();
            if lanes.closed {
                return DrainReport::default();
            }
            lanes.closed = true;
            // Dropping the senders lets each lane finish its queue and exit
            lanes.senders.clear();
            std::mem::take(&mut lanes.workers)
        };

        let pending = self.queued();
        if pending > 0 {
            info!(pending, lanes = workers.len(), "Draining mirror writes");
        }

        // Lanes before `joined` have exited and their handles are consumed
        let mut joined = 0;
        let drain = async {
            while joined < workers.len() {
                let _ = (&mut workers[joined]).await;
                joined += 1;
            }
        };
        if tokio::time::timeout(grace, drain).await.is_ok() {
            return DrainReport::default();
        }

        let stalled = &mut workers[joined..];
        for worker in stalled.iter() {
            worker.abort();
        }
        for worker in stalled.iter_mut() {
            let _ = worker.await;
        }

        let aborted = self.pending.swap(0, Ordering::AcqRel);
        for _ in 0..aborted {
            self.metrics.record_mirror_failure();
        }
        warn!(aborted, "Mirror drain grace elapsed, aborted pending writes");
        DrainReport { aborted }
    }
}

impl std::fmt::Debug for MirrorWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorWriter")
            .field("queued", &self.queued())
            .field("capacity", &self.capacity)
            .finish()
    }
}

async fn run_lane(
    handle: Arc<StoreHandle>,
    mut rx: mpsc::UnboundedReceiver<LaneOp>,
    pending: Arc<AtomicUsize>,
    metrics: Arc<MetricsCollector>,
) {
    while let Some(op) = rx.recv().await {
        match op {
            LaneOp::Write { key, value, ttl } => {
                match handle.set(&key, value, ttl).await {
                    Ok(()) => debug!(store = %handle.name(), key = %key, "Mirror write complete"),
                    Err(e) => {
                        metrics.record_mirror_failure();
                        warn!(store = %handle.name(), key = %key, error = %e, "Mirror write failed");
                    }
                }
                pending.fetch_sub(1, Ordering::AcqRel);
            }
            LaneOp::Delete { key, reply } => {
                let result = handle.delete(&key).await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            warn!(store = %handle.name(), key = %key, error = %e, "Mirror delete failed");
                        }
                    }
                }
            }
        }
    }
    debug!(store = %handle.name(), "Mirror lane stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::store::{KvStore, MemoryStore, StoreRole};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    struct StallingStore;

    #[async_trait]
    impl KvStore for StallingStore {
        fn backend(&self) -> &'static str {
            "stalling"
        }

        async fn get(&self, _key: &str) -> Result<Option<CacheValue>> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: CacheValue, _ttl: Option<Duration>) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        }

        async fn delete(&self, _key: &str) -> Result<bool> {
            Ok(false)
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Memory store whose first write is slow
    #[derive(Default)]
    struct SlowFirstWrite {
        inner: MemoryStore,
        delayed: AtomicBool,
    }

    #[async_trait]
    impl KvStore for SlowFirstWrite {
        fn backend(&self) -> &'static str {
            "slow-first-write"
        }

        async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()> {
            if !self.delayed.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<bool> {
            self.inner.delete(key).await
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    fn job(handle: &Arc<StoreHandle>, key: &str) -> MirrorJob {
        job_with(handle, key, b"1")
    }

    fn job_with(handle: &Arc<StoreHandle>, key: &str, value: &[u8]) -> MirrorJob {
        MirrorJob {
            handle: handle.clone(),
            key: key.to_string(),
            value: value.to_vec(),
            ttl: None,
        }
    }

    fn slow_replica() -> Arc<StoreHandle> {
        Arc::new(StoreHandle::new(
            "replica",
            StoreRole::Replica,
            Arc::new(SlowFirstWrite::default()),
            Duration::from_millis(500),
        ))
    }

    fn metrics() -> Arc<MetricsCollector> {
        Arc::new(MetricsCollector::new().unwrap())
    }

    #[tokio::test]
    async fn test_mirror_write_lands() {
        let metrics = metrics();
        let writer = MirrorWriter::new(16, metrics.clone());
        let replica = Arc::new(StoreHandle::new(
            "replica",
            StoreRole::Replica,
            Arc::new(MemoryStore::new(16)),
            Duration::from_millis(100),
        ));

        writer.submit(job(&replica, "cg:user:1"));
        let report = writer.shutdown(Duration::from_secs(1)).await;

        assert_eq!(report.aborted, 0);
        assert!(replica.get("cg:user:1").await.unwrap().is_some());
        assert_eq!(metrics.snapshot().mirror_failures, 0);
    }

    #[tokio::test]
    async fn test_writes_to_one_key_land_in_order() {
        let writer = MirrorWriter::new(16, metrics());
        let replica = slow_replica();

        writer.submit(job_with(&replica, "cg:user_settings:42", b"v1"));
        writer.submit(job_with(&replica, "cg:user_settings:42", b"v2"));
        writer.shutdown(Duration::from_secs(1)).await;

        assert_eq!(
            replica.get("cg:user_settings:42").await.unwrap(),
            Some(b"v2".to_vec())
        );
    }

    #[tokio::test]
    async fn test_delete_waits_for_queued_write() {
        let writer = MirrorWriter::new(16, metrics());
        let replica = slow_replica();

        writer.submit(job(&replica, "cg:user_settings:42"));
        assert!(writer.delete(&replica, "cg:user_settings:42").await.unwrap());
        assert_eq!(writer.queued(), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(replica.get("cg:user_settings:42").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_without_lane_goes_direct() {
        let writer = MirrorWriter::new(16, metrics());
        let store = Arc::new(StoreHandle::new(
            "primary",
            StoreRole::Primary,
            Arc::new(MemoryStore::new(16)),
            Duration::from_millis(100),
        ));
        store.set("k", b"1".to_vec(), None).await.unwrap();

        assert!(writer.delete(&store, "k").await.unwrap());
        assert!(!writer.delete(&store, "k").await.unwrap());
    }

    #[tokio::test]
    async fn test_full_queue_clears_mirror_copy() {
        let metrics = metrics();
        let writer = MirrorWriter::new(1, metrics.clone());
        let replica = slow_replica();

        // The first write holds the only slot while the lane sleeps on it
        writer.submit(job_with(&replica, "a", b"old"));
        writer.submit(job_with(&replica, "a", b"new"));
        writer.shutdown(Duration::from_secs(1)).await;

        assert_eq!(metrics.snapshot().mirror_failures, 1);
        assert!(replica.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_aborts_after_grace() {
        let metrics = metrics();
        let writer = MirrorWriter::new(16, metrics.clone());
        let stalled = Arc::new(StoreHandle::new(
            "stalled",
            StoreRole::Replica,
            Arc::new(StallingStore),
            Duration::from_secs(30),
        ));

        writer.submit(job(&stalled, "a"));
        writer.submit(job(&stalled, "b"));
        let report = writer.shutdown(Duration::from_millis(50)).await;

        assert_eq!(report.aborted, 2);
        assert_eq!(metrics.snapshot().mirror_failures, 2);
        assert_eq!(writer.queued(), 0);

        writer.submit(job(&stalled, "c"));
        assert_eq!(metrics.snapshot().mirror_failures, 3);
        assert_eq!(writer.shutdown(Duration::ZERO).await, DrainReport::default());
    }

    #[tokio::test]
    async fn test_failed_mirror_is_counted() {
        let metrics = metrics();
        let writer = MirrorWriter::new(16, metrics.clone());
        let slow = Arc::new(StoreHandle::new(
            "slow",
            StoreRole::Ephemeral,
            Arc::new(StallingStore),
            Duration::from_millis(20),
        ));

        writer.submit(job(&slow, "k"));
        writer.shutdown(Duration::from_secs(1)).await;
        assert_eq!(metrics.snapshot().mirror_failures, 1);
    }
}
