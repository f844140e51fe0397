//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use cachegate_kv::{
    Cache, CacheConfig, CacheError, CacheValue, KvStore, MemoryStore, Result, StoreHandle,
    StoreRole,
};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Memory store that can be switched into a failing state
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    failing: AtomicBool,
    delete_delay_ms: AtomicU64,
    next_set_delay_ms: AtomicU64,
    pub sets: AtomicUsize,
}

impl FaultyStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delete_delay(&self, delay: Duration) {
        self.delete_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Delay only the next `set`
    pub fn delay_next_set(&self, delay: Duration) {
        self.next_set_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(CacheError::StoreUnavailable {
                store: "faulty".to_string(),
                reason: "injected failure".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KvStore for FaultyStore {
    fn backend(&self) -> &'static str {
        "faulty"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()> {
        let delay = self.next_set_delay_ms.swap(0, Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check()?;
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let delay = self.delete_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check()?;
        self.inner.delete(key).await
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }

    async fn sweep_expired(&self) -> Result<usize> {
        self.inner.sweep_expired().await
    }
}

/// Three-tier cache whose stores can fail on demand
pub struct Fixture {
    pub cache: Arc<Cache>,
    pub primary: Arc<FaultyStore>,
    pub replica: Arc<FaultyStore>,
    pub hot: Arc<FaultyStore>,
}

impl Fixture {
    pub fn handle(&self, name: &str) -> Arc<StoreHandle> {
        self.cache
            .router()
            .handles()
            .iter()
            .find(|h| h.name() == name)
            .cloned()
            .expect("store exists")
    }
}

pub fn tiered_fixture(config: CacheConfig) -> Fixture {
    let primary = Arc::new(FaultyStore::default());
    let replica = Arc::new(FaultyStore::default());
    let hot = Arc::new(FaultyStore::default());

    let handles = vec![
        Arc::new(StoreHandle::new(
            "primary",
            StoreRole::Primary,
            primary.clone(),
            Duration::from_millis(200),
        )),
        Arc::new(StoreHandle::new(
            "replica",
            StoreRole::Replica,
            replica.clone(),
            Duration::from_millis(200),
        )),
        Arc::new(StoreHandle::new(
            "hot",
            StoreRole::Ephemeral,
            hot.clone(),
            Duration::from_millis(200),
        )),
    ];

    let cache = Arc::new(Cache::from_parts(&config, handles).expect("valid config"));
    Fixture {
        cache,
        primary,
        replica,
        hot,
    }
}
