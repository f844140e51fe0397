//! In-process store with TTL enforcement and bounded capacity

use crate::cache::entry::CacheEntry;
use crate::cache::types::{CacheKey, CacheValue};
use crate::error::Result;
use crate::store::KvStore;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Map-backed store used for the ephemeral tier, local runs and tests.
///
/// Expired entries are dropped lazily on read and in bulk by
/// [`KvStore::sweep_expired`]. When `max_entries` is reached the oldest
/// written key is evicted.
pub struct MemoryStore {
    max_entries: usize,
    inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    entries: HashMap<CacheKey, CacheEntry>,
    /// Write order, oldest first
    order: VecDeque<CacheKey>,
    evictions: u64,
}

impl MemoryInner {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(entry)
    }
}

impl MemoryStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            inner: RwLock::new(MemoryInner::default()),
        }
    }

    /// Number of stored entries, expired ones included until swept
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    /// Entries evicted because of the capacity bound
    pub async fn evictions(&self) -> u64 {
        self.inner.read().await.evictions
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.entries.clear();
        inner.order.clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        {
            let inner = self.inner.read().await;
            match inner.entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        // Expired: upgrade to a write lock and re-check, a concurrent set may
        // have replaced the entry meanwhile.
        let mut inner = self.inner.write().await;
        if inner.entries.get(key).is_some_and(|e| e.is_expired()) {
            debug!(key = %key, "Dropping expired entry");
            inner.remove(key);
            return Ok(None);
        }
        Ok(inner.entries.get(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()> {
        let entry = CacheEntry::new(key.to_string(), value, ttl);
        let mut inner = self.inner.write().await;

        if inner.remove(key).is_none() {
            while inner.entries.len() >= self.max_entries {
                let Some(oldest) = inner.order.pop_front() else {
                    break;
                };
                inner.entries.remove(&oldest);
                inner.evictions += 1;
                debug!(key = %oldest, "Evicting entry due to max_entries limit");
            }
        }

        inner.order.push_back(key.to_string());
        inner.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner.remove(key).is_some())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;

        let expired: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            inner.remove(key);
        }

        if !expired.is_empty() {
            debug!("Swept {} expired entries", expired.len());
        }
        Ok(expired.len())
    }
}
