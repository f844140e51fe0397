//! Cache entry with optional TTL

use crate::cache::types::{CacheKey, CacheValue};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// A stored value together with its write time and lifetime.
///
/// Entries are never patched in place: every `set` builds a new entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cache key
    pub key: CacheKey,

    /// The serialized value
    pub value: CacheValue,

    /// When the entry was written
    pub written_at: DateTime<Utc>,

    /// Time-to-live; `None` never expires
    pub ttl: Option<Duration>,
}

impl CacheEntry {
    /// Create a new entry written now
    pub fn new(key: CacheKey, value: CacheValue, ttl: Option<Duration>) -> Self {
        Self {
            key,
            value,
            written_at: Utc::now(),
            ttl,
        }
    }

    /// Absolute expiry time, if the entry has a TTL
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl = self.ttl?;
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        self.written_at.checked_add_signed(ttl)
    }

    /// Check if the entry has expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Get time until expiration; `None` when expired or permanent
    pub fn time_until_expiration(&self) -> Option<Duration> {
        let remaining = self.expires_at()? - Utc::now();
        remaining.to_std().ok()
    }

    /// Get the age of the entry
    pub fn age(&self) -> Duration {
        (Utc::now() - self.written_at)
            .to_std()
            .unwrap_or(Duration::from_secs(0))
    }

    /// Approximate size: key + value
    pub fn size_bytes(&self) -> usize {
        self.key.len() + self.value.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_cache_entry_creation() {
        let entry = CacheEntry::new(
            "cg:user:1".to_string(),
            b"{}".to_vec(),
            Some(Duration::from_secs(3600)),
        );

        assert_eq!(entry.key, "cg:user:1");
        assert!(!entry.is_expired());
        assert!(entry.expires_at().is_some());
    }

    #[test]
    fn test_entry_expiration() {
        let entry = CacheEntry::new(
            "test".to_string(),
            b"value".to_vec(),
            Some(Duration::from_millis(100)),
        );

        assert!(!entry.is_expired());
        sleep(Duration::from_millis(150));
        assert!(entry.is_expired());
        assert!(entry.time_until_expiration().is_none());
    }

    #[test]
    fn test_permanent_entry_never_expires() {
        let entry = CacheEntry::new("test".to_string(), b"value".to_vec(), None);

        assert!(entry.expires_at().is_none());
        let far_future = Utc::now() + chrono::Duration::days(3650);
        assert!(!entry.is_expired_at(far_future));
    }

    #[test]
    fn test_time_until_expiration() {
        let entry = CacheEntry::new(
            "test".to_string(),
            b"value".to_vec(),
            Some(Duration::from_secs(3600)),
        );

        let time_left = entry.time_until_expiration();
        assert!(time_left.is_some());
        assert!(time_left.unwrap() <= Duration::from_secs(3600));
    }

    #[test]
    fn test_age_and_size() {
        let entry = CacheEntry::new("key".to_string(), b"value".to_vec(), None);

        sleep(Duration::from_millis(10));
        assert!(entry.age() >= Duration::from_millis(10));
        assert_eq!(entry.size_bytes(), "key".len() + "value".len());
    }
}
