//! Error types for cache operations
//!
//! Store failures are recovered inside the cache (a read degrades to a miss),
//! while configuration and fetch failures are surfaced to the caller.

use thiserror::Error;

/// Main error type for cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// A backing store rejected or failed an operation
    #[error("Store '{store}' unavailable: {reason}")]
    StoreUnavailable { store: String, reason: String },

    /// A backing store call exceeded its timeout
    #[error("Store '{store}' timed out after {timeout_ms}ms")]
    Timeout { store: String, timeout_ms: u64 },

    /// Configuration error, fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// A cache type name that is not part of the known set
    #[error("Unknown cache type: {0}")]
    UnknownCacheType(String),

    /// The caller-supplied fetch function failed; the source error is kept as-is
    #[error("Fetch failed: {0}")]
    Fetch(#[source] anyhow::Error),

    /// The caller deadline elapsed before the fetch completed
    #[error("Deadline of {deadline_ms}ms exceeded while fetching {key}")]
    DeadlineExceeded { key: String, deadline_ms: u64 },

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Redis driver error (wrapper)
    #[error("Redis driver error: {0}")]
    Driver(#[from] redis::RedisError),
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    /// Whether the error comes from a backing store rather than the caller
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            CacheError::StoreUnavailable { .. } | CacheError::Timeout { .. } | CacheError::Driver(_)
        )
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for CacheError {
    fn from(e: serde_yaml::Error) -> Self {
        CacheError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CacheError::StoreUnavailable {
            store: "primary".to_string(),
            reason: "connection refused".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Store 'primary' unavailable: connection refused"
        );

        let timeout_error = CacheError::Timeout {
            store: "replica".to_string(),
            timeout_ms: 250,
        };
        assert!(timeout_error.to_string().contains("timed out after 250ms"));

        let unknown = CacheError::UnknownCacheType("bogus".to_string());
        assert_eq!(unknown.to_string(), "Unknown cache type: bogus");
    }

    #[test]
    fn test_store_failure_classification() {
        let store = CacheError::Timeout {
            store: "primary".to_string(),
            timeout_ms: 10,
        };
        assert!(store.is_store_failure());

        let config = CacheError::Config("missing ttl".to_string());
        assert!(!config.is_store_failure());

        let fetch = CacheError::Fetch(anyhow::anyhow!("upstream down"));
        assert!(!fetch.is_store_failure());
    }

    #[test]
    fn test_json_error_conversion() {
        let err = serde_json::from_str::<u32>("not a number").unwrap_err();
        let error: CacheError = err.into();
        assert!(matches!(error, CacheError::Serialization(_)));
    }
}
