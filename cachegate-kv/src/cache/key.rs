//! Namespaced key construction

use crate::cache::types::{CacheKey, CacheType};
use crate::error::{CacheError, Result};

/// Default namespace prefix for every key
pub const DEFAULT_KEY_PREFIX: &str = "cg:";

/// Builds deterministic `{prefix}{type}:{identifier}` keys.
///
/// Type names never contain `:`, so keys of different types cannot collide
/// even when identifiers do.
#[derive(Debug, Clone)]
pub struct KeyCodec {
    prefix: String,
}

impl Default for KeyCodec {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

impl KeyCodec {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build the key for a typed cache entry
    pub fn key(&self, cache_type: CacheType, identifier: &str) -> CacheKey {
        format!("{}{}:{}", self.prefix, cache_type.as_str(), identifier)
    }

    /// Build a key from a type name, failing for names outside the known set
    pub fn key_for(&self, type_name: &str, identifier: &str) -> Result<CacheKey> {
        let cache_type: CacheType = type_name.parse()?;
        Ok(self.key(cache_type, identifier))
    }

    /// Split a key back into its type and identifier
    pub fn parse(&self, key: &str) -> Result<(CacheType, String)> {
        let rest = key
            .strip_prefix(self.prefix.as_str())
            .ok_or_else(|| CacheError::Config(format!("key '{}' lacks prefix '{}'", key, self.prefix)))?;
        let (type_name, identifier) = rest
            .split_once(':')
            .ok_or_else(|| CacheError::Config(format!("key '{}' has no type separator", key)))?;
        Ok((type_name.parse()?, identifier.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let codec = KeyCodec::default();
        assert_eq!(codec.key(CacheType::User, "42"), "cg:user:42");
        assert_eq!(
            codec.key(CacheType::WalletBalance, "So1anaAddr"),
            "cg:wallet_balance:So1anaAddr"
        );
    }

    #[test]
    fn test_same_identifier_different_types() {
        let codec = KeyCodec::new("app:");
        let user = codec.key(CacheType::User, "42");
        let menu = codec.key(CacheType::MainMenu, "42");
        assert_ne!(user, menu);
        assert_eq!(user, codec.key(CacheType::User, "42"));
    }

    #[test]
    fn test_key_for_unknown_type() {
        let codec = KeyCodec::default();
        assert!(codec.key_for("portfolio", "7").is_ok());
        assert!(matches!(
            codec.key_for("nonexistent", "7"),
            Err(CacheError::UnknownCacheType(_))
        ));
    }

    #[test]
    fn test_parse_identifier_with_colon() {
        let codec = KeyCodec::default();
        let key = codec.key(CacheType::SessionState, "42:flow");
        let (cache_type, identifier) = codec.parse(&key).unwrap();
        assert_eq!(cache_type, CacheType::SessionState);
        assert_eq!(identifier, "42:flow");

        assert!(codec.parse("other:user:1").is_err());
    }
}
