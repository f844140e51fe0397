//! Core type definitions for the cache system

use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Cache key type - namespaced string produced by the key codec
pub type CacheKey = String;

/// Cache value type - opaque serialized payload
pub type CacheValue = Vec<u8>;

/// Category of cached data, governed by one TTL and routing policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheType {
    User,
    UserSettings,
    WalletBalance,
    Portfolio,
    MainMenu,
    TokenInfo,
    PriceQuote,
    SessionState,
}

/// Which subject identifier a cache type is keyed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    /// Application user id
    User,
    /// Wallet address
    Wallet,
    /// Token mint / contract address
    Token,
    /// Subject-independent entry (e.g. a price symbol)
    Global,
}

impl CacheType {
    /// Every known cache type, in declaration order
    pub const ALL: [CacheType; 8] = [
        CacheType::User,
        CacheType::UserSettings,
        CacheType::WalletBalance,
        CacheType::Portfolio,
        CacheType::MainMenu,
        CacheType::TokenInfo,
        CacheType::PriceQuote,
        CacheType::SessionState,
    ];

    /// Stable name used in keys and configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheType::User => "user",
            CacheType::UserSettings => "user_settings",
            CacheType::WalletBalance => "wallet_balance",
            CacheType::Portfolio => "portfolio",
            CacheType::MainMenu => "main_menu",
            CacheType::TokenInfo => "token_info",
            CacheType::PriceQuote => "price_quote",
            CacheType::SessionState => "session_state",
        }
    }

    /// Position in [`CacheType::ALL`], used for per-type tables
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// The identifier this type is keyed by
    pub fn identifier_kind(&self) -> IdentifierKind {
        match self {
            CacheType::User
            | CacheType::UserSettings
            | CacheType::Portfolio
            | CacheType::MainMenu
            | CacheType::SessionState => IdentifierKind::User,
            CacheType::WalletBalance => IdentifierKind::Wallet,
            CacheType::TokenInfo => IdentifierKind::Token,
            CacheType::PriceQuote => IdentifierKind::Global,
        }
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheType {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CacheType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CacheError::UnknownCacheType(s.to_string()))
    }
}

/// Statistics and metrics for cache performance monitoring
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CacheStats {
    /// Total number of cache hits
    pub hits: u64,

    /// Total number of cache misses
    pub misses: u64,

    /// Store or decode failures recovered as misses, plus failed primary writes
    pub errors: u64,

    /// Successful primary writes
    pub writes: u64,

    /// Keys removed by delete or invalidation
    pub deletes: u64,

    /// Best-effort mirror writes that failed
    pub mirror_failures: u64,

    /// Calls made to a fetch function
    pub fetches: u64,

    /// Fetch functions that returned an error or missed their deadline
    pub fetch_errors: u64,

    /// Rolling average operation latency in milliseconds
    pub avg_latency_ms: f64,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, errors: {}, writes: {}, deletes: {}, avg_latency: {:.3}ms }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.errors,
            self.writes,
            self.deletes,
            self.avg_latency_ms
        )
    }
}
