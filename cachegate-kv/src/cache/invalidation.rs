//! Operation-driven invalidation
//!
//! A domain operation (a sale, a settings change, a logout) names the cache
//! types it makes stale. Identifiers come from the caller per invocation via
//! [`SubjectIds`], picked according to each type's [`IdentifierKind`].

use crate::cache::types::{CacheKey, CacheType, IdentifierKind};
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const SELL: &str = "sell";
pub const BUY: &str = "buy";
pub const TRANSFER: &str = "transfer";
pub const SETTINGS_CHANGE: &str = "settings_change";
pub const WALLET_CHANGE: &str = "wallet_change";
pub const LOGOUT: &str = "logout";

/// Identifiers of the subject an operation touched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectIds {
    pub user: Option<String>,
    pub wallet: Option<String>,
    pub token: Option<String>,
}

impl SubjectIds {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            user: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn with_wallet(mut self, wallet: impl Into<String>) -> Self {
        self.wallet = Some(wallet.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Identifier for a kind; global types have no subject identifier
    pub fn for_kind(&self, kind: IdentifierKind) -> Option<&str> {
        match kind {
            IdentifierKind::User => self.user.as_deref(),
            IdentifierKind::Wallet => self.wallet.as_deref(),
            IdentifierKind::Token => self.token.as_deref(),
            IdentifierKind::Global => None,
        }
    }
}

/// Operation name to affected cache types
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationRules {
    rules: BTreeMap<String, Vec<CacheType>>,
}

impl Default for InvalidationRules {
    fn default() -> Self {
        Self {
            rules: default_rule_table(),
        }
    }
}

impl InvalidationRules {
    /// Build from a table, dropping duplicate types within a rule while
    /// keeping first-seen order
    pub fn from_table(table: BTreeMap<String, Vec<CacheType>>) -> Result<Self> {
        let mut rules = BTreeMap::new();
        for (operation, types) in table {
            if operation.trim().is_empty() {
                return Err(CacheError::Config(
                    "invalidation rule with an empty operation name".to_string(),
                ));
            }
            let mut ordered: Vec<CacheType> = Vec::with_capacity(types.len());
            for cache_type in types {
                if !ordered.contains(&cache_type) {
                    ordered.push(cache_type);
                }
            }
            rules.insert(operation, ordered);
        }
        Ok(Self { rules })
    }

    /// Types evicted by `operation`; empty for unknown operations
    pub fn affected_types(&self, operation: &str) -> &[CacheType] {
        self.rules
            .get(operation)
            .map(|types| types.as_slice())
            .unwrap_or(&[])
    }

    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(|op| op.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Built-in rule table
pub fn default_rule_table() -> BTreeMap<String, Vec<CacheType>> {
    use CacheType::*;

    BTreeMap::from([
        (SELL.to_string(), vec![WalletBalance, Portfolio, MainMenu]),
        (BUY.to_string(), vec![WalletBalance, Portfolio, MainMenu]),
        (TRANSFER.to_string(), vec![WalletBalance, Portfolio]),
        (SETTINGS_CHANGE.to_string(), vec![UserSettings, MainMenu]),
        (
            WALLET_CHANGE.to_string(),
            vec![User, WalletBalance, Portfolio, MainMenu],
        ),
        (LOGOUT.to_string(), vec![SessionState, MainMenu]),
    ])
}

/// A delete that failed on one store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteFailure {
    pub key: CacheKey,
    pub store: String,
    pub error: String,
}

/// Outcome of one `invalidate` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationReport {
    pub operation: String,
    /// Keys removed from at least one store
    pub deleted: Vec<CacheKey>,
    pub failed: Vec<DeleteFailure>,
    /// Types skipped because the subject identifier was missing
    pub skipped: Vec<CacheType>,
    /// Deletes abandoned when the invalidation timeout elapsed
    pub timed_out: usize,
}

impl InvalidationReport {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    /// No failures and nothing abandoned
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.timed_out == 0
    }
}

impl fmt::Display for InvalidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalidate '{}': {} deleted, {} failed, {} skipped, {} timed out",
            self.operation,
            self.deleted.len(),
            self.failed.len(),
            self.skipped.len(),
            self.timed_out
        )
    }
}
