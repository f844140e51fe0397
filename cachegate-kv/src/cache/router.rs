//! Tier selection per cache type
//!
//! The router owns every [`StoreHandle`] and answers two questions for a
//! cache type: where to write and where to read. Health flags are read on
//! every call, so a store demoted by the health monitor drops out of the
//! target lists immediately.

use crate::cache::types::CacheType;
use crate::error::{CacheError, Result};
use crate::store::{StoreHandle, StoreRole};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Which tiers receive a copy of every write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Primary only
    #[default]
    Single,
    MirrorReplica,
    MirrorEphemeral,
    MirrorBoth,
}

impl WriteMode {
    /// Roles written after the primary
    pub fn mirror_roles(&self) -> &'static [StoreRole] {
        match self {
            WriteMode::Single => &[],
            WriteMode::MirrorReplica => &[StoreRole::Replica],
            WriteMode::MirrorEphemeral => &[StoreRole::Ephemeral],
            WriteMode::MirrorBoth => &[StoreRole::Ephemeral, StoreRole::Replica],
        }
    }
}

/// Routing for one cache type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingStrategy {
    #[serde(default)]
    pub write_mode: WriteMode,

    /// Roles tried in order on read
    #[serde(default = "default_read_order")]
    pub read_order: Vec<StoreRole>,
}

fn default_read_order() -> Vec<StoreRole> {
    vec![StoreRole::Primary]
}

impl Default for RoutingStrategy {
    fn default() -> Self {
        Self {
            write_mode: WriteMode::Single,
            read_order: default_read_order(),
        }
    }
}

impl RoutingStrategy {
    pub fn new(write_mode: WriteMode, read_order: Vec<StoreRole>) -> Self {
        Self {
            write_mode,
            read_order,
        }
    }
}

/// Resolves read and write targets from the configured handles
#[derive(Debug)]
pub struct TierRouter {
    handles: Vec<Arc<StoreHandle>>,
    primary: Arc<StoreHandle>,
    strategies: [RoutingStrategy; CacheType::ALL.len()],
}

impl TierRouter {
    /// Validate the topology and build the router.
    ///
    /// Fails when there is not exactly one primary, or when a strategy names
    /// a role that has no configured handle.
    pub fn new(
        handles: Vec<Arc<StoreHandle>>,
        routing: &BTreeMap<CacheType, RoutingStrategy>,
    ) -> Result<Self> {
        let mut primaries = handles.iter().filter(|h| h.role() == StoreRole::Primary);
        let primary = primaries
            .next()
            .cloned()
            .ok_or_else(|| CacheError::Config("no primary store configured".to_string()))?;
        if let Some(extra) = primaries.next() {
            return Err(CacheError::Config(format!(
                "more than one primary store configured ('{}' and '{}')",
                primary.name(),
                extra.name()
            )));
        }

        let has_role = |role: StoreRole| handles.iter().any(|h| h.role() == role);

        let mut strategies: [RoutingStrategy; CacheType::ALL.len()] = Default::default();
        for cache_type in CacheType::ALL {
            let strategy = routing.get(&cache_type).cloned().unwrap_or_default();

            if strategy.read_order.is_empty() {
                return Err(CacheError::Config(format!(
                    "read_order for '{}' is empty",
                    cache_type
                )));
            }
            for role in &strategy.read_order {
                if !has_role(*role) {
                    return Err(CacheError::Config(format!(
                        "read_order for '{}' lists role '{}' with no configured store",
                        cache_type, role
                    )));
                }
            }
            for role in strategy.write_mode.mirror_roles() {
                if !has_role(*role) {
                    return Err(CacheError::Config(format!(
                        "write_mode for '{}' mirrors to role '{}' with no configured store",
                        cache_type, role
                    )));
                }
            }

            strategies[cache_type.index()] = strategy;
        }

        Ok(Self {
            handles,
            primary,
            strategies,
        })
    }

    pub fn primary(&self) -> &Arc<StoreHandle> {
        &self.primary
    }

    pub fn handles(&self) -> &[Arc<StoreHandle>] {
        &self.handles
    }

    pub fn strategy(&self, cache_type: CacheType) -> &RoutingStrategy {
        &self.strategies[cache_type.index()]
    }

    fn by_role(&self, role: StoreRole) -> impl Iterator<Item = &Arc<StoreHandle>> {
        self.handles.iter().filter(move |h| h.role() == role)
    }

    /// Primary first, unfiltered, then healthy mirrors
    pub fn write_targets(&self, cache_type: CacheType) -> Vec<Arc<StoreHandle>> {
        let mut targets = vec![self.primary.clone()];
        for role in self.strategy(cache_type).write_mode.mirror_roles() {
            targets.extend(self.by_role(*role).filter(|h| h.is_healthy()).cloned());
        }
        targets
    }

    /// Healthy handles in read order, or the primary alone if none are left
    pub fn read_targets(&self, cache_type: CacheType) -> Vec<Arc<StoreHandle>> {
        let mut targets: Vec<Arc<StoreHandle>> = Vec::new();
        for role in &self.strategy(cache_type).read_order {
            for handle in self.by_role(*role).filter(|h| h.is_healthy()) {
                if !targets.iter().any(|t| Arc::ptr_eq(t, handle)) {
                    targets.push(handle.clone());
                }
            }
        }

        if targets.is_empty() {
            targets.push(self.primary.clone());
        }
        targets
    }

    /// Every handle that may hold a key of this type, healthy or not
    pub fn delete_targets(&self, cache_type: CacheType) -> Vec<Arc<StoreHandle>> {
        let strategy = self.strategy(cache_type);
        let mut targets = vec![self.primary.clone()];

        let roles = strategy
            .write_mode
            .mirror_roles()
            .iter()
            .chain(strategy.read_order.iter());
        for role in roles {
            for handle in self.by_role(*role) {
                if !targets.iter().any(|t| Arc::ptr_eq(t, handle)) {
                    targets.push(handle.clone());
                }
            }
        }
        targets
    }
}
