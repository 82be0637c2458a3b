//! Swappable rule snapshots.
//!
//! A configuration change builds a complete [`RuleSnapshot`] off to the side
//! and publishes it with one atomic pointer swap. Readers load the current
//! snapshot once per request and keep using it even if a newer one is
//! published meanwhile.

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::info;

use super::cache::IndexedRuleCache;
use super::rules::RuleSet;
use super::strategy::StrategyDescriptor;

/// One immutable configuration generation.
#[derive(Debug)]
pub struct RuleSnapshot {
    pub cache: IndexedRuleCache,
    /// Strategy applied when no rule matches
    pub global_default: StrategyDescriptor,
    /// Generation number, assigned by [`RuleStore`]
    pub version: u64,
    pub loaded_at: DateTime<Utc>,
}

impl RuleSnapshot {
    /// Index a rule set into a new snapshot.
    pub fn new(rules: RuleSet, global_default: StrategyDescriptor) -> Self {
        Self {
            cache: IndexedRuleCache::new(rules),
            global_default,
            version: 0,
            loaded_at: Utc::now(),
        }
    }
}

impl Default for RuleSnapshot {
    fn default() -> Self {
        Self::new(RuleSet::new(), StrategyDescriptor::whitelist())
    }
}

/// Holder of the current [`RuleSnapshot`].
#[derive(Debug)]
pub struct RuleStore {
    current: ArcSwap<RuleSnapshot>,
    /// Serializes writers so versions increase by exactly one
    write_lock: Mutex<()>,
}

impl RuleStore {
    /// Create a store publishing `snapshot` as version 1.
    pub fn new(mut snapshot: RuleSnapshot) -> Self {
        snapshot.version = 1;
        Self {
            current: ArcSwap::from_pointee(snapshot),
            write_lock: Mutex::new(()),
        }
    }

    /// The current snapshot.
    pub fn load(&self) -> Arc<RuleSnapshot> {
        self.current.load_full()
    }

    /// Publish a new snapshot and return its version.
    pub fn replace(&self, mut snapshot: RuleSnapshot) -> u64 {
        let _guard = self.write_lock.lock();

        snapshot.version = self.current.load().version + 1;
        let version = snapshot.version;
        let stats = snapshot.cache.stats();
        self.current.store(Arc::new(snapshot));

        info!(
            version,
            whitelist_rules = stats.whitelist_rules,
            route_rules = stats.route_rules,
            tenant_rules = stats.tenant_rules,
            "Published rule snapshot"
        );
        version
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new(RuleSnapshot::default())
    }
}
