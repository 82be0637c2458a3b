//! Pre-indexed rule cache.
//!
//! Built once per configuration snapshot and read-only afterwards, so it can
//! be shared by every in-flight request without locking. Route lookups are a
//! single hash probe; tenant lookups walk four pre-sorted buckets without
//! allocating.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use super::rules::{RulePriority, RouteRule, RuleSet, TenantRule, WhitelistRule};

/// Read-only rule index for one configuration snapshot.
#[derive(Debug, Default)]
pub struct IndexedRuleCache {
    whitelist_rules: Vec<Arc<WhitelistRule>>,
    route_rules: Vec<Arc<RouteRule>>,
    tenant_rules: Vec<Arc<TenantRule>>,

    /// ASCII-lowercased route id -> candidates, `RouteWins` first
    route_index: HashMap<String, Box<[Arc<RouteRule>]>>,
    /// Tenant id -> rules, priority descending
    tenant_index: HashMap<i32, Box<[Arc<TenantRule>]>>,
    /// ASCII-lowercased client id -> rules, priority descending
    client_index: HashMap<String, Box<[Arc<TenantRule>]>>,
    any_tenant_rules: Box<[Arc<TenantRule>]>,
    any_client_rules: Box<[Arc<TenantRule>]>,
}

/// Size of each index, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub whitelist_rules: usize,
    pub route_rules: usize,
    pub tenant_rules: usize,
    pub indexed_routes: usize,
    pub tenant_buckets: usize,
    pub client_buckets: usize,
    pub any_tenant_rules: usize,
    pub any_client_rules: usize,
}

/// ASCII-lowercase a key, borrowing when it is already lowercase.
///
/// Index keys are therefore ASCII case-insensitive; non-ASCII letters are
/// compared as written.
fn fold_key(key: &str) -> Cow<'_, str> {
    if key.bytes().any(|b| b.is_ascii_uppercase()) {
        Cow::Owned(key.to_ascii_lowercase())
    } else {
        Cow::Borrowed(key)
    }
}

fn sort_by_priority(mut rules: Vec<Arc<TenantRule>>) -> Box<[Arc<TenantRule>]> {
    // Stable: equal priorities keep configuration order.
    rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    rules.into_boxed_slice()
}

impl IndexedRuleCache {
    /// Build the indexes for a rule set.
    pub fn new(rules: RuleSet) -> Self {
        let RuleSet {
            whitelist,
            routes,
            tenants,
        } = rules;

        let route_index = Self::build_route_index(&routes);
        let (tenant_index, client_index, any_tenant_rules, any_client_rules) =
            Self::build_tenant_indexes(&tenants);

        let cache = Self {
            whitelist_rules: whitelist,
            route_rules: routes,
            tenant_rules: tenants,
            route_index,
            tenant_index,
            client_index,
            any_tenant_rules,
            any_client_rules,
        };

        debug!(stats = ?cache.stats(), "Built indexed rule cache");
        cache
    }

    fn build_route_index(routes: &[Arc<RouteRule>]) -> HashMap<String, Box<[Arc<RouteRule>]>> {
        let mut buckets: HashMap<String, Vec<Arc<RouteRule>>> = HashMap::new();

        for rule in routes.iter().filter(|r| r.enabled) {
            if !rule.is_indexable() {
                warn!(rule = %rule.name, "Skipping enabled route rule without a route id");
                continue;
            }

            buckets
                .entry(rule.route_id.to_ascii_lowercase())
                .or_default()
                .push(Arc::clone(rule));
        }

        buckets
            .into_iter()
            .map(|(route_id, mut bucket)| {
                bucket.sort_by_key(|r| r.priority != RulePriority::RouteWins);
                (route_id, bucket.into_boxed_slice())
            })
            .collect()
    }

    #[allow(clippy::type_complexity)]
    fn build_tenant_indexes(
        tenants: &[Arc<TenantRule>],
    ) -> (
        HashMap<i32, Box<[Arc<TenantRule>]>>,
        HashMap<String, Box<[Arc<TenantRule>]>>,
        Box<[Arc<TenantRule>]>,
        Box<[Arc<TenantRule>]>,
    ) {
        let mut by_tenant: HashMap<i32, Vec<Arc<TenantRule>>> = HashMap::new();
        let mut by_client: HashMap<String, Vec<Arc<TenantRule>>> = HashMap::new();
        let mut any_tenant = Vec::new();
        let mut any_client = Vec::new();

        for rule in tenants.iter().filter(|r| r.enabled) {
            if rule.matches_any_tenant() {
                any_tenant.push(Arc::clone(rule));
            } else {
                for tenant_id in &rule.tenant_ids {
                    by_tenant.entry(*tenant_id).or_default().push(Arc::clone(rule));
                }
            }

            if rule.matches_any_client() {
                any_client.push(Arc::clone(rule));
            } else {
                for client_id in &rule.client_ids {
                    let bucket = by_client.entry(client_id.to_ascii_lowercase()).or_default();
                    // Ids differing only in case share a bucket; list the rule once.
                    if !bucket.last().is_some_and(|last| Arc::ptr_eq(last, rule)) {
                        bucket.push(Arc::clone(rule));
                    }
                }
            }
        }

        (
            by_tenant
                .into_iter()
                .map(|(id, rules)| (id, sort_by_priority(rules)))
                .collect(),
            by_client
                .into_iter()
                .map(|(id, rules)| (id, sort_by_priority(rules)))
                .collect(),
            sort_by_priority(any_tenant),
            sort_by_priority(any_client),
        )
    }

    /// Whitelist rules in evaluation order.
    pub fn whitelist_rules(&self) -> &[Arc<WhitelistRule>] {
        &self.whitelist_rules
    }

    /// All route rules as configured.
    pub fn route_rules(&self) -> &[Arc<RouteRule>] {
        &self.route_rules
    }

    /// All tenant rules as configured.
    pub fn tenant_rules(&self) -> &[Arc<TenantRule>] {
        &self.tenant_rules
    }

    /// All route rule candidates for a route, best first.
    pub fn route_candidates(&self, route_id: Option<&str>) -> &[Arc<RouteRule>] {
        route_id
            .filter(|id| !id.trim().is_empty())
            .and_then(|id| self.route_index.get(&*fold_key(id)))
            .map(|bucket| &bucket[..])
            .unwrap_or(&[])
    }

    /// The best route rule for a route, if any.
    pub fn try_get_route_rule(&self, route_id: Option<&str>) -> Option<&RouteRule> {
        self.route_candidates(route_id).first().map(|rule| rule.as_ref())
    }

    fn tenant_bucket(&self, tenant_id: Option<i32>) -> &[Arc<TenantRule>] {
        tenant_id
            .and_then(|id| self.tenant_index.get(&id))
            .map(|bucket| &bucket[..])
            .unwrap_or(&[])
    }

    fn client_bucket(&self, client_id: Option<&str>) -> &[Arc<TenantRule>] {
        client_id
            .filter(|id| !id.trim().is_empty())
            .and_then(|id| self.client_index.get(&*fold_key(id)))
            .map(|bucket| &bucket[..])
            .unwrap_or(&[])
    }

    /// Tenant rule candidates for an actor.
    ///
    /// Yields the exact-tenant bucket, then the exact-client bucket, then the
    /// any-tenant and any-client buckets, each sorted by descending priority.
    /// A rule may appear more than once. Callers stop at the first candidate
    /// their resolver accepts.
    pub fn tenant_rule_candidates<'a>(
        &'a self,
        tenant_id: Option<i32>,
        client_id: Option<&str>,
    ) -> impl Iterator<Item = &'a TenantRule> + 'a {
        self.tenant_bucket(tenant_id)
            .iter()
            .chain(self.client_bucket(client_id))
            .chain(self.any_tenant_rules.iter())
            .chain(self.any_client_rules.iter())
            .map(|rule| rule.as_ref())
    }

    /// Whether any tenant rule candidate exists for an actor.
    pub fn has_tenant_candidates(&self, tenant_id: Option<i32>, client_id: Option<&str>) -> bool {
        !self.tenant_bucket(tenant_id).is_empty()
            || !self.client_bucket(client_id).is_empty()
            || !self.any_tenant_rules.is_empty()
            || !self.any_client_rules.is_empty()
    }

    /// Index sizes.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            whitelist_rules: self.whitelist_rules.len(),
            route_rules: self.route_rules.len(),
            tenant_rules: self.tenant_rules.len(),
            indexed_routes: self.route_index.len(),
            tenant_buckets: self.tenant_index.len(),
            client_buckets: self.client_index.len(),
            any_tenant_rules: self.any_tenant_rules.len(),
            any_client_rules: self.any_client_rules.len(),
        }
    }
}
