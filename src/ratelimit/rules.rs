//! Rate limit rule model.
//!
//! Rules are immutable once built and shared by `Arc` between the raw rule
//! lists and the [`IndexedRuleCache`](super::IndexedRuleCache). Three layers
//! exist, evaluated in this order:
//!
//! 1. whitelist rules exempt matching traffic from limiting
//! 2. route rules apply to a proxy route
//! 3. tenant rules apply to a tenant and/or client application
//!
//! A global default strategy covers everything else.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::strategy::StrategyDescriptor;
use crate::matcher::IpPatternSet;

/// Client id wildcard.
pub const ANY_CLIENT: &str = "*";

/// Tie-break preference of a route rule when a tenant rule also matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum RulePriority {
    /// The route rule's strategy applies
    #[default]
    RouteWins,
    /// The tenant rule's strategy applies
    TenantWins,
}

impl RulePriority {
    /// Parse a priority name, case-insensitively.
    ///
    /// Anything other than `TenantWins` is `RouteWins`.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("TenantWins") {
            RulePriority::TenantWins
        } else {
            RulePriority::RouteWins
        }
    }
}

impl fmt::Display for RulePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RulePriority::RouteWins => write!(f, "RouteWins"),
            RulePriority::TenantWins => write!(f, "TenantWins"),
        }
    }
}

/// Whether a tenant id set admits a tenant. An empty set admits any tenant.
pub fn tenant_matches(tenant_ids: &BTreeSet<i32>, tenant_id: Option<i32>) -> bool {
    if tenant_ids.is_empty() {
        return true;
    }

    tenant_id.is_some_and(|id| tenant_ids.contains(&id))
}

/// Whether a client id set admits every client.
pub fn matches_any_client(client_ids: &BTreeSet<String>) -> bool {
    client_ids.is_empty() || client_ids.contains(ANY_CLIENT)
}

/// Whether a client id set admits a client.
///
/// An empty set admits every request. A set containing `*` admits any
/// request that carries a client id, but not one without.
pub fn client_matches(client_ids: &BTreeSet<String>, client_id: Option<&str>) -> bool {
    if client_ids.is_empty() {
        return true;
    }

    client_id.is_some_and(|id| {
        !id.is_empty() && (client_ids.contains(id) || client_ids.contains(ANY_CLIENT))
    })
}

/// A rule exempting matching traffic from rate limiting.
///
/// Whitelist rules carry no priority: their order in the rule list is the
/// priority, and the first enabled match wins.
#[derive(Debug)]
pub struct WhitelistRule {
    name: String,
    description: String,
    ip_patterns: BTreeSet<String>,
    ip_matcher: IpPatternSet,
    tenant_ids: BTreeSet<i32>,
    client_ids: BTreeSet<String>,
    endpoint_patterns: Vec<String>,
    enabled: bool,
}

impl WhitelistRule {
    /// Create an enabled rule that matches everything.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            ip_patterns: BTreeSet::new(),
            ip_matcher: IpPatternSet::new(Vec::<String>::new()),
            tenant_ids: BTreeSet::new(),
            client_ids: BTreeSet::new(),
            endpoint_patterns: Vec::new(),
            enabled: true,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Restrict the rule to addresses matching any of the patterns.
    pub fn with_ip_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ip_patterns = patterns.into_iter().map(Into::into).collect();
        self.ip_matcher = IpPatternSet::new(&self.ip_patterns);
        self
    }

    /// Restrict the rule to the given tenants.
    pub fn with_tenant_ids(mut self, tenant_ids: impl IntoIterator<Item = i32>) -> Self {
        self.tenant_ids = tenant_ids.into_iter().collect();
        self
    }

    /// Restrict the rule to the given clients.
    pub fn with_client_ids<I, S>(mut self, client_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.client_ids = client_ids.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict the rule to endpoints matching any of the patterns.
    pub fn with_endpoint_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.endpoint_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Enable or disable the rule.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn ip_patterns(&self) -> &BTreeSet<String> {
        &self.ip_patterns
    }

    /// Compiled form of [`ip_patterns`](Self::ip_patterns).
    pub fn ip_matcher(&self) -> &IpPatternSet {
        &self.ip_matcher
    }

    pub fn tenant_ids(&self) -> &BTreeSet<i32> {
        &self.tenant_ids
    }

    pub fn client_ids(&self) -> &BTreeSet<String> {
        &self.client_ids
    }

    pub fn endpoint_patterns(&self) -> &[String] {
        &self.endpoint_patterns
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// A rule applying a strategy to one proxy route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pub name: String,
    pub description: String,
    /// Proxy route id, compared ASCII case-insensitively
    pub route_id: String,
    /// Preference when a tenant rule also matches
    pub priority: RulePriority,
    pub strategy: StrategyDescriptor,
    pub enabled: bool,
}

impl RouteRule {
    /// Create an enabled `RouteWins` rule.
    pub fn new(
        name: impl Into<String>,
        route_id: impl Into<String>,
        strategy: StrategyDescriptor,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            route_id: route_id.into(),
            priority: RulePriority::RouteWins,
            strategy,
            enabled: true,
        }
    }

    /// Set the tie-break preference.
    pub fn with_priority(mut self, priority: RulePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Enable or disable the rule.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Whether the rule can take part in route lookups.
    pub fn is_indexable(&self) -> bool {
        self.enabled && !self.route_id.trim().is_empty()
    }
}

/// A rule applying a strategy to tenants and/or client applications.
///
/// An empty `tenant_ids` set matches any tenant and an empty `client_ids` set
/// matches any client. A `client_ids` set containing `*` matches any request
/// that carries a client id. Higher `priority` wins among candidates of the
/// same lookup bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantRule {
    pub name: String,
    pub description: String,
    pub tenant_ids: BTreeSet<i32>,
    pub client_ids: BTreeSet<String>,
    pub strategy: StrategyDescriptor,
    pub enabled: bool,
    pub priority: i32,
}

impl TenantRule {
    /// Create an enabled rule matching any tenant and client.
    pub fn new(name: impl Into<String>, strategy: StrategyDescriptor, priority: i32) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            tenant_ids: BTreeSet::new(),
            client_ids: BTreeSet::new(),
            strategy,
            enabled: true,
            priority,
        }
    }

    /// Restrict the rule to the given tenants.
    pub fn with_tenant_ids(mut self, tenant_ids: impl IntoIterator<Item = i32>) -> Self {
        self.tenant_ids = tenant_ids.into_iter().collect();
        self
    }

    /// Restrict the rule to the given clients.
    pub fn with_client_ids<I, S>(mut self, client_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.client_ids = client_ids.into_iter().map(Into::into).collect();
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Enable or disable the rule.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Whether the rule matches any tenant.
    pub fn matches_any_tenant(&self) -> bool {
        self.tenant_ids.is_empty()
    }

    /// Whether the rule matches any client.
    pub fn matches_any_client(&self) -> bool {
        matches_any_client(&self.client_ids)
    }
}

/// The three rule collections of one configuration.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    /// Whitelist rules in evaluation order
    pub whitelist: Vec<Arc<WhitelistRule>>,
    pub routes: Vec<Arc<RouteRule>>,
    pub tenants: Vec<Arc<TenantRule>>,
}

impl RuleSet {
    /// Create an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a whitelist rule.
    pub fn with_whitelist_rule(mut self, rule: WhitelistRule) -> Self {
        self.whitelist.push(Arc::new(rule));
        self
    }

    /// Append a route rule.
    pub fn with_route_rule(mut self, rule: RouteRule) -> Self {
        self.routes.push(Arc::new(rule));
        self
    }

    /// Append a tenant rule.
    pub fn with_tenant_rule(mut self, rule: TenantRule) -> Self {
        self.tenants.push(Arc::new(rule));
        self
    }

    /// Total number of rules.
    pub fn len(&self) -> usize {
        self.whitelist.len() + self.routes.len() + self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
