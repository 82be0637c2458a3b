//! Per-rule resolvers.
//!
//! A resolver decides whether one rule applies to one request and, if so,
//! which strategy it yields. Resolvers hold no state.

use tracing::trace;

use super::context::RuleResolutionContext;
use super::rules::{client_matches, tenant_matches, RouteRule, TenantRule, WhitelistRule};
use super::strategy::StrategyDescriptor;
use crate::matcher::endpoint_matches;

/// Matches a single rule against a request.
pub trait RuleResolver: Send + Sync {
    /// The rule type this resolver understands.
    type Rule;

    /// Return the strategy the rule yields for this request, or `None` when
    /// the rule does not apply.
    fn try_resolve(
        &self,
        rule: &Self::Rule,
        context: &RuleResolutionContext<'_>,
    ) -> Option<StrategyDescriptor>;
}

/// Resolver for [`WhitelistRule`]s.
///
/// A match always yields the no-op strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitelistRuleResolver;

impl WhitelistRuleResolver {
    fn ip_matches(rule: &WhitelistRule, context: &RuleResolutionContext<'_>) -> bool {
        let matcher = rule.ip_matcher();
        if matcher.is_match_any() {
            return true;
        }

        // A request without a peer address only passes open IP filters.
        context
            .remote_addr()
            .is_some_and(|addr| matcher.matches_addr(addr))
    }

    fn endpoint_allowed(rule: &WhitelistRule, context: &RuleResolutionContext<'_>) -> bool {
        let patterns = rule.endpoint_patterns();
        patterns.is_empty()
            || patterns
                .iter()
                .any(|pattern| endpoint_matches(pattern, context.method, context.path))
    }
}

impl RuleResolver for WhitelistRuleResolver {
    type Rule = WhitelistRule;

    fn try_resolve(
        &self,
        rule: &WhitelistRule,
        context: &RuleResolutionContext<'_>,
    ) -> Option<StrategyDescriptor> {
        if !rule.is_enabled() {
            return None;
        }

        let matched = Self::ip_matches(rule, context)
            && tenant_matches(rule.tenant_ids(), context.actor.tenant_id)
            && client_matches(rule.client_ids(), context.actor.client_id.as_deref())
            && Self::endpoint_allowed(rule, context);

        if !matched {
            return None;
        }

        trace!(rule = %rule.name(), "Whitelist rule matched");
        Some(StrategyDescriptor::whitelist())
    }
}

/// Resolver for [`RouteRule`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteRuleResolver;

impl RuleResolver for RouteRuleResolver {
    type Rule = RouteRule;

    fn try_resolve(
        &self,
        rule: &RouteRule,
        context: &RuleResolutionContext<'_>,
    ) -> Option<StrategyDescriptor> {
        if !rule.enabled {
            return None;
        }

        // ASCII case folding only, the same as the route index
        let route_id = context.route_id?;
        if !rule.route_id.eq_ignore_ascii_case(route_id) {
            return None;
        }

        Some(rule.strategy)
    }
}

/// Resolver for [`TenantRule`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct TenantRuleResolver;

impl RuleResolver for TenantRuleResolver {
    type Rule = TenantRule;

    fn try_resolve(
        &self,
        rule: &TenantRule,
        context: &RuleResolutionContext<'_>,
    ) -> Option<StrategyDescriptor> {
        if !rule.enabled {
            return None;
        }

        let actor = context.actor;
        if !tenant_matches(&rule.tenant_ids, actor.tenant_id)
            || !client_matches(&rule.client_ids, actor.client_id.as_deref())
        {
            return None;
        }

        Some(rule.strategy)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::actor::RequestActor;
    use crate::request::GatewayRequest;

    fn fixed(limit: u32) -> StrategyDescriptor {
        StrategyDescriptor::FixedWindow {
            permit_limit: limit,
            window: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_whitelist_open_rule_matches() {
        let request = GatewayRequest::new("GET", "/");
        let actor = RequestActor::new("anon", None, None);
        let context = RuleResolutionContext::new(&actor, &request);

        let result = WhitelistRuleResolver.try_resolve(&WhitelistRule::new("all"), &context);

        assert_eq!(result, Some(StrategyDescriptor::Whitelist));
    }

    #[test]
    fn test_whitelist_disabled_never_matches() {
        let request = GatewayRequest::new("GET", "/");
        let actor = RequestActor::new("anon", None, None);
        let context = RuleResolutionContext::new(&actor, &request);
        let rule = WhitelistRule::new("off").with_enabled(false);

        assert!(WhitelistRuleResolver.try_resolve(&rule, &context).is_none());
    }

    #[test]
    fn test_whitelist_ip_uses_remote_addr() {
        let rule = WhitelistRule::new("office").with_ip_patterns(["10.0.0.0/24"]);
        let actor = RequestActor::new("anon", None, None);

        let inside = GatewayRequest::new("GET", "/").with_remote_addr("10.0.0.5".parse().unwrap());
        let context = RuleResolutionContext::new(&actor, &inside);
        assert!(WhitelistRuleResolver.try_resolve(&rule, &context).is_some());

        // Forwarding headers do not count as the peer address
        let forwarded = GatewayRequest::new("GET", "/")
            .with_header("X-Forwarded-For", "10.0.0.5")
            .with_remote_addr("10.0.1.5".parse().unwrap());
        let context = RuleResolutionContext::new(&actor, &forwarded);
        assert!(WhitelistRuleResolver.try_resolve(&rule, &context).is_none());

        let unknown = GatewayRequest::new("GET", "/");
        let context = RuleResolutionContext::new(&actor, &unknown);
        assert!(WhitelistRuleResolver.try_resolve(&rule, &context).is_none());
    }

    #[test]
    fn test_whitelist_requires_all_conditions() {
        let rule = WhitelistRule::new("internal")
            .with_tenant_ids([7])
            .with_client_ids(["ops"])
            .with_endpoint_patterns(["GET:/admin/*", "*/health"]);
        let request = GatewayRequest::new("GET", "/admin/users");

        let matching = RequestActor::new("a", Some(7), Some("ops".to_string()));
        let context = RuleResolutionContext::new(&matching, &request);
        assert!(WhitelistRuleResolver.try_resolve(&rule, &context).is_some());

        let wrong_tenant = RequestActor::new("a", Some(8), Some("ops".to_string()));
        let context = RuleResolutionContext::new(&wrong_tenant, &request);
        assert!(WhitelistRuleResolver.try_resolve(&rule, &context).is_none());

        let wrong_client = RequestActor::new("a", Some(7), Some("web".to_string()));
        let context = RuleResolutionContext::new(&wrong_client, &request);
        assert!(WhitelistRuleResolver.try_resolve(&rule, &context).is_none());

        let wrong_endpoint = GatewayRequest::new("POST", "/admin/users");
        let context = RuleResolutionContext::new(&matching, &wrong_endpoint);
        assert!(WhitelistRuleResolver.try_resolve(&rule, &context).is_none());

        let health = GatewayRequest::new("POST", "/svc/health");
        let context = RuleResolutionContext::new(&matching, &health);
        assert!(WhitelistRuleResolver.try_resolve(&rule, &context).is_some());
    }

    #[test]
    fn test_route_resolver_case_insensitive() {
        let rule = RouteRule::new("orders", "Orders-Route", fixed(10));
        let actor = RequestActor::new("a", None, None);

        let request = GatewayRequest::new("GET", "/").with_route("orders-route");
        let context = RuleResolutionContext::new(&actor, &request);
        assert_eq!(RouteRuleResolver.try_resolve(&rule, &context), Some(fixed(10)));

        let other = GatewayRequest::new("GET", "/").with_route("billing");
        let context = RuleResolutionContext::new(&actor, &other);
        assert!(RouteRuleResolver.try_resolve(&rule, &context).is_none());
    }

    #[test]
    fn test_route_resolver_requires_route() {
        let rule = RouteRule::new("orders", "orders", fixed(10));
        let actor = RequestActor::new("a", None, None);
        let request = GatewayRequest::new("GET", "/");
        let context = RuleResolutionContext::new(&actor, &request);

        assert!(RouteRuleResolver.try_resolve(&rule, &context).is_none());

        let disabled = rule.with_enabled(false);
        let routed = GatewayRequest::new("GET", "/").with_route("orders");
        let context = RuleResolutionContext::new(&actor, &routed);
        assert!(RouteRuleResolver.try_resolve(&disabled, &context).is_none());
    }

    #[test]
    fn test_tenant_resolver() {
        let rule = TenantRule::new("gold", fixed(500), 1)
            .with_tenant_ids([1, 2])
            .with_client_ids(["web"]);
        let request = GatewayRequest::new("GET", "/");

        let actor = RequestActor::new("a", Some(2), Some("web".to_string()));
        let context = RuleResolutionContext::new(&actor, &request);
        assert_eq!(TenantRuleResolver.try_resolve(&rule, &context), Some(fixed(500)));

        let actor = RequestActor::new("a", Some(3), Some("web".to_string()));
        let context = RuleResolutionContext::new(&actor, &request);
        assert!(TenantRuleResolver.try_resolve(&rule, &context).is_none());

        let actor = RequestActor::new("a", Some(1), None);
        let context = RuleResolutionContext::new(&actor, &request);
        assert!(TenantRuleResolver.try_resolve(&rule, &context).is_none());
    }

    #[test]
    fn test_tenant_resolver_wildcard_client() {
        let rule = TenantRule::new("any", fixed(5), 1).with_client_ids(["*"]);
        let request = GatewayRequest::new("GET", "/");

        let anonymous = RequestActor::new("a", None, None);
        let context = RuleResolutionContext::new(&anonymous, &request);
        assert!(TenantRuleResolver.try_resolve(&rule, &context).is_none());

        let web = RequestActor::new("a", None, Some("web".to_string()));
        let context = RuleResolutionContext::new(&web, &request);
        assert_eq!(TenantRuleResolver.try_resolve(&rule, &context), Some(fixed(5)));
    }

    #[test]
    fn test_whitelist_wildcard_client_needs_client_id() {
        let rule = WhitelistRule::new("apps").with_client_ids(["*"]);
        let request = GatewayRequest::new("GET", "/");

        let anonymous = RequestActor::new("anon", None, None);
        let context = RuleResolutionContext::new(&anonymous, &request);
        assert!(WhitelistRuleResolver.try_resolve(&rule, &context).is_none());

        let mobile = RequestActor::new("anon", None, Some("mobile".to_string()));
        let context = RuleResolutionContext::new(&mobile, &request);
        assert_eq!(
            WhitelistRuleResolver.try_resolve(&rule, &context),
            Some(StrategyDescriptor::Whitelist)
        );
    }
}
