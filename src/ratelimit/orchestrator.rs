//! Rule orchestration: turns a request context into a single decision.

use std::sync::Arc;

use serde::Serialize;
use tracing::trace;

use super::cache::IndexedRuleCache;
use super::context::RuleResolutionContext;
use super::resolver::{RouteRuleResolver, RuleResolver, TenantRuleResolver, WhitelistRuleResolver};
use super::rules::{RouteRule, RulePriority};
use super::strategy::StrategyDescriptor;
use crate::metrics::RateLimitMetrics;

/// The outcome of rule resolution for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RateLimitDecision {
    /// Strategy the external limiter should apply
    pub strategy: StrategyDescriptor,
    /// Whether the strategy came from a route rule, which scopes the
    /// partition to the route instead of the actor
    pub is_route_rule: bool,
}

impl RateLimitDecision {
    /// A decision scoped to the matched route.
    pub fn route(strategy: StrategyDescriptor) -> Self {
        Self {
            strategy,
            is_route_rule: true,
        }
    }

    /// A decision scoped to the request's actor.
    pub fn actor(strategy: StrategyDescriptor) -> Self {
        Self {
            strategy,
            is_route_rule: false,
        }
    }
}

/// Applies the layered rule policy:
///
/// 1. the first matching whitelist rule exempts the request
/// 2. otherwise route and tenant rules are looked up in the cache
/// 3. when both match, the route rule's [`RulePriority`] picks the winner
/// 4. with no match, the global default applies
pub struct RuleOrchestrator {
    whitelist: WhitelistRuleResolver,
    route: RouteRuleResolver,
    tenant: TenantRuleResolver,
    metrics: Option<Arc<dyn RateLimitMetrics>>,
}

impl RuleOrchestrator {
    /// Create an orchestrator without metrics.
    pub fn new() -> Self {
        Self {
            whitelist: WhitelistRuleResolver,
            route: RouteRuleResolver,
            tenant: TenantRuleResolver,
            metrics: None,
        }
    }

    /// Create an orchestrator that reports cache hits and misses.
    pub fn with_metrics(metrics: Arc<dyn RateLimitMetrics>) -> Self {
        Self {
            metrics: Some(metrics),
            ..Self::new()
        }
    }

    /// Resolve the decision for a request against one cache snapshot.
    pub fn resolve(
        &self,
        cache: &IndexedRuleCache,
        global_default: StrategyDescriptor,
        context: &RuleResolutionContext<'_>,
    ) -> RateLimitDecision {
        if let Some(strategy) = cache
            .whitelist_rules()
            .iter()
            .find_map(|rule| self.whitelist.try_resolve(rule, context))
        {
            trace!(actor_id = %context.actor.actor_id, "Request whitelisted");
            return RateLimitDecision::actor(strategy);
        }

        let route_rule = cache.try_get_route_rule(context.route_id);
        let mut cache_hit = route_rule.is_some();

        let route_match: Option<(&RouteRule, StrategyDescriptor)> = route_rule.and_then(|rule| {
            self.route
                .try_resolve(rule, context)
                .map(|strategy| (rule, strategy))
        });

        let actor = context.actor;
        let tenant_id = actor.tenant_id;
        let client_id = actor.client_id.as_deref();

        if cache.has_tenant_candidates(tenant_id, client_id) {
            cache_hit = true;
        }

        let tenant_strategy = cache
            .tenant_rule_candidates(tenant_id, client_id)
            .find_map(|rule| self.tenant.try_resolve(rule, context));

        if let Some(metrics) = &self.metrics {
            if cache_hit {
                metrics.record_cache_hit();
            } else {
                metrics.record_cache_miss();
            }
        }

        let decision = match (route_match, tenant_strategy) {
            (Some((rule, route_strategy)), Some(tenant_strategy)) => match rule.priority {
                RulePriority::RouteWins => RateLimitDecision::route(route_strategy),
                RulePriority::TenantWins => RateLimitDecision::actor(tenant_strategy),
            },
            (Some((_, route_strategy)), None) => RateLimitDecision::route(route_strategy),
            (None, Some(tenant_strategy)) => RateLimitDecision::actor(tenant_strategy),
            (None, None) => RateLimitDecision::actor(global_default),
        };

        trace!(
            route_id = ?context.route_id,
            actor_id = %actor.actor_id,
            strategy = %decision.strategy,
            is_route_rule = decision.is_route_rule,
            "Rate limit decision resolved"
        );

        decision
    }
}

impl Default for RuleOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::actor::RequestActor;
    use crate::metrics::InMemoryMetrics;
    use crate::ratelimit::rules::{RouteRule, RuleSet, TenantRule, WhitelistRule};
    use crate::request::GatewayRequest;

    fn fixed(limit: u32) -> StrategyDescriptor {
        StrategyDescriptor::FixedWindow {
            permit_limit: limit,
            window: Duration::from_secs(60),
        }
    }

    fn bucket(limit: u32) -> StrategyDescriptor {
        StrategyDescriptor::TokenBucket {
            token_limit: limit,
            tokens_per_period: 1,
            replenishment_period: Duration::from_secs(1),
        }
    }

    const GLOBAL: StrategyDescriptor = StrategyDescriptor::Concurrency {
        permit_limit: 10,
        queue_limit: 20,
    };

    fn resolve(
        cache: &IndexedRuleCache,
        request: &GatewayRequest,
        actor: &RequestActor,
    ) -> RateLimitDecision {
        let context = RuleResolutionContext::new(actor, request);
        RuleOrchestrator::new().resolve(cache, GLOBAL, &context)
    }

    fn tie_break_cache(priority: RulePriority) -> IndexedRuleCache {
        IndexedRuleCache::new(
            RuleSet::new()
                .with_route_rule(RouteRule::new("r1", "r1", fixed(100)).with_priority(priority))
                .with_tenant_rule(TenantRule::new("t", bucket(5), 1).with_tenant_ids([7])),
        )
    }

    #[test]
    fn test_no_rules_falls_back_to_global_default() {
        let cache = IndexedRuleCache::new(RuleSet::new());
        let request = GatewayRequest::new("GET", "/").with_route("r1");
        let actor = RequestActor::new("a", Some(7), Some("web".to_string()));

        assert_eq!(resolve(&cache, &request, &actor), RateLimitDecision::actor(GLOBAL));
    }

    #[test]
    fn test_whitelist_overrides_everything() {
        let cache = IndexedRuleCache::new(
            RuleSet::new()
                .with_whitelist_rule(
                    WhitelistRule::new("health").with_endpoint_patterns(["*/health"]),
                )
                .with_route_rule(RouteRule::new("r1", "r1", fixed(100)))
                .with_tenant_rule(TenantRule::new("t", bucket(5), 1)),
        );
        let actor = RequestActor::new("a", Some(7), None);

        let health = GatewayRequest::new("GET", "/svc/health").with_route("r1");
        let decision = resolve(&cache, &health, &actor);
        assert_eq!(decision, RateLimitDecision::actor(StrategyDescriptor::Whitelist));

        let other = GatewayRequest::new("GET", "/svc/orders").with_route("r1");
        assert_eq!(resolve(&cache, &other, &actor), RateLimitDecision::route(fixed(100)));
    }

    #[test]
    fn test_first_enabled_whitelist_rule_wins() {
        let cache = IndexedRuleCache::new(
            RuleSet::new()
                .with_whitelist_rule(WhitelistRule::new("off").with_enabled(false))
                .with_whitelist_rule(WhitelistRule::new("tenant-9").with_tenant_ids([9])),
        );
        let request = GatewayRequest::new("GET", "/");

        let listed = RequestActor::new("a", Some(9), None);
        assert!(resolve(&cache, &request, &listed).strategy.is_whitelist());

        let unlisted = RequestActor::new("a", Some(8), None);
        assert_eq!(resolve(&cache, &request, &unlisted), RateLimitDecision::actor(GLOBAL));
    }

    #[test]
    fn test_route_wins_tie_break() {
        let cache = tie_break_cache(RulePriority::RouteWins);
        let request = GatewayRequest::new("GET", "/").with_route("r1");
        let actor = RequestActor::new("a", Some(7), None);

        let decision = resolve(&cache, &request, &actor);

        assert!(decision.is_route_rule);
        assert_eq!(decision.strategy, fixed(100));
    }

    #[test]
    fn test_tenant_wins_tie_break() {
        let cache = tie_break_cache(RulePriority::TenantWins);
        let request = GatewayRequest::new("GET", "/").with_route("r1");
        let actor = RequestActor::new("a", Some(7), None);

        let decision = resolve(&cache, &request, &actor);

        assert!(!decision.is_route_rule);
        assert_eq!(decision.strategy, bucket(5));
    }

    #[test]
    fn test_single_layer_matches() {
        let cache = tie_break_cache(RulePriority::TenantWins);

        // Route only: tenant rule does not cover tenant 8
        let routed = GatewayRequest::new("GET", "/").with_route("R1");
        let other_tenant = RequestActor::new("a", Some(8), None);
        assert_eq!(
            resolve(&cache, &routed, &other_tenant),
            RateLimitDecision::route(fixed(100))
        );

        // Tenant only: no route
        let unrouted = GatewayRequest::new("GET", "/");
        let tenant = RequestActor::new("a", Some(7), None);
        assert_eq!(resolve(&cache, &unrouted, &tenant), RateLimitDecision::actor(bucket(5)));
    }

    #[test]
    fn test_exact_tenant_beats_higher_bucket_order() {
        let cache = IndexedRuleCache::new(
            RuleSet::new()
                .with_tenant_rule(TenantRule::new("any", fixed(1), 1).with_client_ids(["*"]))
                .with_tenant_rule(TenantRule::new("seven", fixed(5), 5).with_tenant_ids([7])),
        );
        let request = GatewayRequest::new("GET", "/");

        let seven = RequestActor::new("a", Some(7), None);
        assert_eq!(resolve(&cache, &request, &seven).strategy, fixed(5));

        let other = RequestActor::new("a", Some(3), Some("web".to_string()));
        assert_eq!(resolve(&cache, &request, &other).strategy, fixed(1));
    }

    #[test]
    fn test_wildcard_client_rule_skips_client_less_actor() {
        let any = TenantRule::new("any", fixed(1), 1).with_client_ids(["*"]);
        let cache = IndexedRuleCache::new(RuleSet::new().with_tenant_rule(any));
        let request = GatewayRequest::new("GET", "/");

        let anonymous = RequestActor::new("10.0.0.1", None, None);
        assert_eq!(resolve(&cache, &request, &anonymous), RateLimitDecision::actor(GLOBAL));

        let web = RequestActor::new("10.0.0.1", None, Some("web".to_string()));
        assert_eq!(resolve(&cache, &request, &web), RateLimitDecision::actor(fixed(1)));
    }

    #[test]
    fn test_first_accepted_candidate_wins() {
        // The exact-tenant bucket's best rule requires a client the actor lacks.
        let cache = IndexedRuleCache::new(
            RuleSet::new()
                .with_tenant_rule(
                    TenantRule::new("needs-client", fixed(50), 10)
                        .with_tenant_ids([7])
                        .with_client_ids(["web"]),
                )
                .with_tenant_rule(TenantRule::new("plain", fixed(20), 1).with_tenant_ids([7])),
        );
        let request = GatewayRequest::new("GET", "/");
        let actor = RequestActor::new("a", Some(7), Some("mobile".to_string()));

        assert_eq!(resolve(&cache, &request, &actor).strategy, fixed(20));
    }

    #[test]
    fn test_disabled_rules_are_ignored() {
        let cache = IndexedRuleCache::new(
            RuleSet::new()
                .with_route_rule(RouteRule::new("r1", "r1", fixed(100)).with_enabled(false))
                .with_tenant_rule(TenantRule::new("t", bucket(5), 1).with_enabled(false)),
        );
        let request = GatewayRequest::new("GET", "/").with_route("r1");
        let actor = RequestActor::new("a", Some(7), None);

        assert_eq!(resolve(&cache, &request, &actor), RateLimitDecision::actor(GLOBAL));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let cache = tie_break_cache(RulePriority::RouteWins);
        let request = GatewayRequest::new("GET", "/").with_route("r1");
        let actor = RequestActor::new("a", Some(7), None);

        assert_eq!(resolve(&cache, &request, &actor), resolve(&cache, &request, &actor));
    }

    #[test]
    fn test_cache_hit_and_miss_recorded() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let orchestrator = RuleOrchestrator::with_metrics(metrics.clone());
        let cache = IndexedRuleCache::new(
            RuleSet::new().with_route_rule(RouteRule::new("r1", "r1", fixed(100))),
        );
        let actor = RequestActor::new("a", None, None);

        let hit = GatewayRequest::new("GET", "/").with_route("r1");
        orchestrator.resolve(&cache, GLOBAL, &RuleResolutionContext::new(&actor, &hit));

        let miss = GatewayRequest::new("GET", "/").with_route("r2");
        orchestrator.resolve(&cache, GLOBAL, &RuleResolutionContext::new(&actor, &miss));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 1);
    }

    #[test]
    fn test_rejected_tenant_candidates_still_count_as_hit() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let orchestrator = RuleOrchestrator::with_metrics(metrics.clone());
        let cache = IndexedRuleCache::new(
            RuleSet::new().with_tenant_rule(
                TenantRule::new("web-only", fixed(5), 1)
                    .with_tenant_ids([7])
                    .with_client_ids(["web"]),
            ),
        );
        let request = GatewayRequest::new("GET", "/");
        let actor = RequestActor::new("a", Some(7), Some("mobile".to_string()));

        let decision =
            orchestrator.resolve(&cache, GLOBAL, &RuleResolutionContext::new(&actor, &request));

        assert_eq!(decision, RateLimitDecision::actor(GLOBAL));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 0);
    }

    #[test]
    fn test_whitelisted_requests_skip_cache_accounting() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let orchestrator = RuleOrchestrator::with_metrics(metrics.clone());
        let cache =
            IndexedRuleCache::new(RuleSet::new().with_whitelist_rule(WhitelistRule::new("all")));
        let request = GatewayRequest::new("GET", "/");
        let actor = RequestActor::new("a", None, None);

        orchestrator.resolve(&cache, GLOBAL, &RuleResolutionContext::new(&actor, &request));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_hits + snapshot.cache_misses, 0);
    }
}
