//! Per-request rate limit policy.
//!
//! [`GatewayPolicy`] is the entry point the transport calls for every inbound
//! request. It resolves the request's actor, picks the applicable strategy
//! from the current rule snapshot and renders the partition key under which
//! the external limiter counts the request.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::actor::ActorResolver;
use crate::metrics::{RateLimitMetrics, ResolutionTimer};
use crate::ratelimit::{
    PartitionKey, RequestScope, RuleOrchestrator, RuleStore, StrategyDescriptor,
};
use crate::request::{RequestHandle, REQUEST_ID_HEADER};

/// What the external limiter needs to admit or reject one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitPartition {
    pub strategy: StrategyDescriptor,
    pub is_route_rule: bool,
    pub partition_key: PartitionKey,
}

fn request_id(request: &dyn RequestHandle) -> String {
    match request.header(REQUEST_ID_HEADER) {
        Some(id) if !id.trim().is_empty() => id.to_string(),
        _ => Uuid::new_v4().to_string(),
    }
}

/// The rate limit policy of the gateway.
pub struct GatewayPolicy {
    actor_resolver: ActorResolver,
    orchestrator: RuleOrchestrator,
    store: Arc<RuleStore>,
    metrics: Option<Arc<dyn RateLimitMetrics>>,
}

impl GatewayPolicy {
    /// Create a policy reading rules from `store`.
    pub fn new(store: Arc<RuleStore>) -> Self {
        Self {
            actor_resolver: ActorResolver::new(),
            orchestrator: RuleOrchestrator::new(),
            store,
            metrics: None,
        }
    }

    /// Create a policy that reports to `metrics`.
    pub fn with_metrics(store: Arc<RuleStore>, metrics: Arc<dyn RateLimitMetrics>) -> Self {
        Self {
            actor_resolver: ActorResolver::new(),
            orchestrator: RuleOrchestrator::with_metrics(Arc::clone(&metrics)),
            store,
            metrics: Some(metrics),
        }
    }

    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    pub fn metrics(&self) -> Option<&Arc<dyn RateLimitMetrics>> {
        self.metrics.as_ref()
    }

    /// Decide how a request is limited.
    #[instrument(skip_all, fields(request_id = %request_id(request)))]
    pub fn partition(&self, request: &dyn RequestHandle) -> RateLimitPartition {
        let _timer = ResolutionTimer::start(self.metrics.as_deref());

        // One snapshot for the whole request, even if a reload lands meanwhile.
        let snapshot = self.store.load();
        let scope = RequestScope::new(request);
        let context = scope.context(&self.actor_resolver);

        let decision = self
            .orchestrator
            .resolve(&snapshot.cache, snapshot.global_default, &context);
        let partition_key = PartitionKey::new(&decision, &context);

        debug!(
            version = snapshot.version,
            strategy = %decision.strategy,
            partition_key = %partition_key,
            "Request partitioned"
        );

        RateLimitPartition {
            strategy: decision.strategy,
            is_route_rule: decision.is_route_rule,
            partition_key,
        }
    }

    /// Report that the external limiter rejected a request.
    pub fn on_rejected(&self, partition_key: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_rejection(partition_key);
        }
    }

    /// Report that the external limiter admitted a request.
    pub fn on_allowed(&self, partition_key: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_allowed(partition_key);
        }
    }
}
