//! Rate limit rule resolution.

mod cache;
mod context;
mod orchestrator;
mod partition;
mod resolver;
mod rules;
mod snapshot;
mod strategy;

pub use cache::{CacheStats, IndexedRuleCache};
pub use context::{RequestScope, RuleResolutionContext};
pub use orchestrator::{RateLimitDecision, RuleOrchestrator};
pub use partition::{PartitionKey, ANONYMOUS_PARTITION};
pub use resolver::{RouteRuleResolver, RuleResolver, TenantRuleResolver, WhitelistRuleResolver};
pub use rules::{
    client_matches, matches_any_client, tenant_matches, RouteRule, RulePriority, RuleSet,
    TenantRule, WhitelistRule, ANY_CLIENT,
};
pub use snapshot::{RuleSnapshot, RuleStore};
pub use strategy::StrategyDescriptor;
