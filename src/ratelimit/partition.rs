//! Partition key generation.

use std::fmt::{self, Write};

use serde::Serialize;

use super::context::RuleResolutionContext;
use super::orchestrator::RateLimitDecision;

/// Key used when a request carries no identity at all.
pub const ANONYMOUS_PARTITION: &str = "anonymous:ip";

/// A key that scopes the external limiter's counters to one subject.
///
/// Route decisions share one counter per route (`route:{route_id}`). All
/// other decisions are keyed by whichever identity segments are present, in
/// the fixed order tenant, client, user:
/// `tenant:{t}:client:{c}:user:{a}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PartitionKey(String);

impl PartitionKey {
    /// Build the key for a decision and the context it was resolved from.
    pub fn new(decision: &RateLimitDecision, context: &RuleResolutionContext<'_>) -> Self {
        if decision.is_route_rule {
            let route_id = context.route_id.unwrap_or_default();
            let mut key = String::with_capacity("route:".len() + route_id.len());
            key.push_str("route:");
            key.push_str(route_id);
            return Self(key);
        }

        let actor = context.actor;
        let client_id = actor.client_id.as_deref().filter(|id| !id.is_empty());
        let actor_id = Some(actor.actor_id.as_str()).filter(|id| !id.is_empty());

        if actor.tenant_id.is_none() && client_id.is_none() && actor_id.is_none() {
            return Self(ANONYMOUS_PARTITION.to_string());
        }

        let mut key = String::with_capacity(
            32 + client_id.map_or(0, str::len) + actor_id.map_or(0, str::len),
        );

        // Writing into a String cannot fail.
        if let Some(tenant_id) = actor.tenant_id {
            let _ = write!(key, "tenant:{tenant_id}");
        }
        for (label, value) in [("client", client_id), ("user", actor_id)] {
            if let Some(value) = value {
                if !key.is_empty() {
                    key.push(':');
                }
                key.push_str(label);
                key.push(':');
                key.push_str(value);
            }
        }

        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PartitionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<PartitionKey> for String {
    fn from(key: PartitionKey) -> Self {
        key.0
    }
}
