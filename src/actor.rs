//! Request actor resolution.
//!
//! Extracts the identity a rate limit is scoped to from claims, headers and
//! the network origin of a request. Resolution never fails: every field
//! degrades to a safe default.

use serde::Serialize;
use tracing::trace;

use crate::request::{
    RequestHandle, CLIENT_ID_HEADER, FORWARDED_FOR_HEADER, TENANT_ID_HEADER,
};

/// Claim types carrying the subject identifier, short JWT names and the
/// WS-Federation name identifier URI.
pub const SUBJECT_CLAIM_TYPES: &[&str] = &[
    "sub",
    "nameid",
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier",
];
/// Claim type carrying the tenant id.
pub const TENANT_CLAIM_TYPE: &str = "tenantId";
/// Claim type carrying the client id.
pub const CLIENT_CLAIM_TYPE: &str = "clientId";
/// Address used when neither forwarding headers nor the transport know the peer.
pub const UNKNOWN_ADDRESS: &str = "unknown";

/// The identity a request is rate limited as.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RequestActor {
    /// Subject id, or the client address for anonymous callers
    pub actor_id: String,
    /// Tenant the request belongs to
    pub tenant_id: Option<i32>,
    /// Client application the request was issued by
    pub client_id: Option<String>,
}

impl RequestActor {
    /// Create a new actor.
    pub fn new(
        actor_id: impl Into<String>,
        tenant_id: Option<i32>,
        client_id: Option<String>,
    ) -> Self {
        Self {
            actor_id: actor_id.into(),
            tenant_id,
            client_id,
        }
    }
}

/// Resolves a [`RequestActor`] from a request.
///
/// Stateless; memoization for the lifetime of one request lives in
/// [`RequestScope`](crate::ratelimit::RequestScope).
#[derive(Debug, Clone, Copy, Default)]
pub struct ActorResolver;

impl ActorResolver {
    /// Create a new resolver.
    pub fn new() -> Self {
        Self
    }

    /// Resolve the actor of a request.
    pub fn resolve(&self, request: &dyn RequestHandle) -> RequestActor {
        let mut subject: Option<&str> = None;
        let mut tenant_claim: Option<&str> = None;
        let mut client_claim: Option<&str> = None;

        if let Some(claims) = request.claims() {
            for claim in claims {
                let kind = claim.kind.as_str();
                if SUBJECT_CLAIM_TYPES.contains(&kind) {
                    subject.get_or_insert(claim.value.as_str());
                } else if kind == TENANT_CLAIM_TYPE {
                    tenant_claim.get_or_insert(claim.value.as_str());
                } else if kind == CLIENT_CLAIM_TYPE {
                    client_claim.get_or_insert(claim.value.as_str());
                }

                if subject.is_some() && tenant_claim.is_some() && client_claim.is_some() {
                    break;
                }
            }
        }

        let actor_id = match subject.map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => client_ip(request),
        };

        let tenant_id = tenant_claim
            .or_else(|| request.header(TENANT_ID_HEADER))
            .and_then(parse_tenant_id);

        let client_id = client_claim
            .or_else(|| request.header(CLIENT_ID_HEADER))
            .filter(|id| !id.trim().is_empty())
            .map(str::to_string);

        trace!(
            actor_id = %actor_id,
            tenant_id = ?tenant_id,
            client_id = ?client_id,
            "Resolved request actor"
        );

        RequestActor {
            actor_id,
            tenant_id,
            client_id,
        }
    }
}

fn parse_tenant_id(value: &str) -> Option<i32> {
    value.trim().parse().ok()
}

/// Resolve the client address of a request.
///
/// Prefers the first entry of `X-Forwarded-For`, then the transport peer
/// address, then the literal `"unknown"`.
pub fn client_ip(request: &dyn RequestHandle) -> String {
    if let Some(forwarded) = request.header(FORWARDED_FOR_HEADER) {
        let first = forwarded.split(',').next().unwrap_or_default().trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }

    request
        .remote_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string())
}
