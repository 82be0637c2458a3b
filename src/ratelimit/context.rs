//! Per-request resolution context.

use std::cell::OnceCell;
use std::fmt;
use std::net::IpAddr;

use crate::actor::{ActorResolver, RequestActor};
use crate::request::RequestHandle;

/// Everything the rule resolvers may look at for one request.
#[derive(Clone, Copy)]
pub struct RuleResolutionContext<'a> {
    /// The resolved actor
    pub actor: &'a RequestActor,
    /// Matched proxy route, if any
    pub route_id: Option<&'a str>,
    pub path: &'a str,
    pub method: &'a str,
    /// Handle back to the transport
    pub request: &'a dyn RequestHandle,
}

impl<'a> RuleResolutionContext<'a> {
    /// Build a context from a resolved actor and its request.
    pub fn new(actor: &'a RequestActor, request: &'a dyn RequestHandle) -> Self {
        Self {
            actor,
            route_id: request.route_id(),
            path: request.path(),
            method: request.method(),
            request,
        }
    }

    /// Peer address as seen by the transport.
    pub fn remote_addr(&self) -> Option<IpAddr> {
        self.request.remote_addr()
    }
}

impl fmt::Debug for RuleResolutionContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleResolutionContext")
            .field("actor", self.actor)
            .field("route_id", &self.route_id)
            .field("path", &self.path)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

/// State scoped to one in-flight request.
///
/// The actor is resolved at most once, however many times the pipeline asks
/// for it while the request is being processed.
pub struct RequestScope<'r> {
    request: &'r dyn RequestHandle,
    actor: OnceCell<RequestActor>,
}

impl<'r> RequestScope<'r> {
    /// Open a scope for a request.
    pub fn new(request: &'r dyn RequestHandle) -> Self {
        Self {
            request,
            actor: OnceCell::new(),
        }
    }

    /// The underlying request.
    pub fn request(&self) -> &'r dyn RequestHandle {
        self.request
    }

    /// The request's actor, resolved on first use.
    pub fn actor(&self, resolver: &ActorResolver) -> &RequestActor {
        self.actor.get_or_init(|| resolver.resolve(self.request))
    }

    /// Resolution context for the request.
    pub fn context(&self, resolver: &ActorResolver) -> RuleResolutionContext<'_> {
        RuleResolutionContext::new(self.actor(resolver), self.request)
    }
}
