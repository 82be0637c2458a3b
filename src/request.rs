//! Transport boundary.
//!
//! The engine never looks at transport internals. Whatever sits in front of it
//! (a reverse proxy, an HTTP framework, a test) exposes a request through
//! [`RequestHandle`].

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Result;

/// Header carrying the original client address chain.
pub const FORWARDED_FOR_HEADER: &str = "X-Forwarded-For";
/// Header carrying the tenant id for requests without a tenant claim.
pub const TENANT_ID_HEADER: &str = "Abp-TenantId";
/// Header carrying the client id for requests without a client claim.
pub const CLIENT_ID_HEADER: &str = "X-Client-Id";
/// Header carrying the correlation id used for tracing.
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// A single claim of an authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Claim type, e.g. `sub` or `tenantId`
    #[serde(rename = "type")]
    pub kind: String,
    /// Claim value
    pub value: String,
}

impl Claim {
    /// Create a new claim.
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

/// Read-only view of an inbound request.
pub trait RequestHandle {
    /// Claims of the authenticated identity, `None` when the request is anonymous.
    fn claims(&self) -> Option<&[Claim]>;

    /// First value of a header. Header names are case-insensitive.
    fn header(&self, name: &str) -> Option<&str>;

    /// Identifier of the proxy route the request matched, if any.
    fn route_id(&self) -> Option<&str>;

    /// Request path.
    fn path(&self) -> &str;

    /// HTTP method.
    fn method(&self) -> &str;

    /// Address of the peer as seen by the transport.
    fn remote_addr(&self) -> Option<IpAddr>;
}

/// An owned request, used by the CLI and tests.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayRequest {
    #[serde(default = "default_method")]
    method: String,
    #[serde(default = "default_path")]
    path: String,
    #[serde(default)]
    route_id: Option<String>,
    #[serde(default)]
    remote_addr: Option<IpAddr>,
    #[serde(default, deserialize_with = "deserialize_headers")]
    headers: Vec<(String, String)>,
    /// `None` means unauthenticated
    #[serde(default)]
    claims: Option<Vec<Claim>>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

fn deserialize_headers<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    let map = BTreeMap::<String, String>::deserialize(deserializer)?;
    Ok(map.into_iter().collect())
}

impl Default for GatewayRequest {
    fn default() -> Self {
        Self::new(default_method(), default_path())
    }
}

impl GatewayRequest {
    /// Create an anonymous request without headers.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            route_id: None,
            remote_addr: None,
            headers: Vec::new(),
            claims: None,
        }
    }

    /// Set the matched proxy route.
    pub fn with_route(mut self, route_id: impl Into<String>) -> Self {
        self.route_id = Some(route_id.into());
        self
    }

    /// Append a header value.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the transport-level peer address.
    pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Add a claim, marking the request as authenticated.
    pub fn with_claim(mut self, kind: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims
            .get_or_insert_with(Vec::new)
            .push(Claim::new(kind, value));
        self
    }

    /// Mark the request as authenticated without adding claims.
    pub fn authenticated(mut self) -> Self {
        self.claims.get_or_insert_with(Vec::new);
        self
    }

    /// Load a YAML list of requests from a file.
    pub fn load_all<P: AsRef<Path>>(path: P) -> Result<Vec<Self>> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }
}

impl RequestHandle for GatewayRequest {
    fn claims(&self) -> Option<&[Claim]> {
        self.claims.as_deref()
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn route_id(&self) -> Option<&str> {
        self.route_id.as_deref()
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn method(&self) -> &str {
        &self.method
    }

    fn remote_addr(&self) -> Option<IpAddr> {
        self.remote_addr
    }
}
