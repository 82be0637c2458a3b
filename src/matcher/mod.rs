//! Request predicates used by whitelist rules.
//!
//! Both matchers are stateless apart from the bounded memo inside
//! [`IpPatternSet`], which is safe to share across threads.

mod endpoint;
mod ip;

pub use endpoint::endpoint_matches;
pub use ip::{CidrRange, IpPatternSet, DEFAULT_MATCH_CACHE_CAPACITY};
