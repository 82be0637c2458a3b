//! Tollgate - Rate Limit Rule Resolution for API Gateways
//!
//! This crate decides, for every inbound gateway request, which rate limiting
//! strategy applies and under which partition key the external limiter should
//! count it. Rules come in three layers (whitelist, route, tenant) plus a
//! global default, and are pre-indexed so that resolution does not scan the
//! rule lists.

pub mod actor;
pub mod config;
pub mod error;
pub mod gateway;
pub mod matcher;
pub mod metrics;
pub mod ratelimit;
pub mod request;
