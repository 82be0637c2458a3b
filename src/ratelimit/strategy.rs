//! Strategy descriptors handed to the external limiter.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Which limiting algorithm applies to a request, and with what parameters.
///
/// The engine only routes descriptors; the limiter backend dispatches on the
/// variant and owns the counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyDescriptor {
    /// No limiting at all
    Whitelist,
    /// Fixed window counter
    FixedWindow {
        /// Requests admitted per window
        permit_limit: u32,
        /// Window length
        #[serde(with = "duration_secs")]
        window: Duration,
    },
    /// Sliding window counter
    SlidingWindow {
        /// Requests admitted per window
        permit_limit: u32,
        /// Window length
        #[serde(with = "duration_secs")]
        window: Duration,
    },
    /// Token bucket
    TokenBucket {
        /// Bucket capacity
        token_limit: u32,
        /// Tokens added each replenishment period
        tokens_per_period: u32,
        /// Replenishment period
        #[serde(with = "duration_secs")]
        replenishment_period: Duration,
    },
    /// Concurrency semaphore
    Concurrency {
        /// Concurrent requests admitted
        permit_limit: u32,
        /// Requests allowed to wait for a permit
        queue_limit: u32,
    },
}

impl StrategyDescriptor {
    /// The no-op strategy.
    pub const fn whitelist() -> Self {
        StrategyDescriptor::Whitelist
    }

    /// Whether this strategy exempts the request from limiting.
    pub fn is_whitelist(&self) -> bool {
        matches!(self, StrategyDescriptor::Whitelist)
    }

    /// Tag of the variant as used in configuration.
    pub fn kind(&self) -> &'static str {
        match self {
            StrategyDescriptor::Whitelist => "Whitelist",
            StrategyDescriptor::FixedWindow { .. } => "FixedWindow",
            StrategyDescriptor::SlidingWindow { .. } => "SlidingWindow",
            StrategyDescriptor::TokenBucket { .. } => "TokenBucket",
            StrategyDescriptor::Concurrency { .. } => "Concurrency",
        }
    }
}

impl Default for StrategyDescriptor {
    fn default() -> Self {
        StrategyDescriptor::Whitelist
    }
}

impl fmt::Display for StrategyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyDescriptor::Whitelist => write!(f, "Whitelist"),
            StrategyDescriptor::FixedWindow {
                permit_limit,
                window,
            } => write!(f, "FixedWindow({}/{}s)", permit_limit, window.as_secs()),
            StrategyDescriptor::SlidingWindow {
                permit_limit,
                window,
            } => write!(f, "SlidingWindow({}/{}s)", permit_limit, window.as_secs()),
            StrategyDescriptor::TokenBucket {
                token_limit,
                tokens_per_period,
                replenishment_period,
            } => write!(
                f,
                "TokenBucket({}, +{}/{}s)",
                token_limit,
                tokens_per_period,
                replenishment_period.as_secs()
            ),
            StrategyDescriptor::Concurrency {
                permit_limit,
                queue_limit,
            } => write!(f, "Concurrency({}, queue {})", permit_limit, queue_limit),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }
}
