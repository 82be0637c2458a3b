//! Configuration management for Tollgate.
//!
//! Every settings field is optional. A malformed rule degrades to a safe
//! default instead of failing the load.
//! [`RateLimitSettings::to_rule_set`] turns them into typed rules.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, TollgateError};
use crate::ratelimit::{
    RouteRule, RulePriority, RuleSet, RuleSnapshot, StrategyDescriptor, TenantRule, WhitelistRule,
};

/// Prefix of environment variable overrides, e.g. `TOLLGATE__LOGGING__LEVEL`.
pub const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Rate limit rules
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

/// Rate limit rules as written in configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default)]
    pub whitelist_rules: Vec<WhitelistRuleSettings>,
    #[serde(default)]
    pub route_rules: Vec<RouteRuleSettings>,
    #[serde(default)]
    pub tenant_rules: Vec<TenantRuleSettings>,
    /// Strategy for requests no rule matches; no limiting when absent
    #[serde(default)]
    pub global_default: Option<StrategySettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhitelistRuleSettings {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Exact addresses, CIDR ranges or `*`
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    #[serde(default)]
    pub tenant_ids: Vec<i32>,
    #[serde(default)]
    pub client_ids: Vec<String>,
    /// `METHOD:PATH` patterns
    #[serde(default)]
    pub endpoint_patterns: Vec<String>,
    #[serde(alias = "is_enabled")]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteRuleSettings {
    pub name: Option<String>,
    pub description: Option<String>,
    pub route_id: Option<String>,
    /// `RouteWins` or `TenantWins`
    pub priority: Option<String>,
    #[serde(alias = "strategy_settings")]
    pub strategy: Option<StrategySettings>,
    #[serde(alias = "is_enabled")]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantRuleSettings {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub tenant_ids: Vec<i32>,
    #[serde(default)]
    pub client_ids: Vec<String>,
    #[serde(alias = "strategy_settings")]
    pub strategy: Option<StrategySettings>,
    #[serde(alias = "is_enabled")]
    pub enabled: Option<bool>,
    pub priority: Option<PrioritySetting>,
}

/// A tenant rule priority, written either as a number or as a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrioritySetting {
    Number(i64),
    Text(String),
}

impl PrioritySetting {
    fn value(&self) -> Option<i32> {
        match self {
            PrioritySetting::Number(n) => i32::try_from(*n).ok(),
            PrioritySetting::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategySettings {
    /// `TokenBucket`, `Concurrency`, `FixedWindow`, `SlidingWindow` or `Whitelist`
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub token_limit: Option<u32>,
    pub tokens_per_period: Option<u32>,
    pub replenishment_period_seconds: Option<u64>,
    /// `[D.]HH:MM:SS`, used when `replenishment_period_seconds` is absent
    pub replenishment_period: Option<String>,
    pub permit_limit: Option<u32>,
    pub queue_limit: Option<u32>,
    pub window_seconds: Option<u64>,
    /// `[D.]HH:MM:SS`, used when `window_seconds` is absent
    pub window: Option<String>,
}

const DEFAULT_TOKEN_LIMIT: u32 = 100;
const DEFAULT_TOKENS_PER_PERIOD: u32 = 10;
const DEFAULT_PERMIT_LIMIT: u32 = 10;
const DEFAULT_QUEUE_LIMIT: u32 = 20;
const DEFAULT_PERIOD_SECS: u64 = 60;

/// Parse a `[D.]HH:MM[:SS[.fraction]]` time span, or a bare number of days,
/// into whole seconds.
pub fn parse_time_span(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if !value.contains(':') {
        let days: u64 = value.parse().ok()?;
        return days.checked_mul(86_400);
    }

    let (days, clock) = match value.split_once('.') {
        Some((days, clock)) if days.bytes().all(|b| b.is_ascii_digit()) && clock.contains(':') => {
            (days.parse::<u64>().ok()?, clock)
        }
        _ => (0, value),
    };

    let mut parts = clock.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: u64 = match parts.next() {
        // Fractional seconds are truncated
        Some(s) => s.split('.').next()?.parse().ok()?,
        None => 0,
    };
    if parts.next().is_some() || hours >= 24 || minutes >= 60 || seconds >= 60 {
        return None;
    }

    days.checked_mul(86_400)?
        .checked_add(hours * 3_600 + minutes * 60 + seconds)
}

fn period(seconds: Option<u64>, span: Option<&str>) -> Duration {
    let secs = seconds
        .or_else(|| span.and_then(parse_time_span))
        .unwrap_or(DEFAULT_PERIOD_SECS);
    Duration::from_secs(secs)
}

impl StrategySettings {
    /// Convert to a strategy descriptor.
    ///
    /// A missing or unknown `type` yields the whitelist strategy.
    pub fn to_descriptor(&self) -> StrategyDescriptor {
        let window = || period(self.window_seconds, self.window.as_deref());
        let permit_limit = self.permit_limit.unwrap_or(DEFAULT_PERMIT_LIMIT);

        match self.kind.as_deref() {
            Some("TokenBucket") => StrategyDescriptor::TokenBucket {
                token_limit: self.token_limit.unwrap_or(DEFAULT_TOKEN_LIMIT),
                tokens_per_period: self.tokens_per_period.unwrap_or(DEFAULT_TOKENS_PER_PERIOD),
                replenishment_period: period(
                    self.replenishment_period_seconds,
                    self.replenishment_period.as_deref(),
                ),
            },
            Some("Concurrency") => StrategyDescriptor::Concurrency {
                permit_limit,
                queue_limit: self.queue_limit.unwrap_or(DEFAULT_QUEUE_LIMIT),
            },
            Some("FixedWindow") => StrategyDescriptor::FixedWindow {
                permit_limit,
                window: window(),
            },
            Some("SlidingWindow") => StrategyDescriptor::SlidingWindow {
                permit_limit,
                window: window(),
            },
            Some("Whitelist") => StrategyDescriptor::whitelist(),
            other => {
                warn!(strategy_type = ?other, "Unknown strategy type, not limiting");
                StrategyDescriptor::whitelist()
            }
        }
    }
}

fn strategy_or_whitelist(settings: Option<&StrategySettings>) -> StrategyDescriptor {
    settings.map_or(StrategyDescriptor::whitelist(), StrategySettings::to_descriptor)
}

impl WhitelistRuleSettings {
    pub fn to_rule(&self) -> WhitelistRule {
        WhitelistRule::new(self.name.as_deref().unwrap_or("Whitelist"))
            .with_description(self.description.clone().unwrap_or_default())
            .with_ip_patterns(self.ip_addresses.iter().cloned())
            .with_tenant_ids(self.tenant_ids.iter().copied())
            .with_client_ids(self.client_ids.iter().cloned())
            .with_endpoint_patterns(self.endpoint_patterns.iter().cloned())
            .with_enabled(self.enabled.unwrap_or(true))
    }
}

impl RouteRuleSettings {
    pub fn to_rule(&self) -> RouteRule {
        let priority = self
            .priority
            .as_deref()
            .map_or(RulePriority::RouteWins, RulePriority::parse);

        RouteRule::new(
            self.name.as_deref().unwrap_or("Route"),
            self.route_id.clone().unwrap_or_default(),
            strategy_or_whitelist(self.strategy.as_ref()),
        )
        .with_priority(priority)
        .with_description(self.description.clone().unwrap_or_default())
        .with_enabled(self.enabled.unwrap_or(true))
    }
}

impl TenantRuleSettings {
    /// Convert to a typed rule, using `fallback_priority` when no valid
    /// priority is configured.
    pub fn to_rule(&self, fallback_priority: i32) -> TenantRule {
        let priority = self
            .priority
            .as_ref()
            .and_then(PrioritySetting::value)
            .unwrap_or(fallback_priority);

        TenantRule::new(
            self.name.as_deref().unwrap_or("Tenant"),
            strategy_or_whitelist(self.strategy.as_ref()),
            priority,
        )
        .with_tenant_ids(self.tenant_ids.iter().copied())
        .with_client_ids(self.client_ids.iter().cloned())
        .with_description(self.description.clone().unwrap_or_default())
        .with_enabled(self.enabled.unwrap_or(true))
    }
}

impl RateLimitSettings {
    /// Convert to typed rules and the global default strategy.
    ///
    /// Tenant rules without a priority rank by position, earlier first, and
    /// the returned tenant list is ordered by descending priority.
    pub fn to_rule_set(&self) -> (RuleSet, StrategyDescriptor) {
        let mut rules = RuleSet::new();

        for settings in &self.whitelist_rules {
            rules = rules.with_whitelist_rule(settings.to_rule());
        }
        for settings in &self.route_rules {
            rules = rules.with_route_rule(settings.to_rule());
        }

        let count = self.tenant_rules.len();
        for (index, settings) in self.tenant_rules.iter().enumerate() {
            let fallback = i32::try_from(count - index).unwrap_or(i32::MAX);
            rules = rules.with_tenant_rule(settings.to_rule(fallback));
        }
        rules.tenants.sort_by(|a, b| b.priority.cmp(&a.priority));

        (rules, strategy_or_whitelist(self.global_default.as_ref()))
    }

    /// Build an indexed snapshot of these settings.
    pub fn to_snapshot(&self) -> RuleSnapshot {
        let (rules, global_default) = self.to_rule_set();
        RuleSnapshot::new(rules, global_default)
    }
}

impl TollgateConfig {
    /// Load configuration from a file, with `TOLLGATE__*` environment
    /// overrides applied on top.
    ///
    /// The format is inferred from the file extension.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(TollgateError::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }
        info!(path = %path.display(), "Loading configuration");

        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}
