//! Rate limit resolution metrics.
//!
//! Metrics are optional: components hold an
//! `Option<Arc<dyn RateLimitMetrics>>` and skip recording when it is `None`.
//! Recording never fails and never blocks resolution for longer than one
//! short critical section.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::trace;

/// Point-in-time view of the collected metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSnapshot {
    /// Number of timed resolutions
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub rejections: u64,
    pub average_resolution_time_ms: f64,
    pub max_resolution_time_ms: f64,
    /// `cache_hits / total_requests`, or 0 with no requests
    pub cache_hit_rate: f64,
    /// `rejections / total_requests`, or 0 with no requests
    pub rejection_rate: f64,
    pub taken_at: DateTime<Utc>,
}

/// Metrics sink for the resolution pipeline.
pub trait RateLimitMetrics: Send + Sync {
    /// Record the wall time of one resolution.
    fn record_resolution_time(&self, duration: Duration);
    /// Record a lookup that found candidate rules in the cache.
    fn record_cache_hit(&self);
    /// Record a lookup that found no candidate rules.
    fn record_cache_miss(&self);
    /// Record that the external limiter rejected a request.
    fn record_rejection(&self, partition_key: &str);
    /// Record that the external limiter admitted a request.
    fn record_allowed(&self, partition_key: &str);
    /// Take a snapshot of the current values.
    fn snapshot(&self) -> PerformanceSnapshot;
}

#[derive(Debug, Default)]
struct LatencyAggregate {
    requests: u64,
    total: Duration,
    max: Duration,
}

/// In-process metrics collector.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    rejections: AtomicU64,
    latency: Mutex<LatencyAggregate>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

impl RateLimitMetrics for InMemoryMetrics {
    fn record_resolution_time(&self, duration: Duration) {
        let mut latency = self.latency.lock();
        latency.requests += 1;
        latency.total += duration;
        if duration > latency.max {
            latency.max = duration;
        }
    }

    fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_rejection(&self, partition_key: &str) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
        trace!(partition_key = %partition_key, "Request rejected");
    }

    fn record_allowed(&self, partition_key: &str) {
        trace!(partition_key = %partition_key, "Request allowed");
    }

    fn snapshot(&self) -> PerformanceSnapshot {
        let latency = self.latency.lock();
        let total_requests = latency.requests;
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let rejections = self.rejections.load(Ordering::Relaxed);

        let average = if total_requests == 0 {
            Duration::ZERO
        } else {
            latency.total.div_f64(total_requests as f64)
        };

        PerformanceSnapshot {
            total_requests,
            cache_hits,
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            rejections,
            average_resolution_time_ms: average.as_secs_f64() * 1000.0,
            max_resolution_time_ms: latency.max.as_secs_f64() * 1000.0,
            cache_hit_rate: ratio(cache_hits, total_requests),
            rejection_rate: ratio(rejections, total_requests),
            taken_at: Utc::now(),
        }
    }
}

/// Records the time between its creation and drop as one resolution.
///
/// A timer without a sink does nothing.
#[must_use = "the timer records when dropped"]
pub struct ResolutionTimer<'a> {
    metrics: Option<&'a dyn RateLimitMetrics>,
    started: Instant,
}

impl<'a> ResolutionTimer<'a> {
    pub fn start(metrics: Option<&'a dyn RateLimitMetrics>) -> Self {
        Self {
            metrics,
            started: Instant::now(),
        }
    }
}

impl Drop for ResolutionTimer<'_> {
    fn drop(&mut self) {
        if let Some(metrics) = self.metrics {
            metrics.record_resolution_time(self.started.elapsed());
        }
    }
}
