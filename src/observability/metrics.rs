//! Metrics collection for the operation router.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::errors::ErrorKind;

/// Receives router events.
pub trait MetricsCollector: Send + Sync {
    /// Records a finished `execute` call that reached the network.
    fn record_request(&self, resource: &str, operation: &str, duration: Duration, success: bool);

    /// Records retries performed for one `execute` call (attempts minus one).
    fn record_retries(&self, resource: &str, operation: &str, retries: u32);

    /// Records a cache lookup.
    fn record_cache_lookup(&self, resource: &str, hit: bool);

    /// Records a denied rate-limit acquisition.
    fn record_rate_limit_wait(&self, credential_id: &str, wait: Duration);

    /// Records a terminal error.
    fn record_error(&self, resource: &str, kind: ErrorKind);

    /// Gets current metrics snapshot.
    fn snapshot(&self) -> RouterMetrics;
}

/// Aggregated router metrics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouterMetrics {
    /// `execute` calls that reached the network.
    pub total_requests: u64,
    /// Of those, the ones that succeeded.
    pub successful_requests: u64,
    /// Of those, the ones that failed.
    pub failed_requests: u64,
    /// Retries across all requests.
    pub total_retries: u64,
    /// Cache hits.
    pub cache_hits: u64,
    /// Cache misses.
    pub cache_misses: u64,
    /// Denied rate-limit acquisitions.
    pub rate_limit_waits: u64,
    /// Total time spent waiting on rate windows, in milliseconds.
    pub rate_limit_wait_ms: u64,
    /// Requests per `resource.operation`.
    pub requests_by_operation: HashMap<String, u64>,
    /// Terminal errors by kind.
    pub errors_by_kind: HashMap<ErrorKind, u64>,
}

/// Default in-memory metrics collector.
#[derive(Default)]
pub struct DefaultMetricsCollector {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    total_retries: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    rate_limit_waits: AtomicU64,
    rate_limit_wait_ms: AtomicU64,
    requests_by_operation: RwLock<HashMap<String, u64>>,
    errors_by_kind: RwLock<HashMap<ErrorKind, u64>>,
}

impl DefaultMetricsCollector {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricsCollector for DefaultMetricsCollector {
    fn record_request(&self, resource: &str, operation: &str, _duration: Duration, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
        *self
            .requests_by_operation
            .write()
            .entry(format!("{}.{}", resource, operation))
            .or_insert(0) += 1;
    }

    fn record_retries(&self, _resource: &str, _operation: &str, retries: u32) {
        self.total_retries
            .fetch_add(u64::from(retries), Ordering::Relaxed);
    }

    fn record_cache_lookup(&self, _resource: &str, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_rate_limit_wait(&self, _credential_id: &str, wait: Duration) {
        self.rate_limit_waits.fetch_add(1, Ordering::Relaxed);
        self.rate_limit_wait_ms.fetch_add(
            u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }

    fn record_error(&self, _resource: &str, kind: ErrorKind) {
        *self.errors_by_kind.write().entry(kind).or_insert(0) += 1;
    }

    fn snapshot(&self) -> RouterMetrics {
        RouterMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            total_retries: self.total_retries.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            rate_limit_waits: self.rate_limit_waits.load(Ordering::Relaxed),
            rate_limit_wait_ms: self.rate_limit_wait_ms.load(Ordering::Relaxed),
            requests_by_operation: self.requests_by_operation.read().clone(),
            errors_by_kind: self.errors_by_kind.read().clone(),
        }
    }
}

/// Collector that discards everything.
#[derive(Debug, Default)]
pub struct NoopMetricsCollector;

impl MetricsCollector for NoopMetricsCollector {
    fn record_request(&self, _: &str, _: &str, _: Duration, _: bool) {}
    fn record_retries(&self, _: &str, _: &str, _: u32) {}
    fn record_cache_lookup(&self, _: &str, _: bool) {}
    fn record_rate_limit_wait(&self, _: &str, _: Duration) {}
    fn record_error(&self, _: &str, _: ErrorKind) {}

    fn snapshot(&self) -> RouterMetrics {
        RouterMetrics::default()
    }
}
