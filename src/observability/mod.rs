//! Observability module for logging and metrics.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, redact_sensitive, LogConfig, LogLevel};
pub use metrics::{DefaultMetricsCollector, MetricsCollector, NoopMetricsCollector, RouterMetrics};
