//! Resilience patterns for the content API client.
//!
//! Provides retry with exponential backoff and per-credential rate limiting.

mod rate_limiter;
mod retry;

pub use rate_limiter::{
    RateDecision, RateLimitHeaders, RateLimiter, RateLimiterConfig, RateWindow, DEFAULT_LIMIT,
    DEFAULT_WINDOW,
};
pub use retry::{
    RetryContext, RetryDecision, RetryExecutor, RetryHook, RetryPolicy, RetryPolicyBuilder,
};
