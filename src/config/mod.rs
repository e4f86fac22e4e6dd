//! Configuration for the content API client.
//!
//! Collects transport settings, the per-credential rate budget, the read and
//! write retry policies and cache sizing in one validated value.

use std::time::Duration;

use crate::cache::DEFAULT_CACHE_TTL;
use crate::errors::ConfigError;
use crate::resilience::{RateLimiterConfig, RetryPolicy};
use crate::transport::TransportConfig;

/// Default base URL for the content API.
pub const DEFAULT_BASE_URL: &str = "https://api.tumblr.com/v2";

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default User-Agent header.
pub const DEFAULT_USER_AGENT: &str = concat!("integrations-content-api/", env!("CARGO_PKG_VERSION"));

/// Configuration for the operation router and its transport.
#[derive(Debug, Clone)]
pub struct ContentApiConfig {
    /// Base URL for API requests.
    pub base_url: String,
    /// Request timeout.
    pub timeout: Duration,
    /// User-Agent header value.
    pub user_agent: String,
    /// Budget applied to every credential.
    pub rate_limit: RateLimiterConfig,
    /// Retry policy for reads.
    pub read_policy: RetryPolicy,
    /// Retry policy for writes; always fewer attempts than reads.
    pub write_policy: RetryPolicy,
    /// TTL for cached reads without a per-operation TTL.
    pub cache_ttl: Duration,
    /// Upper bound on cached entries.
    pub cache_capacity: Option<usize>,
    /// Wait attached to a 429 that carries no rate-limit header.
    pub rate_limit_fallback: Option<Duration>,
}

impl Default for ContentApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            rate_limit: RateLimiterConfig::default(),
            read_policy: RetryPolicy::reads(),
            write_policy: RetryPolicy::writes(),
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_capacity: Some(10_000),
            rate_limit_fallback: None,
        }
    }
}

impl ContentApiConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ContentApiConfigBuilder {
        ContentApiConfigBuilder::new()
    }

    /// Creates a configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `CONTENT_API_BASE_URL`: custom base URL
    /// - `CONTENT_API_TIMEOUT_SECS`: request timeout in seconds
    /// - `CONTENT_API_RATE_LIMIT`: requests per window per credential
    /// - `CONTENT_API_RATE_WINDOW_SECS`: window length in seconds
    /// - `CONTENT_API_CACHE_TTL_SECS`: default cache TTL in seconds
    /// - `CONTENT_API_READ_MAX_ATTEMPTS`: attempts for reads
    /// - `CONTENT_API_WRITE_MAX_ATTEMPTS`: attempts for writes
    ///
    /// Unset variables keep their defaults; malformed ones are errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |name: &str| -> Result<Option<u64>, ConfigError> {
            match lookup(name) {
                None => Ok(None),
                Some(raw) => raw.trim().parse::<u64>().map(Some).map_err(|_| {
                    ConfigError::invalid(format!("{} must be a non-negative integer, got '{}'", name, raw))
                }),
            }
        };
        let small = |name: &str| -> Result<Option<u32>, ConfigError> {
            number(name)?
                .map(|v| u32::try_from(v).map_err(|_| ConfigError::invalid(format!("{} is too large", name))))
                .transpose()
        };

        let mut builder = ContentApiConfigBuilder::new();

        if let Some(base_url) = lookup("CONTENT_API_BASE_URL") {
            builder = builder.base_url(base_url);
        }
        if let Some(secs) = number("CONTENT_API_TIMEOUT_SECS")? {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(limit) = small("CONTENT_API_RATE_LIMIT")? {
            builder = builder.rate_limit(limit);
        }
        if let Some(secs) = number("CONTENT_API_RATE_WINDOW_SECS")? {
            builder = builder.rate_window(Duration::from_secs(secs));
        }
        if let Some(secs) = number("CONTENT_API_CACHE_TTL_SECS")? {
            builder = builder.cache_ttl(Duration::from_secs(secs));
        }
        if let Some(attempts) = small("CONTENT_API_READ_MAX_ATTEMPTS")? {
            builder = builder.read_max_attempts(attempts);
        }
        if let Some(attempts) = small("CONTENT_API_WRITE_MAX_ATTEMPTS")? {
            builder = builder.write_max_attempts(attempts);
        }

        builder.build()
    }

    /// Transport settings derived from this configuration.
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            base_url: self.base_url.clone(),
            timeout: self.timeout,
            user_agent: self.user_agent.clone(),
        }
    }

    /// Checks every invariant the router relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.base_url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::invalid("Base URL must start with http:// or https://"));
        }
        if self.rate_limit.limit == 0 {
            return Err(ConfigError::invalid("rate limit must admit at least one request"));
        }
        if self.rate_limit.window.is_zero() {
            return Err(ConfigError::invalid("rate window must be positive"));
        }
        if self.write_policy.max_attempts() >= self.read_policy.max_attempts() {
            return Err(ConfigError::invalid(format!(
                "write max_attempts ({}) must be below read max_attempts ({})",
                self.write_policy.max_attempts(),
                self.read_policy.max_attempts()
            )));
        }
        if self.cache_capacity == Some(0) {
            return Err(ConfigError::invalid("cache capacity must be positive"));
        }
        Ok(())
    }
}

/// Builder for [`ContentApiConfig`].
#[derive(Debug, Default)]
pub struct ContentApiConfigBuilder {
    config: ContentApiConfig,
    read_max_attempts: Option<u32>,
    write_max_attempts: Option<u32>,
}

impl ContentApiConfigBuilder {
    /// Creates a builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Sets the User-Agent header.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Sets requests admitted per window per credential.
    pub fn rate_limit(mut self, limit: u32) -> Self {
        self.config.rate_limit.limit = limit;
        self
    }

    /// Sets the rate window length.
    pub fn rate_window(mut self, window: Duration) -> Self {
        self.config.rate_limit.window = window;
        self
    }

    /// Replaces the read retry policy.
    pub fn read_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.read_policy = policy;
        self
    }

    /// Replaces the write retry policy.
    pub fn write_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.write_policy = policy;
        self
    }

    /// Overrides only the attempt budget of the read policy.
    pub fn read_max_attempts(mut self, attempts: u32) -> Self {
        self.read_max_attempts = Some(attempts);
        self
    }

    /// Overrides only the attempt budget of the write policy.
    pub fn write_max_attempts(mut self, attempts: u32) -> Self {
        self.write_max_attempts = Some(attempts);
        self
    }

    /// Sets the default cache TTL.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    /// Bounds the cache size; `None` leaves it unbounded.
    pub fn cache_capacity(mut self, capacity: Option<usize>) -> Self {
        self.config.cache_capacity = capacity;
        self
    }

    /// Sets the wait attached to a 429 without rate-limit headers.
    pub fn rate_limit_fallback(mut self, fallback: Duration) -> Self {
        self.config.rate_limit_fallback = Some(fallback);
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<ContentApiConfig, ConfigError> {
        let mut config = self.config;

        if let Some(attempts) = self.read_max_attempts {
            config.read_policy = rebuild(&config.read_policy, attempts)?;
        }
        if let Some(attempts) = self.write_max_attempts {
            config.write_policy = rebuild(&config.write_policy, attempts)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn rebuild(policy: &RetryPolicy, max_attempts: u32) -> Result<RetryPolicy, ConfigError> {
    RetryPolicy::builder()
        .max_attempts(max_attempts)
        .base_delay(policy.base_delay())
        .multiplier(policy.multiplier())
        .max_delay(policy.max_delay())
        .jitter_ratio(policy.jitter_ratio())
        .build()
}
