//! Per-credential request budgets over fixed windows.
//!
//! Each credential owns one [`RateWindow`]. A window admits `limit` requests
//! and resets wholesale once `window_duration` has elapsed since it started.
//! This accepts a possible burst of up to `2 * limit` around a window
//! boundary in exchange for O(1) state and update cost per credential.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default requests admitted per window.
pub const DEFAULT_LIMIT: u32 = 300;

/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Configuration for rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Requests admitted per window.
    pub limit: u32,
    /// Window length.
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            window: DEFAULT_WINDOW,
        }
    }
}

impl RateLimiterConfig {
    /// Creates a configuration admitting `limit` requests per `window`.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }
}

/// Budget state for one credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateWindow {
    /// The credential this window counts for.
    pub credential_id: String,
    /// When the current window began.
    pub window_started_at: Instant,
    /// Requests admitted in the current window.
    pub request_count: u32,
    /// Requests admitted per window.
    pub limit: u32,
    /// Window length.
    pub window_duration: Duration,
}

impl RateWindow {
    fn new(credential_id: &str, config: RateLimiterConfig, now: Instant) -> Self {
        Self {
            credential_id: credential_id.to_string(),
            window_started_at: now,
            request_count: 0,
            limit: config.limit,
            window_duration: config.window,
        }
    }

    fn roll(&mut self, now: Instant) {
        if now.saturating_duration_since(self.window_started_at) >= self.window_duration {
            self.request_count = 0;
            self.window_started_at = now;
        }
    }

    fn time_until_reset(&self, now: Instant) -> Duration {
        self.window_duration
            .saturating_sub(now.saturating_duration_since(self.window_started_at))
    }
}

/// Outcome of an [`RateLimiter::acquire`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request may proceed now.
    pub granted: bool,
    /// How long to wait before acquiring again; zero when granted.
    pub wait: Duration,
}

impl RateDecision {
    fn granted() -> Self {
        Self {
            granted: true,
            wait: Duration::ZERO,
        }
    }

    fn denied(wait: Duration) -> Self {
        Self {
            granted: false,
            wait,
        }
    }

    /// Wait in whole milliseconds.
    pub fn wait_ms(&self) -> u64 {
        u64::try_from(self.wait.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Rate limit information reported by the remote API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    /// Requests allowed per remote window.
    pub limit: Option<u32>,
    /// Requests left in the remote window.
    pub remaining: Option<u32>,
    /// Seconds until the remote window resets.
    pub reset_after: Option<Duration>,
}

impl RateLimitHeaders {
    /// Parses rate limit headers from a lowercase-keyed header map.
    pub fn from_headers(headers: &HashMap<String, String>) -> Self {
        let number = |name: &str| headers.get(name).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            limit: number("x-ratelimit-limit").and_then(|v| u32::try_from(v).ok()),
            remaining: number("x-ratelimit-remaining").and_then(|v| u32::try_from(v).ok()),
            reset_after: number("x-ratelimit-reset").map(Duration::from_secs),
        }
    }

    /// Returns true if no rate limit header was present.
    pub fn is_empty(&self) -> bool {
        self.limit.is_none() && self.remaining.is_none() && self.reset_after.is_none()
    }
}

/// Gates admission per credential identity.
///
/// `acquire` calls for the same credential are linearized by a single lock
/// that is never held across an await point.
pub struct RateLimiter {
    default_config: RateLimiterConfig,
    overrides: Mutex<HashMap<String, RateLimiterConfig>>,
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl RateLimiter {
    /// Creates a limiter applying `config` to every credential.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            default_config: config,
            overrides: Mutex::new(HashMap::new()),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// The configuration applied to credentials without an override.
    pub fn config(&self) -> RateLimiterConfig {
        self.default_config
    }

    /// Gives one credential its own budget, replacing any current window.
    pub fn configure_credential(&self, credential_id: &str, config: RateLimiterConfig) {
        self.overrides
            .lock()
            .insert(credential_id.to_string(), config);
        self.windows.lock().remove(credential_id);
    }

    /// Tries to admit one request for `credential_id`.
    pub fn acquire(&self, credential_id: &str) -> RateDecision {
        let now = Instant::now();
        let config = self.config_for(credential_id);

        let mut windows = self.windows.lock();
        let window = windows
            .entry(credential_id.to_string())
            .or_insert_with(|| RateWindow::new(credential_id, config, now));

        window.roll(now);

        if window.request_count < window.limit {
            window.request_count += 1;
            return RateDecision::granted();
        }

        let wait = window.time_until_reset(now);
        debug!(
            credential_id,
            limit = window.limit,
            wait_ms = wait.as_millis() as u64,
            "Rate window exhausted"
        );
        RateDecision::denied(wait)
    }

    /// Folds the remote API's view of the budget into the local window.
    ///
    /// Spent budget is measured against the remote limit when the headers
    /// carry one, else against the local limit. The local count only ever
    /// rises, so budget spent by other clients of the same credential is
    /// respected without double-refunding.
    pub fn sync_from_headers(&self, credential_id: &str, headers: &RateLimitHeaders) {
        let Some(remaining) = headers.remaining else {
            return;
        };

        let now = Instant::now();
        let config = self.config_for(credential_id);

        let mut windows = self.windows.lock();
        let window = windows
            .entry(credential_id.to_string())
            .or_insert_with(|| RateWindow::new(credential_id, config, now));

        window.roll(now);

        let remote_limit = headers.limit.unwrap_or(window.limit);
        let spent = remote_limit.saturating_sub(remaining);
        if spent > window.request_count {
            debug!(
                credential_id,
                local = window.request_count,
                remote = spent,
                "Raising local request count from remote headers"
            );
            window.request_count = spent;
        }
    }

    /// Snapshot of a credential's window, if it has made any request.
    pub fn window(&self, credential_id: &str) -> Option<RateWindow> {
        self.windows.lock().get(credential_id).cloned()
    }

    /// Requests still admissible for `credential_id` in its current window.
    pub fn remaining(&self, credential_id: &str) -> u32 {
        let now = Instant::now();
        match self.windows.lock().get_mut(credential_id) {
            Some(window) => {
                window.roll(now);
                window.limit.saturating_sub(window.request_count)
            }
            None => self.config_for(credential_id).limit,
        }
    }

    /// Forgets every window.
    pub fn reset(&self) {
        self.windows.lock().clear();
        debug!("Rate windows reset");
    }

    fn config_for(&self, credential_id: &str) -> RateLimiterConfig {
        self.overrides
            .lock()
            .get(credential_id)
            .copied()
            .unwrap_or(self.default_config)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.default_config)
            .field("credentials", &self.windows.lock().len())
            .finish()
    }
}
