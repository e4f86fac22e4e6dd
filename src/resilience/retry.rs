//! Retry logic with exponential backoff and jitter.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::{ClassifiedError, ConfigError, ContentApiResult, ErrorClassifier, RawFailure};

/// Backoff policy for one class of operations. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    jitter_ratio: f64,
}

impl RetryPolicy {
    /// Creates a builder seeded with the read defaults.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// Default policy for reads: 4 attempts, 1s base, doubling, capped at 30s.
    pub fn reads() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter_ratio: 0.2,
        }
    }

    /// Default policy for writes: 2 attempts, so an ambiguous failure is
    /// re-applied at most once.
    pub fn writes() -> Self {
        Self {
            max_attempts: 2,
            ..Self::reads()
        }
    }

    /// Total attempts allowed, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the first retry.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Growth factor between consecutive delays.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Upper bound on the computed delay.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Fraction of the delay randomized around its nominal value.
    pub fn jitter_ratio(&self) -> f64 {
        self.jitter_ratio
    }

    /// Nominal delay after the given failed attempt (1-indexed), before jitter.
    ///
    /// `min(max_delay, base_delay * multiplier^(attempt - 1))`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_ms = self.base_delay.as_secs_f64() * 1000.0;
        let max_ms = self.max_delay.as_secs_f64() * 1000.0;
        let delay_ms = (base_ms * self.multiplier.powi(exponent)).min(max_ms);

        Duration::try_from_secs_f64(delay_ms / 1000.0)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Applies jitter given a uniform sample in `[0, 1)`:
    /// `delay * (1 - jitter/2 + sample * jitter)`.
    pub fn apply_jitter(&self, delay: Duration, sample: f64) -> Duration {
        if self.jitter_ratio == 0.0 {
            return delay;
        }
        let factor = 1.0 - self.jitter_ratio / 2.0 + sample.clamp(0.0, 1.0) * self.jitter_ratio;
        Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::reads()
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::reads(),
        }
    }
}

impl RetryPolicyBuilder {
    /// Sets the total number of attempts.
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.policy.max_attempts = n;
        self
    }

    /// Sets the delay before the first retry.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.policy.base_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn multiplier(mut self, m: f64) -> Self {
        self.policy.multiplier = m;
        self
    }

    /// Sets the delay cap.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Sets the jitter ratio.
    pub fn jitter_ratio(mut self, ratio: f64) -> Self {
        self.policy.jitter_ratio = ratio;
        self
    }

    /// Validates and builds the policy.
    pub fn build(self) -> Result<RetryPolicy, ConfigError> {
        let p = self.policy;
        if p.max_attempts < 1 {
            return Err(ConfigError::invalid("max_attempts must be at least 1"));
        }
        if p.base_delay.is_zero() {
            return Err(ConfigError::invalid("base_delay must be positive"));
        }
        if !(p.multiplier.is_finite() && p.multiplier > 1.0) {
            return Err(ConfigError::invalid("multiplier must be greater than 1"));
        }
        if p.max_delay < p.base_delay {
            return Err(ConfigError::invalid("max_delay must not be below base_delay"));
        }
        if !(0.0..=1.0).contains(&p.jitter_ratio) {
            return Err(ConfigError::invalid("jitter_ratio must be within [0, 1]"));
        }
        Ok(p)
    }
}

/// Context passed to retry hooks.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// The attempt that just failed (1-indexed).
    pub attempt: u32,
    /// The classified failure.
    pub error: ClassifiedError,
    /// The delay the executor intends to wait.
    pub delay: Duration,
    /// The operation being retried.
    pub operation: String,
}

/// Decision returned by retry hooks.
#[derive(Debug, Clone)]
pub enum RetryDecision {
    /// Use default retry behavior.
    Default,
    /// Retry with a custom delay.
    Retry(Duration),
    /// Abort and return the error.
    Abort,
}

/// Hook for custom retry behavior.
#[async_trait]
pub trait RetryHook: Send + Sync {
    /// Called before each retry is scheduled.
    async fn on_retry(&self, context: RetryContext) -> RetryDecision;
}

/// Runs operations under a [`RetryPolicy`].
pub struct RetryExecutor {
    classifier: ErrorClassifier,
    rng: Mutex<StdRng>,
    hook: Option<Arc<dyn RetryHook>>,
}

impl RetryExecutor {
    /// Creates an executor with an entropy-seeded jitter source.
    pub fn new(classifier: ErrorClassifier) -> Self {
        Self {
            classifier,
            rng: Mutex::new(StdRng::from_entropy()),
            hook: None,
        }
    }

    /// Creates an executor whose jitter sequence is fixed by `seed`.
    pub fn with_seed(classifier: ErrorClassifier, seed: u64) -> Self {
        Self {
            classifier,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            hook: None,
        }
    }

    /// Sets a retry hook.
    pub fn with_hook(mut self, hook: Arc<dyn RetryHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// The classifier applied to failed attempts.
    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Runs `f` until it succeeds, fails with a non-retryable error, or the
    /// policy's attempt budget is spent.
    ///
    /// Waits are `tokio::time::sleep`s, so dropping the returned future
    /// during a backoff cancels the remaining attempts.
    pub async fn run<F, Fut, T>(
        &self,
        operation: &str,
        policy: &RetryPolicy,
        f: F,
    ) -> ContentApiResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, RawFailure>>,
    {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let failure = match f().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(failure) => failure,
            };

            let error = self.classifier.classify(&failure);

            if !error.is_retryable() {
                debug!(operation, attempt, kind = %error.kind(), "Non-retryable failure");
                return Err(error);
            }

            if attempt >= policy.max_attempts() {
                warn!(
                    operation,
                    attempts = attempt,
                    kind = %error.kind(),
                    "Retry budget exhausted"
                );
                return Err(error);
            }

            let delay = match error.retry_after() {
                Some(server_delay) => server_delay,
                None => self.backoff(policy, attempt),
            };

            let delay = match &self.hook {
                Some(hook) => {
                    let context = RetryContext {
                        attempt,
                        error: error.clone(),
                        delay,
                        operation: operation.to_string(),
                    };
                    match hook.on_retry(context).await {
                        RetryDecision::Default => delay,
                        RetryDecision::Retry(custom) => custom,
                        RetryDecision::Abort => return Err(error),
                    }
                }
                None => delay,
            };

            warn!(
                operation,
                attempt,
                kind = %error.kind(),
                status = ?error.http_status(),
                delay_ms = delay.as_millis() as u64,
                "Retrying after failure"
            );

            tokio::time::sleep(delay).await;
        }
    }

    /// Computed, jittered delay after the given failed attempt.
    pub fn backoff(&self, policy: &RetryPolicy, attempt: u32) -> Duration {
        let nominal = policy.delay_for_attempt(attempt);
        let sample: f64 = self.rng.lock().gen();
        policy.apply_jitter(nominal, sample)
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(ErrorClassifier::default())
    }
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("classifier", &self.classifier)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}
