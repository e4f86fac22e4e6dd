//! Operation router: the single entry point for calling the content API.
//!
//! A call flows through catalog lookup, the response cache, the retry
//! executor and, inside every attempt, the per-credential rate limiter
//! before reaching the transport.

mod catalog;
mod request;

pub use catalog::{OperationCatalog, OperationClass, OperationSpec, PreparedCall};
pub use request::OperationRequest;

use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::auth::TokenProvider;
use crate::cache::{CacheKey, ResponseCache, DEFAULT_CACHE_TTL};
use crate::config::ContentApiConfig;
use crate::errors::{ClassifiedError, ConfigError, ContentApiResult, ErrorClassifier, RawFailure};
use crate::observability::{DefaultMetricsCollector, MetricsCollector};
use crate::resilience::{
    RateLimitHeaders, RateLimiter, RateLimiterConfig, RetryExecutor, RetryHook, RetryPolicy,
};
use crate::transport::{HttpResponse, ReqwestTransport, Transport};

/// Routes operations to the transport under caching, rate limiting and retry.
pub struct OperationRouter {
    catalog: OperationCatalog,
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    executor: RetryExecutor,
    read_policy: RetryPolicy,
    write_policy: RetryPolicy,
    cache_ttl: Duration,
    metrics: Arc<dyn MetricsCollector>,
}

impl OperationRouter {
    /// Creates a builder around `transport`.
    pub fn builder(transport: Arc<dyn Transport>) -> OperationRouterBuilder {
        OperationRouterBuilder::new(transport)
    }

    /// Creates a router from a validated configuration.
    pub fn from_config(
        config: &ContentApiConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        Self::builder(transport).config(config).build()
    }

    /// Creates a router talking HTTP through `reqwest`.
    pub fn connect(
        config: &ContentApiConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let transport = ReqwestTransport::new(config.transport_config(), tokens)?;
        Self::from_config(config, Arc::new(transport))
    }

    /// Builds a request for a known operation, taking its cache flags from
    /// the catalog: reads are cacheable and idempotent, writes are neither.
    pub fn prepare(
        &self,
        resource: &str,
        operation: &str,
        credential_id: &str,
    ) -> ContentApiResult<OperationRequest> {
        let spec = self.lookup(resource, operation)?;
        let is_read = spec.class() == OperationClass::Read;

        Ok(OperationRequest::new(resource, operation, credential_id)
            .cacheable(is_read)
            .idempotent(is_read))
    }

    /// Executes an operation.
    ///
    /// Dropping the returned future cancels it: no further attempt is made,
    /// budget already spent stays spent, and nothing is cached.
    #[instrument(
        name = "execute",
        skip(self, request),
        fields(
            resource = %request.resource,
            operation = %request.operation,
            credential_id = %request.credential_id,
        )
    )]
    pub async fn execute(&self, request: OperationRequest) -> ContentApiResult<Value> {
        let spec = match self.lookup(&request.resource, &request.operation) {
            Ok(spec) => spec,
            Err(error) => {
                self.metrics.record_error(&request.resource, error.kind());
                return Err(error);
            }
        };

        let call = match spec.render(&request.parameters) {
            Ok(call) => call,
            Err(error) => {
                self.metrics.record_error(&request.resource, error.kind());
                return Err(error);
            }
        };

        let cache_key = (request.uses_cache() && spec.class() == OperationClass::Read).then(|| {
            CacheKey::derive(
                &request.resource,
                &request.operation,
                &request.parameters,
                &request.credential_id,
            )
        });

        if let Some(key) = &cache_key {
            let cached = self.cache.get(key);
            self.metrics
                .record_cache_lookup(&request.resource, cached.is_some());
            if let Some(payload) = cached {
                debug!("Served from cache");
                return Ok(payload);
            }
        }

        let policy = self.policy_for(spec.class());
        let attempts = AtomicU32::new(0);
        let started = Instant::now();
        let name = request.name();

        let result = self
            .executor
            .run(&name, policy, || {
                self.attempt(&call, &request.credential_id, &attempts)
            })
            .await;

        let attempts = attempts.load(Ordering::Relaxed);
        self.metrics.record_retries(
            &request.resource,
            &request.operation,
            attempts.saturating_sub(1),
        );
        self.metrics.record_request(
            &request.resource,
            &request.operation,
            started.elapsed(),
            result.is_ok(),
        );

        match result {
            Ok(payload) => {
                if let Some(key) = cache_key {
                    let ttl = spec.cache_ttl().unwrap_or(self.cache_ttl);
                    if !ttl.is_zero() {
                        self.cache.set(key, payload.clone(), ttl);
                    }
                }
                if spec.class() == OperationClass::Write {
                    for prefix in spec.invalidates() {
                        self.cache.invalidate(prefix);
                    }
                }
                debug!(attempts, "Operation succeeded");
                Ok(payload)
            }
            Err(error) => {
                self.metrics.record_error(&request.resource, error.kind());
                Err(error)
            }
        }
    }

    async fn attempt(
        &self,
        call: &PreparedCall,
        credential_id: &str,
        attempts: &AtomicU32,
    ) -> Result<Value, RawFailure> {
        attempts.fetch_add(1, Ordering::Relaxed);

        let decision = self.limiter.acquire(credential_id);
        if !decision.granted {
            self.metrics
                .record_rate_limit_wait(credential_id, decision.wait);
            return Err(RawFailure::Throttled {
                wait: decision.wait,
            });
        }

        let response = self
            .transport
            .send(call.method, &call.path, call.body.clone(), credential_id)
            .await?;

        let headers = RateLimitHeaders::from_headers(&response.headers);
        if !headers.is_empty() {
            self.limiter.sync_from_headers(credential_id, &headers);
        }

        if !response.is_success() {
            return Err(RawFailure::Http(response));
        }

        parse_payload(&response)
    }

    fn lookup(&self, resource: &str, operation: &str) -> ContentApiResult<&OperationSpec> {
        self.catalog.get(resource, operation).ok_or_else(|| {
            ClassifiedError::validation(format!("unknown operation '{}.{}'", resource, operation))
        })
    }

    /// The retry policy applied to an operation class.
    pub fn policy_for(&self, class: OperationClass) -> &RetryPolicy {
        match class {
            OperationClass::Read => &self.read_policy,
            OperationClass::Write => &self.write_policy,
        }
    }

    /// Returns the operation catalog.
    pub fn catalog(&self) -> &OperationCatalog {
        &self.catalog
    }

    /// Returns the shared response cache.
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Returns the shared rate limiter.
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Returns the metrics collector.
    pub fn metrics(&self) -> &dyn MetricsCollector {
        self.metrics.as_ref()
    }
}

impl std::fmt::Debug for OperationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationRouter")
            .field("operations", &self.catalog.len())
            .field("read_policy", &self.read_policy)
            .field("write_policy", &self.write_policy)
            .field("cache_ttl", &self.cache_ttl)
            .field("cached_entries", &self.cache.len())
            .finish()
    }
}

fn parse_payload(response: &HttpResponse) -> Result<Value, RawFailure> {
    if response.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }

    serde_json::from_slice(&response.body).map_err(|e| RawFailure::Malformed {
        status: Some(response.status),
        message: format!("invalid JSON in response body: {}", e),
    })
}

/// Builder for [`OperationRouter`].
pub struct OperationRouterBuilder {
    transport: Arc<dyn Transport>,
    catalog: OperationCatalog,
    rate_limit: RateLimiterConfig,
    limiter: Option<Arc<RateLimiter>>,
    cache_capacity: Option<usize>,
    cache: Option<Arc<ResponseCache>>,
    cache_ttl: Duration,
    read_policy: RetryPolicy,
    write_policy: RetryPolicy,
    classifier: ErrorClassifier,
    seed: Option<u64>,
    hook: Option<Arc<dyn RetryHook>>,
    metrics: Option<Arc<dyn MetricsCollector>>,
}

impl OperationRouterBuilder {
    /// Creates a builder with default policies and the blog API catalog.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            catalog: OperationCatalog::blog_api(),
            rate_limit: RateLimiterConfig::default(),
            limiter: None,
            cache_capacity: None,
            cache: None,
            cache_ttl: DEFAULT_CACHE_TTL,
            read_policy: RetryPolicy::reads(),
            write_policy: RetryPolicy::writes(),
            classifier: ErrorClassifier::new(),
            seed: None,
            hook: None,
            metrics: None,
        }
    }

    /// Applies every setting carried by `config`.
    pub fn config(mut self, config: &ContentApiConfig) -> Self {
        self.rate_limit = config.rate_limit;
        self.cache_capacity = config.cache_capacity;
        self.cache_ttl = config.cache_ttl;
        self.read_policy = config.read_policy.clone();
        self.write_policy = config.write_policy.clone();
        self.classifier = match config.rate_limit_fallback {
            Some(fallback) => ErrorClassifier::new().with_rate_limit_fallback(fallback),
            None => ErrorClassifier::new(),
        };
        self
    }

    /// Replaces the operation catalog.
    pub fn catalog(mut self, catalog: OperationCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Sets the budget applied to every credential.
    pub fn rate_limit(mut self, config: RateLimiterConfig) -> Self {
        self.rate_limit = config;
        self
    }

    /// Shares an existing rate limiter.
    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Shares an existing response cache.
    pub fn cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the TTL for reads without a per-operation TTL.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Sets the retry policy for reads.
    pub fn read_policy(mut self, policy: RetryPolicy) -> Self {
        self.read_policy = policy;
        self
    }

    /// Sets the retry policy for writes.
    pub fn write_policy(mut self, policy: RetryPolicy) -> Self {
        self.write_policy = policy;
        self
    }

    /// Sets the error classifier.
    pub fn classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Fixes the jitter sequence.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets a retry hook.
    pub fn retry_hook(mut self, hook: Arc<dyn RetryHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Sets the metrics collector.
    pub fn metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Builds the router.
    pub fn build(self) -> Result<OperationRouter, ConfigError> {
        if self.write_policy.max_attempts() >= self.read_policy.max_attempts() {
            return Err(ConfigError::invalid(format!(
                "write max_attempts ({}) must be below read max_attempts ({})",
                self.write_policy.max_attempts(),
                self.read_policy.max_attempts()
            )));
        }

        let executor = match self.seed {
            Some(seed) => RetryExecutor::with_seed(self.classifier, seed),
            None => RetryExecutor::new(self.classifier),
        };
        let executor = match self.hook {
            Some(hook) => executor.with_hook(hook),
            None => executor,
        };

        let limiter = self
            .limiter
            .unwrap_or_else(|| Arc::new(RateLimiter::new(self.rate_limit)));
        let cache = self.cache.unwrap_or_else(|| {
            Arc::new(match self.cache_capacity {
                Some(capacity) => ResponseCache::with_capacity(capacity),
                None => ResponseCache::new(),
            })
        });
        let metrics = self
            .metrics
            .unwrap_or_else(|| Arc::new(DefaultMetricsCollector::new()));

        Ok(OperationRouter {
            catalog: self.catalog,
            transport: self.transport,
            limiter,
            cache,
            executor,
            read_policy: self.read_policy,
            write_policy: self.write_policy,
            cache_ttl: self.cache_ttl,
            metrics,
        })
    }
}
