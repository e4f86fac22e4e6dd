//! Tests for error classification, retry, rate limiting and caching.

use integrations_content_api::cache::{CacheKey, ResponseCache};
use integrations_content_api::errors::{ErrorClassifier, ErrorKind, RawFailure};
use integrations_content_api::resilience::{
    RateLimiter, RateLimiterConfig, RetryExecutor, RetryPolicy,
};
use integrations_content_api::transport::{ConnectionFailure, HttpResponse, TransportError};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use test_case::test_case;

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::builder()
        .max_attempts(max_attempts)
        .base_delay(Duration::from_millis(1000))
        .multiplier(2.0)
        .max_delay(Duration::from_millis(8000))
        .jitter_ratio(0.0)
        .build()
        .unwrap()
}

fn params(value: Value) -> BTreeMap<String, Value> {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        _ => BTreeMap::new(),
    }
}

#[test]
fn test_429_with_retry_after_is_retryable_rate_limit() {
    let response = HttpResponse::new(429, r#"{"error":"rate_limited","message":"slow down"}"#)
        .with_header("Retry-After", "30");

    let error = ErrorClassifier::new().classify(&RawFailure::Http(response));

    assert_eq!(error.kind(), ErrorKind::RateLimit);
    assert!(error.is_retryable());
    assert_eq!(error.retry_after(), Some(Duration::from_secs(30)));
    assert_eq!(error.message(), "slow down");
}

#[test_case("retry-after", "soon", None ; "non numeric")]
#[test_case("retry-after", "1e30", None ; "huge float")]
#[test_case("retry-after", "99999999999999999999", None ; "huge integer")]
#[test_case("retry-after", "-1", None ; "negative")]
#[test_case("retry-after", "2.5", Some(Duration::from_millis(2500)) ; "fractional")]
#[test_case("x-ratelimit-perhour-reset", "600", Some(Duration::from_secs(600)) ; "hourly reset")]
fn test_retry_after_header_edge_cases(header: &str, value: &str, expected: Option<Duration>) {
    let classifier = ErrorClassifier::new();
    for status in [429, 503] {
        let response = HttpResponse::new(status, "").with_header(header, value);
        let error = classifier.classify(&RawFailure::Http(response));

        assert!(error.is_retryable());
        assert_eq!(error.retry_after(), expected, "status {}", status);
    }
}

#[test]
fn test_epoch_and_http_date_resets_become_relative_waits() {
    let classifier = ErrorClassifier::new();
    let epoch = chrono::Utc::now().timestamp() + 300;
    let date = (chrono::Utc::now() + chrono::Duration::seconds(300)).to_rfc2822();

    for (header, value) in [("x-ratelimit-reset", epoch.to_string()), ("retry-after", date)] {
        let response = HttpResponse::new(429, "").with_header(header, value);
        let wait = classifier
            .classify(&RawFailure::Http(response))
            .retry_after()
            .unwrap();

        assert!(wait > Duration::from_secs(290), "{}: {:?}", header, wait);
        assert!(wait <= Duration::from_secs(300), "{}: {:?}", header, wait);
    }
}

#[test_case(401 ; "unauthorized")]
#[test_case(403 ; "forbidden")]
fn test_auth_failures_never_retryable(status: u16) {
    let error = ErrorClassifier::new().classify(&RawFailure::Http(HttpResponse::new(status, "")));

    assert_eq!(error.kind(), ErrorKind::Authentication);
    assert!(!error.is_retryable());
}

#[test]
fn test_backoff_is_non_decreasing_and_capped() {
    let policy = policy(10);
    let delays: Vec<u128> = (1..=5)
        .map(|attempt| policy.delay_for_attempt(attempt).as_millis())
        .collect();

    assert_eq!(delays, vec![1000, 2000, 4000, 8000, 8000]);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_retryable_failure_uses_whole_budget() {
    let executor = RetryExecutor::default();
    let attempts = AtomicU32::new(0);

    let result = executor
        .run("blog.info", &policy(3), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<Value, _>(RawFailure::Transport(TransportError::connection(
                    ConnectionFailure::Connect,
                    "refused",
                )))
            }
        })
        .await;

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Network);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_failure_makes_one_attempt() {
    let executor = RetryExecutor::default();
    let attempts = AtomicU32::new(0);

    let result = executor
        .run("post.create", &policy(5), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<Value, _>(RawFailure::Http(HttpResponse::new(400, "bad"))) }
        })
        .await;

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Validation);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_limiter_grants_limit_then_denies() {
    let limiter = RateLimiter::new(RateLimiterConfig::new(3, Duration::from_secs(60)));

    for _ in 0..3 {
        assert!(limiter.acquire("alice").granted);
    }

    let denied = limiter.acquire("alice");
    assert!(!denied.granted);
    assert!(denied.wait > Duration::ZERO);
    assert!(denied.wait <= Duration::from_secs(60));

    // Other credentials keep their own budget.
    assert!(limiter.acquire("bob").granted);
}

#[tokio::test(start_paused = true)]
async fn test_limiter_fresh_window_after_expiry() {
    let limiter = RateLimiter::new(RateLimiterConfig::new(2, Duration::from_secs(60)));

    assert!(limiter.acquire("alice").granted);
    assert!(limiter.acquire("alice").granted);
    assert!(!limiter.acquire("alice").granted);

    tokio::time::advance(Duration::from_secs(60)).await;

    assert!(limiter.acquire("alice").granted);
    assert_eq!(limiter.window("alice").unwrap().request_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_limiter_concurrent_acquire_never_over_admits() {
    let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::new(
        25,
        Duration::from_secs(60),
    )));

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire("shared").granted })
        })
        .collect();

    let mut granted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            granted += 1;
        }
    }

    assert_eq!(granted, 25);
}

#[tokio::test(start_paused = true)]
async fn test_cache_hit_before_expiry_miss_at_expiry() {
    let cache = ResponseCache::new();
    let key = CacheKey::derive("blog", "info", &params(json!({"blog": "staff"})), "alice");

    cache.set(key.clone(), json!({"title": "Staff"}), Duration::from_millis(1000));

    tokio::time::advance(Duration::from_millis(999)).await;
    assert_eq!(cache.get(&key), Some(json!({"title": "Staff"})));

    tokio::time::advance(Duration::from_millis(1)).await;
    assert_eq!(cache.get(&key), None);
    assert!(cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_write_invalidation_clears_resource() {
    let cache = ResponseCache::new();
    let blog = CacheKey::derive("blog", "info", &params(json!({"blog": "staff"})), "alice");
    let posts = CacheKey::derive("blog", "posts", &params(json!({"blog": "staff"})), "alice");
    let user = CacheKey::derive("user", "info", &BTreeMap::new(), "alice");

    for key in [&blog, &posts, &user] {
        cache.set(key.clone(), json!({}), Duration::from_secs(300));
    }

    assert_eq!(cache.invalidate("blog"), 2);
    assert_eq!(cache.get(&blog), None);
    assert_eq!(cache.get(&posts), None);
    assert!(cache.get(&user).is_some());
}

#[test]
fn test_cache_key_ignores_parameter_order_and_nulls() {
    let a = CacheKey::derive("blog", "posts", &params(json!({"limit": 5, "blog": "staff"})), "alice");
    let b = CacheKey::derive(
        "blog",
        "posts",
        &params(json!({"blog": "staff", "limit": 5, "tag": null})),
        "alice",
    );
    let other_credential = CacheKey::derive("blog", "posts", &params(json!({"blog": "staff", "limit": 5})), "bob");

    assert_eq!(a, b);
    assert_ne!(a, other_credential);
    assert!(a.as_str().starts_with("blog:"));
}
