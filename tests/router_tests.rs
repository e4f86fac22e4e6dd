//! End-to-end tests for the operation router.

use integrations_content_api::auth::StaticTokenProvider;
use integrations_content_api::config::ContentApiConfig;
use integrations_content_api::errors::ErrorKind;
use integrations_content_api::mocks::{MockResponse, MockTransport};
use integrations_content_api::resilience::{RateLimiterConfig, RetryPolicy};
use integrations_content_api::router::{OperationRequest, OperationRouter};
use integrations_content_api::transport::{Method, ReqwestTransport};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn reads() -> RetryPolicy {
    RetryPolicy::builder()
        .max_attempts(3)
        .base_delay(Duration::from_millis(100))
        .max_delay(Duration::from_millis(1000))
        .jitter_ratio(0.0)
        .build()
        .unwrap()
}

fn writes() -> RetryPolicy {
    RetryPolicy::builder()
        .max_attempts(2)
        .base_delay(Duration::from_millis(100))
        .max_delay(Duration::from_millis(1000))
        .jitter_ratio(0.0)
        .build()
        .unwrap()
}

fn router_with(transport: &MockTransport, rate_limit: RateLimiterConfig) -> OperationRouter {
    OperationRouter::builder(Arc::new(transport.clone()))
        .read_policy(reads())
        .write_policy(writes())
        .rate_limit(rate_limit)
        .build()
        .unwrap()
}

fn router(transport: &MockTransport) -> OperationRouter {
    router_with(transport, RateLimiterConfig::default())
}

fn blog_info(router: &OperationRouter) -> OperationRequest {
    router
        .prepare("blog", "info", "alice")
        .unwrap()
        .param("blog", "staff")
}

#[tokio::test(start_paused = true)]
async fn test_read_is_cached_for_its_ttl_with_no_retries() {
    let transport = MockTransport::new()
        .with_default_response(MockResponse::json(json!({"blog": {"title": "Staff"}})));
    let router = router(&transport);

    let first = router.execute(blog_info(&router)).await.unwrap();
    let second = router.execute(blog_info(&router)).await.unwrap();

    assert_eq!(first, json!({"blog": {"title": "Staff"}}));
    assert_eq!(first, second);
    assert_eq!(transport.request_count(), 1);
    assert_eq!(router.metrics().snapshot().total_retries, 0);

    // blog.info carries a ten minute TTL.
    tokio::time::advance(Duration::from_secs(599)).await;
    router.execute(blog_info(&router)).await.unwrap();
    assert_eq!(transport.request_count(), 1);

    tokio::time::advance(Duration::from_secs(1)).await;
    router.execute(blog_info(&router)).await.unwrap();
    assert_eq!(transport.request_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_then_success_is_cached() {
    let transport = MockTransport::new().add_responses([
        MockResponse::status(503, "unavailable"),
        MockResponse::status(503, "unavailable"),
        MockResponse::json(json!({"posts": [1, 2, 3]})),
    ]);
    let router = router(&transport);

    let request = router
        .prepare("blog", "posts", "alice")
        .unwrap()
        .param("blog", "staff");
    let payload = router.execute(request.clone()).await.unwrap();

    assert_eq!(payload, json!({"posts": [1, 2, 3]}));
    assert_eq!(transport.request_count(), 3);
    assert_eq!(router.metrics().snapshot().total_retries, 2);

    // The queue is empty now, so a second network call would fail.
    assert_eq!(router.execute(request).await.unwrap(), payload);
    assert_eq!(transport.request_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_write_validation_error_is_not_retried() {
    let transport = MockTransport::new()
        .add_response(MockResponse::api_error(400, "invalid_post", "Post body is required"))
        .with_default_response(MockResponse::json(json!({"id": 1})));
    let router = router(&transport);

    let request = router
        .prepare("post", "create", "alice")
        .unwrap()
        .param("blog", "staff");
    let error = router.execute(request).await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Validation);
    assert!(!error.is_retryable());
    assert_eq!(error.http_status(), Some(400));
    assert_eq!(error.message(), "Post body is required");
    assert_eq!(error.error_code(), Some("invalid_post"));
    assert_eq!(transport.request_count(), 1);
    assert_eq!(router.metrics().snapshot().total_retries, 0);
}

#[tokio::test(start_paused = true)]
async fn test_successful_write_invalidates_cached_reads() {
    let transport = MockTransport::new()
        .with_default_response(MockResponse::json(json!({"ok": true})));
    let router = router(&transport);

    router.execute(blog_info(&router)).await.unwrap();
    let dashboard = router.prepare("user", "dashboard", "alice").unwrap();
    router.execute(dashboard).await.unwrap();
    assert_eq!(router.cache().len(), 2);

    let create = router
        .prepare("post", "create", "alice")
        .unwrap()
        .param("blog", "staff")
        .param("body", "hello");
    router.execute(create).await.unwrap();

    assert!(router.cache().is_empty());

    let sent = transport.last_request().unwrap();
    assert_eq!(sent.method, Method::Post);
    assert_eq!(sent.path, "/blog/staff/posts");
    assert_eq!(sent.body, Some(json!({"body": "hello"})));

    router.execute(blog_info(&router)).await.unwrap();
    assert_eq!(transport.request_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_failed_write_keeps_cache() {
    let transport = MockTransport::new()
        .add_response(MockResponse::json(json!({"title": "Staff"})))
        .add_response(MockResponse::status(404, ""));
    let router = router(&transport);

    router.execute(blog_info(&router)).await.unwrap();

    let delete = router
        .prepare("post", "delete", "alice")
        .unwrap()
        .param("blog", "staff")
        .param("id", 9);
    let error = router.execute(delete).await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Validation);
    assert_eq!(router.cache().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_operation_is_validation_without_network() {
    let transport = MockTransport::new();
    let router = router(&transport);

    let error = router
        .execute(OperationRequest::new("blog", "explode", "alice"))
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Validation);
    assert_eq!(transport.request_count(), 0);
    assert_eq!(router.rate_limiter().remaining("alice"), 300);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_window_waits_for_reset() {
    let transport = MockTransport::new()
        .with_default_response(MockResponse::json(json!({"ok": true})));
    let router = router_with(&transport, RateLimiterConfig::new(1, Duration::from_secs(2)));

    let dashboard = || router.prepare("user", "dashboard", "alice").unwrap().cacheable(false);

    router.execute(dashboard()).await.unwrap();

    let start = tokio::time::Instant::now();
    router.execute(dashboard()).await.unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_millis(2050));
    assert_eq!(transport.request_count(), 2);
    assert_eq!(router.metrics().snapshot().rate_limit_waits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_wait_is_bounded_by_attempt_budget() {
    let transport = MockTransport::new()
        .with_default_response(MockResponse::json(json!({"ok": true})));
    let router = router_with(&transport, RateLimiterConfig::new(1, Duration::from_secs(60)));
    let single_shot = OperationRouter::builder(Arc::new(transport.clone()))
        .read_policy(reads())
        .write_policy(RetryPolicy::builder().max_attempts(1).build().unwrap())
        .rate_limiter(router.rate_limiter().clone())
        .build()
        .unwrap();

    assert!(router.rate_limiter().acquire("alice").granted);

    let follow = || {
        router
            .prepare("user", "follow", "alice")
            .unwrap()
            .param("url", "staff")
    };

    // No attempt left to spend on waiting: the denial surfaces at once.
    let started = tokio::time::Instant::now();
    let error = single_shot.execute(follow()).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::RateLimit);
    assert_eq!(error.retry_after(), Some(Duration::from_secs(60)));
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(transport.request_count(), 0);

    // Two attempts: one denial, one wait for the window, then the call.
    router.execute(follow()).await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(60));
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_credentials_have_independent_budgets() {
    let transport = MockTransport::new()
        .with_default_response(MockResponse::json(json!({"ok": true})));
    let router = router_with(&transport, RateLimiterConfig::new(2, Duration::from_secs(60)));

    let calls = ["alice", "bob", "carol"].into_iter().flat_map(|credential| {
        let router = &router;
        (0..2).map(move |_| {
            let request = router
                .prepare("user", "dashboard", credential)
                .unwrap()
                .cacheable(false);
            router.execute(request)
        })
    });

    let start = tokio::time::Instant::now();
    let results = futures::future::join_all(calls).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(transport.request_count(), 6);
    for credential in ["alice", "bob", "carol"] {
        assert_eq!(router.rate_limiter().remaining(credential), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_server_rate_limit_honors_retry_after() {
    let transport = MockTransport::new()
        .add_response(MockResponse::rate_limited(5))
        .add_response(MockResponse::json(json!({"user": {"name": "alice"}})));
    let router = router(&transport);

    let start = tokio::time::Instant::now();
    let request = router.prepare("user", "info", "alice").unwrap();
    router.execute(request).await.unwrap();

    assert!(start.elapsed() >= Duration::from_secs(5));
    assert_eq!(transport.request_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_keeps_budget_and_leaves_cache_empty() {
    let transport = MockTransport::new()
        .add_response(MockResponse::status(503, ""))
        .with_default_response(MockResponse::json(json!({"ok": true})));
    let router = router(&transport);

    // The first retry waits 100ms; give up before it fires.
    let outcome =
        tokio::time::timeout(Duration::from_millis(50), router.execute(blog_info(&router))).await;

    assert!(outcome.is_err());
    assert_eq!(transport.request_count(), 1);
    assert_eq!(router.rate_limiter().remaining("alice"), 299);
    assert!(router.cache().is_empty());

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test]
async fn test_router_over_http_retries_then_caches() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/blog/staff/info"))
        .and(header("Authorization", "Bearer token-a"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/blog/staff/info"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Ratelimit-Remaining", "250")
                .set_body_json(json!({"blog": {"name": "staff"}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = ContentApiConfig::builder()
        .base_url(server.uri())
        .read_policy(
            RetryPolicy::builder()
                .max_attempts(3)
                .base_delay(Duration::from_millis(10))
                .max_delay(Duration::from_millis(20))
                .build()
                .unwrap(),
        )
        .write_policy(
            RetryPolicy::builder()
                .max_attempts(1)
                .base_delay(Duration::from_millis(10))
                .max_delay(Duration::from_millis(20))
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();

    let tokens = Arc::new(StaticTokenProvider::new().with_token("alice", "token-a"));
    let transport = ReqwestTransport::new(config.transport_config(), tokens).unwrap();
    let router = OperationRouter::from_config(&config, Arc::new(transport)).unwrap();

    for _ in 0..2 {
        let payload = router.execute(blog_info(&router)).await.unwrap();
        assert_eq!(payload, json!({"blog": {"name": "staff"}}));
    }

    assert_eq!(router.rate_limiter().remaining("alice"), 250);
    assert_eq!(router.metrics().snapshot().cache_hits, 1);
}

#[tokio::test]
async fn test_missing_token_is_authentication() {
    let tokens = Arc::new(StaticTokenProvider::new());
    let router = OperationRouter::connect(&ContentApiConfig::default(), tokens).unwrap();

    let error = router.execute(blog_info(&router)).await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Authentication);
    assert!(!error.is_retryable());
}
