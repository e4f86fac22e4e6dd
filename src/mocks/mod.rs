//! Mock implementations for testing.
//!
//! [`MockTransport`] replays a scripted queue of responses and records every
//! request it receives, so router behavior can be checked without a network.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::transport::{ConnectionFailure, HttpResponse, Method, Transport, TransportError};

/// Mock response configuration
#[derive(Debug, Clone)]
pub struct MockResponse {
    /// What the transport returns
    pub outcome: Result<HttpResponse, TransportError>,
    /// Delay before responding
    pub delay: Option<Duration>,
}

impl MockResponse {
    /// A 200 with a JSON body
    pub fn json(body: Value) -> Self {
        Self::status(200, body.to_string())
    }

    /// A response with the given status and raw body
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            outcome: Ok(HttpResponse::new(status, body.into())),
            delay: None,
        }
    }

    /// A response carrying the API's error envelope
    pub fn api_error(status: u16, error: &str, message: &str) -> Self {
        let body = serde_json::json!({ "error": error, "message": message });
        Self::status(status, body.to_string())
    }

    /// A 429 with a `retry-after` header in seconds
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::status(429, r#"{"error":"rate_limited","message":"Too many requests"}"#)
            .with_header("retry-after", retry_after_secs.to_string())
    }

    /// A connection failure with no response
    pub fn connection_error(reason: ConnectionFailure) -> Self {
        Self {
            outcome: Err(TransportError::connection(reason, "mock connection failure")),
            delay: None,
        }
    }

    /// Adds a response header; ignored for connection failures
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.outcome = self.outcome.map(|response| response.with_header(name, value));
        self
    }

    /// Add delay to response
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Recorded request for verification
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    /// Request method
    pub method: Method,
    /// Request path, including any query string
    pub path: String,
    /// Request body
    pub body: Option<Value>,
    /// Credential the request was sent for
    pub credential_id: String,
}

/// Mock transport for testing
#[derive(Clone)]
pub struct MockTransport {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    default_response: Option<MockResponse>,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            default_response: None,
        }
    }

    /// Add a response to the queue
    pub fn add_response(self, response: MockResponse) -> Self {
        self.responses.lock().push_back(response);
        self
    }

    /// Add multiple responses
    pub fn add_responses(self, responses: impl IntoIterator<Item = MockResponse>) -> Self {
        self.responses.lock().extend(responses);
        self
    }

    /// Set default response when queue is empty
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.default_response = Some(response);
        self
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests received
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Get the last recorded request
    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.requests.lock().last().cloned()
    }

    /// Clear recorded requests
    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }

    /// Get remaining response count
    pub fn remaining_responses(&self) -> usize {
        self.responses.lock().len()
    }

    fn next_response(&self) -> Option<MockResponse> {
        let mut queue = self.responses.lock();
        queue.pop_front().or_else(|| self.default_response.clone())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("remaining_responses", &self.remaining_responses())
            .field("recorded_requests", &self.request_count())
            .finish()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        credential_id: &str,
    ) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(RecordedRequest {
            method,
            path: path.to_string(),
            body,
            credential_id: credential_id.to_string(),
        });

        let response = self.next_response().ok_or_else(|| {
            TransportError::connection(ConnectionFailure::Other, "No mock response configured")
        })?;

        if let Some(delay) = response.delay {
            tokio::time::sleep(delay).await;
        }

        response.outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_replays_in_order_then_default() {
        let transport = MockTransport::new()
            .add_response(MockResponse::status(503, "down"))
            .add_response(MockResponse::json(json!({"ok": true})))
            .with_default_response(MockResponse::status(204, ""));

        let first = transport.send(Method::Get, "/a", None, "c").await.unwrap();
        let second = transport.send(Method::Get, "/b", None, "c").await.unwrap();
        let third = transport.send(Method::Get, "/c", None, "c").await.unwrap();

        assert_eq!(first.status, 503);
        assert_eq!(second.status, 200);
        assert_eq!(third.status, 204);
        assert_eq!(transport.request_count(), 3);
        assert_eq!(transport.last_request().unwrap().path, "/c");
    }

    #[tokio::test]
    async fn test_empty_queue_is_connection_error() {
        let transport = MockTransport::new();
        let result = transport.send(Method::Post, "/x", Some(json!({})), "c").await;

        assert!(matches!(result, Err(TransportError::Connection { .. })));
        assert_eq!(transport.recorded_requests()[0].body, Some(json!({})));
    }

    #[test]
    fn test_rate_limited_carries_header() {
        let response = MockResponse::rate_limited(7).outcome.unwrap();
        assert_eq!(response.status, 429);
        assert_eq!(response.header("Retry-After"), Some("7"));
    }
}
