//! HTTP transport module.
//!
//! The core never talks to the network directly. It issues requests through
//! a [`Transport`], which carries the bearer credential for the given
//! credential identity and returns either a complete HTTP response (of any
//! status) or a connection-level [`TransportError`].

mod http_transport;

pub use http_transport::{ReqwestTransport, TransportConfig};

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET request.
    Get,
    /// POST request.
    Post,
    /// PUT request.
    Put,
    /// PATCH request.
    Patch,
    /// DELETE request.
    Delete,
}

impl Method {
    /// Returns true if parameters travel in the query string rather than a body.
    pub fn uses_query(self) -> bool {
        matches!(self, Method::Get | Method::Delete)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, keyed by lowercase name.
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: Bytes,
}

impl HttpResponse {
    /// Creates a response with no headers.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Adds a header; the name is stored lowercased.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Looks up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Why no response was received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionFailure {
    /// The request timed out.
    Timeout,
    /// The host name could not be resolved.
    Dns,
    /// The connection was refused or could not be established.
    Connect,
    /// The connection was reset mid-request.
    Reset,
    /// Any other I/O failure before a response arrived.
    Other,
}

impl fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionFailure::Timeout => "timeout",
            ConnectionFailure::Dns => "dns failure",
            ConnectionFailure::Connect => "connect failure",
            ConnectionFailure::Reset => "connection reset",
            ConnectionFailure::Other => "transport failure",
        };
        f.write_str(name)
    }
}

/// Failure raised by a transport before any HTTP response was received.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The request never produced a response.
    #[error("{reason}: {message}")]
    Connection {
        /// Failure category.
        reason: ConnectionFailure,
        /// Underlying error text.
        message: String,
    },

    /// No bearer credential is available for the credential identity.
    #[error("Credential unavailable: {message}")]
    Credential {
        /// Description of the problem.
        message: String,
    },
}

impl TransportError {
    /// Creates a connection error.
    pub fn connection(reason: ConnectionFailure, message: impl Into<String>) -> Self {
        TransportError::Connection {
            reason,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let reason = if err.is_timeout() {
            ConnectionFailure::Timeout
        } else if err.is_connect() {
            // reqwest folds resolver errors into connect errors; the source
            // chain is the only place the distinction survives.
            if format!("{:?}", err).contains("dns error") {
                ConnectionFailure::Dns
            } else {
                ConnectionFailure::Connect
            }
        } else if err.is_request() || err.is_body() {
            ConnectionFailure::Reset
        } else {
            ConnectionFailure::Other
        };

        TransportError::connection(reason, err.to_string())
    }
}

/// Authenticated transport supplied by the OAuth/HTTP collaborator.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a request on behalf of `credential_id`.
    ///
    /// `path` is relative to the API base and may carry a query string.
    /// Any HTTP status, including 4xx and 5xx, is returned as `Ok`.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        credential_id: &str,
    ) -> Result<HttpResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = HttpResponse::new(429, "").with_header("Retry-After", "30");

        assert_eq!(response.header("retry-after"), Some("30"));
        assert_eq!(response.header("RETRY-AFTER"), Some("30"));
        assert_eq!(response.header("x-missing"), None);
    }

    #[test]
    fn test_is_success() {
        assert!(HttpResponse::new(200, "").is_success());
        assert!(HttpResponse::new(204, "").is_success());
        assert!(!HttpResponse::new(304, "").is_success());
        assert!(!HttpResponse::new(500, "").is_success());
    }

    #[test]
    fn test_method_query_placement() {
        assert!(Method::Get.uses_query());
        assert!(Method::Delete.uses_query());
        assert!(!Method::Post.uses_query());
        assert_eq!(Method::Patch.to_string(), "PATCH");
    }
}
