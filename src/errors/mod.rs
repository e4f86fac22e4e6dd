//! Error types for the content API client.
//!
//! Every failure that leaves the core is a [`ClassifiedError`]: a typed,
//! retry-annotated description produced by the [`classifier`] from whatever
//! the transport returned. Configuration problems are reported separately as
//! [`ConfigError`].

pub mod classifier;

pub use classifier::{ErrorClassifier, RawFailure};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for content API operations.
pub type ContentApiResult<T> = Result<T, ClassifiedError>;

/// The error taxonomy surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Credentials are missing, invalid or lack permission (401/403).
    Authentication,
    /// The remote API or the local limiter throttled the request (429).
    RateLimit,
    /// No response was received (timeout, DNS failure, connection reset).
    Network,
    /// The request itself is invalid (other 4xx, unknown operation).
    Validation,
    /// The remote service failed (5xx).
    RemoteFault,
    /// Anything that fits no other category.
    Unknown,
}

impl ErrorKind {
    /// Returns true if an operation failing with this kind may be retried.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimit | ErrorKind::Network | ErrorKind::RemoteFault
        )
    }

    /// Stable lowercase label, used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Network => "network",
            ErrorKind::Validation => "validation",
            ErrorKind::RemoteFault => "remote_fault",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure mapped into the error taxonomy.
///
/// `retryable` is derived from `kind` at construction and cannot be set
/// independently, so a validation or authentication error is never retryable.
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    kind: ErrorKind,
    http_status: Option<u16>,
    message: String,
    retryable: bool,
    retry_after: Option<Duration>,
    error_code: Option<String>,
    api_code: Option<u16>,
    occurred_at: DateTime<Utc>,
}

impl ClassifiedError {
    /// Creates a classified error of the given kind.
    pub fn new(kind: ErrorKind, http_status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind,
            http_status,
            message: message.into(),
            retryable: kind.is_retryable(),
            retry_after: None,
            error_code: None,
            api_code: None,
            occurred_at: Utc::now(),
        }
    }

    /// Creates a validation error that never touched the network.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, None, message)
    }

    /// Attaches a server-provided (or locally computed) wait before retrying.
    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Attaches the remote error envelope's `error` string and numeric `code`.
    pub fn with_codes(mut self, error_code: Option<String>, api_code: Option<u16>) -> Self {
        self.error_code = error_code;
        self.api_code = api_code;
        self
    }

    /// The error category.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// HTTP status of the response, if one was received.
    pub fn http_status(&self) -> Option<u16> {
        self.http_status
    }

    /// Human-readable message, preserved verbatim from the remote envelope when present.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true if the failed operation may be retried.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Wait requested before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// Wait requested before the next attempt, in seconds.
    pub fn retry_after_seconds(&self) -> Option<f64> {
        self.retry_after.map(|d| d.as_secs_f64())
    }

    /// The `error` string from the remote error envelope, e.g. `bad_request`.
    pub fn error_code(&self) -> Option<&str> {
        self.error_code.as_deref()
    }

    /// The numeric `code` from the remote error envelope.
    pub fn api_code(&self) -> Option<u16> {
        self.api_code
    }

    /// When the failure was classified.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.http_status {
            Some(status) => write!(f, "{} error (HTTP {}): {}", self.kind, status, self.message),
            None => write!(f, "{} error: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ClassifiedError {}

/// Error envelope returned by the remote API on failure.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorEnvelope {
    /// Short machine-readable error identifier.
    pub error: Option<String>,
    /// Human-readable description.
    pub message: Option<String>,
    /// Numeric code, mirrors the HTTP status.
    pub code: Option<u16>,
}

/// Alternate error shape: `{meta: {status, msg}, errors: [{title, detail}]}`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MetaErrorEnvelope {
    pub meta: Option<MetaBlock>,
    #[serde(default)]
    pub errors: Vec<MetaErrorDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MetaBlock {
    pub status: Option<u16>,
    pub msg: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MetaErrorDetail {
    pub title: Option<String>,
    pub detail: Option<String>,
}

/// Configuration error raised while building a client or router.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration value is missing or out of range.
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// Description of the problem.
        message: String,
    },

    /// A base URL could not be parsed.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// The HTTP client could not be constructed.
    #[error("Failed to create HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl ConfigError {
    /// Creates an invalid-configuration error.
    pub fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_follows_kind() {
        assert!(ClassifiedError::new(ErrorKind::RateLimit, Some(429), "slow down").is_retryable());
        assert!(ClassifiedError::new(ErrorKind::Network, None, "reset").is_retryable());
        assert!(ClassifiedError::new(ErrorKind::RemoteFault, Some(503), "down").is_retryable());

        assert!(!ClassifiedError::new(ErrorKind::Authentication, Some(401), "nope").is_retryable());
        assert!(!ClassifiedError::new(ErrorKind::Validation, Some(400), "bad").is_retryable());
        assert!(!ClassifiedError::new(ErrorKind::Unknown, None, "?").is_retryable());
    }

    #[test]
    fn test_retry_after_seconds() {
        let error = ClassifiedError::new(ErrorKind::RateLimit, Some(429), "slow down")
            .with_retry_after(Some(Duration::from_millis(1500)));

        assert_eq!(error.retry_after_seconds(), Some(1.5));
    }

    #[test]
    fn test_display_includes_status() {
        let error = ClassifiedError::new(ErrorKind::Validation, Some(400), "missing field");
        assert_eq!(error.to_string(), "validation error (HTTP 400): missing field");

        let error = ClassifiedError::validation("unknown operation");
        assert_eq!(error.to_string(), "validation error: unknown operation");
    }

    #[test]
    fn test_envelope_parsing() {
        let envelope: ApiErrorEnvelope = serde_json::from_str(
            r#"{"error":"bad_request","message":"missing field","code":400}"#,
        )
        .unwrap();

        assert_eq!(envelope.error.as_deref(), Some("bad_request"));
        assert_eq!(envelope.message.as_deref(), Some("missing field"));
        assert_eq!(envelope.code, Some(400));
    }
}
