//! Maps raw transport outcomes into [`ClassifiedError`]s.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{ApiErrorEnvelope, ClassifiedError, ErrorKind, MetaErrorEnvelope};
use crate::transport::{HttpResponse, TransportError};

/// Headers consulted, in order, for a server-requested wait.
const RETRY_AFTER_HEADERS: &[&str] = &[
    "retry-after",
    "x-ratelimit-reset",
    "x-ratelimit-perhour-reset",
    "x-ratelimit-perday-reset",
];

/// Longest server-requested wait honored by default.
pub const DEFAULT_MAX_RETRY_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Header values at or above this are Unix timestamps, not second counts.
const EPOCH_THRESHOLD: f64 = 1_000_000_000.0;

/// Everything an attempt can fail with before classification.
#[derive(Debug, Clone)]
pub enum RawFailure {
    /// No HTTP response was received.
    Transport(TransportError),
    /// A response with a non-2xx status.
    Http(HttpResponse),
    /// A response arrived but could not be interpreted.
    Malformed {
        /// Status of the response, if any.
        status: Option<u16>,
        /// What went wrong.
        message: String,
    },
    /// The local rate limiter denied admission for `wait`.
    Throttled {
        /// Time until the credential's window resets.
        wait: Duration,
    },
}

impl From<TransportError> for RawFailure {
    fn from(err: TransportError) -> Self {
        RawFailure::Transport(err)
    }
}

impl From<HttpResponse> for RawFailure {
    fn from(response: HttpResponse) -> Self {
        RawFailure::Http(response)
    }
}

/// Classifies raw failures. Total: every input yields exactly one error.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rate_limit_fallback: Option<Duration>,
    max_retry_after: Duration,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self {
            rate_limit_fallback: None,
            max_retry_after: DEFAULT_MAX_RETRY_AFTER,
        }
    }
}

impl ErrorClassifier {
    /// Creates a classifier with no rate-limit fallback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait to attach to a 429 that carries no rate-limit header.
    ///
    /// Without a fallback the retry policy's computed backoff applies.
    pub fn with_rate_limit_fallback(mut self, fallback: Duration) -> Self {
        self.rate_limit_fallback = Some(fallback);
        self
    }

    /// Longest server-requested wait to honor.
    ///
    /// Longer values are discarded, as if the header were absent.
    pub fn with_max_retry_after(mut self, max: Duration) -> Self {
        self.max_retry_after = max;
        self
    }

    /// Classifies a raw failure.
    pub fn classify(&self, failure: &RawFailure) -> ClassifiedError {
        match failure {
            RawFailure::Transport(TransportError::Connection { reason, message }) => {
                ClassifiedError::new(ErrorKind::Network, None, format!("{}: {}", reason, message))
            }
            RawFailure::Transport(TransportError::Credential { message }) => {
                ClassifiedError::new(ErrorKind::Authentication, None, message.clone())
            }
            RawFailure::Throttled { wait } => ClassifiedError::new(
                ErrorKind::RateLimit,
                None,
                format!("local rate limit reached, window resets in {}ms", wait.as_millis()),
            )
            .with_retry_after(Some(*wait)),
            RawFailure::Malformed { status, message } => {
                ClassifiedError::new(ErrorKind::Unknown, *status, message.clone())
            }
            RawFailure::Http(response) => self.classify_response(response),
        }
    }

    fn classify_response(&self, response: &HttpResponse) -> ClassifiedError {
        let status = response.status;
        let details = ErrorDetails::from_body(&response.body);
        let message = details
            .message
            .clone()
            .unwrap_or_else(|| format!("HTTP {}", status));

        let error = match status {
            401 | 403 => ClassifiedError::new(ErrorKind::Authentication, Some(status), message),
            429 => ClassifiedError::new(ErrorKind::RateLimit, Some(status), message)
                .with_retry_after(self.retry_after(response).or(self.rate_limit_fallback)),
            500..=599 => ClassifiedError::new(ErrorKind::RemoteFault, Some(status), message)
                .with_retry_after(self.retry_after(response)),
            400..=499 => ClassifiedError::new(ErrorKind::Validation, Some(status), message),
            _ => ClassifiedError::new(ErrorKind::Unknown, Some(status), message),
        };

        error.with_codes(details.error_code, details.api_code)
    }

    /// Parses the server-requested wait from the response headers.
    ///
    /// Accepts delta seconds, Unix-epoch reset times and HTTP-dates. Values
    /// that are negative, unparseable or above the ceiling are skipped.
    fn retry_after(&self, response: &HttpResponse) -> Option<Duration> {
        RETRY_AFTER_HEADERS.iter().find_map(|name| {
            let value = response.header(name)?.trim();
            let wait = match value.parse::<f64>() {
                Ok(seconds) if !seconds.is_finite() || seconds < 0.0 => return None,
                Ok(seconds) if seconds >= EPOCH_THRESHOLD => {
                    (seconds - Utc::now().timestamp() as f64).max(0.0)
                }
                Ok(seconds) => seconds,
                Err(_) => seconds_until_http_date(value)?,
            };
            Duration::try_from_secs_f64(wait)
                .ok()
                .filter(|wait| *wait <= self.max_retry_after)
        })
    }
}

/// Classifies with the default classifier.
pub fn classify(failure: &RawFailure) -> ClassifiedError {
    ErrorClassifier::default().classify(failure)
}

fn seconds_until_http_date(value: &str) -> Option<f64> {
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let millis = at.with_timezone(&Utc).signed_duration_since(Utc::now()).num_milliseconds();
    Some((millis.max(0) as f64) / 1000.0)
}

#[derive(Debug, Default)]
struct ErrorDetails {
    message: Option<String>,
    error_code: Option<String>,
    api_code: Option<u16>,
}

impl ErrorDetails {
    fn from_body(body: &[u8]) -> Self {
        if let Ok(envelope) = serde_json::from_slice::<ApiErrorEnvelope>(body) {
            if envelope.message.is_some() || envelope.error.is_some() {
                return Self {
                    message: envelope.message.or_else(|| envelope.error.clone()),
                    error_code: envelope.error,
                    api_code: envelope.code,
                };
            }
        }

        if let Ok(envelope) = serde_json::from_slice::<MetaErrorEnvelope>(body) {
            let detail = envelope
                .errors
                .first()
                .and_then(|e| e.detail.clone().or_else(|| e.title.clone()));
            let meta_msg = envelope.meta.as_ref().and_then(|m| m.msg.clone());
            if detail.is_some() || meta_msg.is_some() {
                return Self {
                    message: detail.or(meta_msg.clone()),
                    error_code: meta_msg,
                    api_code: envelope.meta.and_then(|m| m.status),
                };
            }
        }

        let text = String::from_utf8_lossy(body).trim().to_string();
        Self {
            message: (!text.is_empty()).then_some(text),
            ..Default::default()
        }
    }
}
