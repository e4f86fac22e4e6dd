//! Content API Client Core
//!
//! The resilience layer behind a client for a rate-limited blogging content
//! API. Every call goes through one [`OperationRouter::execute`] entry point,
//! which resolves the operation, serves idempotent reads from a TTL cache,
//! gates requests per credential, and retries transient failures.
//!
//! # Features
//!
//! - **Error Classification**: Every failure maps to exactly one [`ErrorKind`]
//! - **Retry**: Capped exponential backoff with jitter, honoring server waits
//! - **Rate Limiting**: Fixed-window budgets per credential identity
//! - **Caching**: TTL cache for reads with resource-prefix invalidation
//! - **Observability**: Tracing spans, structured logging, metrics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use integrations_content_api::{ContentApiConfig, OperationRouter, StaticTokenProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ContentApiConfig::from_env()?;
//!     let tokens = Arc::new(StaticTokenProvider::new().with_token("me", "access-token"));
//!     let router = OperationRouter::connect(&config, tokens)?;
//!
//!     let request = router
//!         .prepare("blog", "info", "me")?
//!         .param("blog", "staff.example.com");
//!     let info = router.execute(request).await?;
//!     println!("{}", info);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod cache;
pub mod config;
pub mod errors;
pub mod observability;
pub mod resilience;
pub mod router;
pub mod transport;

/// Mock implementations for testing.
pub mod mocks;

// Re-exports for convenience
pub use auth::{StaticTokenProvider, TokenProvider};
pub use cache::{CacheKey, ResponseCache};
pub use config::ContentApiConfig;
pub use errors::{ClassifiedError, ConfigError, ContentApiResult, ErrorClassifier, ErrorKind};
pub use resilience::{RateLimiter, RateLimiterConfig, RetryExecutor, RetryPolicy};
pub use router::{OperationCatalog, OperationClass, OperationRequest, OperationRouter, OperationSpec};
pub use transport::{HttpResponse, Method, ReqwestTransport, Transport, TransportError};
