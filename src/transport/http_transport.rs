//! HTTP transport implementation using reqwest.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use super::{HttpResponse, Method, Transport, TransportError};
use crate::auth::TokenProvider;
use crate::errors::ConfigError;

/// Configuration for [`ReqwestTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Base URL for the API; request paths are appended to it.
    pub base_url: String,
    /// Request timeout.
    pub timeout: Duration,
    /// User-Agent header value.
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: crate::config::DEFAULT_BASE_URL.to_string(),
            timeout: crate::config::DEFAULT_TIMEOUT,
            user_agent: crate::config::DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Reqwest-based transport that attaches a bearer token per credential.
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl ReqwestTransport {
    /// Creates a transport.
    pub fn new(config: TransportConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self, ConfigError> {
        let base_url = url::Url::parse(&config.base_url)?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            tokens,
        })
    }

    /// Creates a transport around an existing reqwest client.
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    fn build_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn extract_headers(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
        headers
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|val| (k.as_str().to_ascii_lowercase(), val.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        credential_id: &str,
    ) -> Result<HttpResponse, TransportError> {
        let token = self.tokens.bearer_token(credential_id).await?;
        let url = self.build_url(path);

        trace!(%method, %url, "Sending request");

        let mut request = self
            .client
            .request(method.into(), &url)
            .bearer_auth(token.expose_secret())
            .header("Accept", "application/json");

        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers = Self::extract_headers(response.headers());
        let body = response.bytes().await?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("base_url", &self.base_url)
            .finish()
    }
}
