//! Bearer token lookup for credential identities.
//!
//! The OAuth dance lives outside this crate. Whatever performs it hands the
//! resulting tokens to a [`TokenProvider`], which [`ReqwestTransport`]
//! consults on every request.
//!
//! [`ReqwestTransport`]: crate::transport::ReqwestTransport

use async_trait::async_trait;
use parking_lot::RwLock;
use secrecy::SecretString;
use std::collections::HashMap;

use crate::transport::TransportError;

/// Resolves the bearer token for a credential identity.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns the current access token for `credential_id`.
    async fn bearer_token(&self, credential_id: &str) -> Result<SecretString, TransportError>;
}

/// In-memory token store.
#[derive(Default)]
pub struct StaticTokenProvider {
    tokens: RwLock<HashMap<String, SecretString>>,
}

impl StaticTokenProvider {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a token, builder style.
    pub fn with_token(self, credential_id: impl Into<String>, token: impl Into<String>) -> Self {
        self.set_token(credential_id, token);
        self
    }

    /// Stores or replaces the token for `credential_id`.
    pub fn set_token(&self, credential_id: impl Into<String>, token: impl Into<String>) {
        self.tokens
            .write()
            .insert(credential_id.into(), SecretString::new(token.into()));
    }

    /// Forgets the token for `credential_id`.
    pub fn revoke(&self, credential_id: &str) {
        self.tokens.write().remove(credential_id);
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn bearer_token(&self, credential_id: &str) -> Result<SecretString, TransportError> {
        self.tokens
            .read()
            .get(credential_id)
            .cloned()
            .ok_or_else(|| TransportError::Credential {
                message: format!("no access token registered for credential '{}'", credential_id),
            })
    }
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenProvider")
            .field("credentials", &self.tokens.read().keys().collect::<Vec<_>>())
            .finish()
    }
}
