//! Salted token index.
//!
//! Service account token secrets are indexed by a salted SHA-256 of their
//! bearer token so the raw token never becomes a map key. The salt is random
//! per process.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use crds::SERVICE_ACCOUNT_TOKEN_KEY;
use k8s_openapi::api::core::v1::Secret;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct TokenIndex {
    salt: String,
}

impl Default for TokenIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenIndex {
    /// Index with a fresh random salt
    #[must_use]
    pub fn new() -> Self {
        Self::with_salt(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn with_salt(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }

    /// Index key for a bearer token
    #[must_use]
    pub fn key(&self, token: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(token);
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    /// Index key for a secret, `None` when it carries no token
    #[must_use]
    pub fn key_for_secret(&self, secret: &Secret) -> Option<String> {
        let token = secret.data.as_ref()?.get(SERVICE_ACCOUNT_TOKEN_KEY)?;
        if token.0.is_empty() {
            return None;
        }
        Some(self.key(&token.0))
    }
}
