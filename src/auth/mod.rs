//! Authorization
//!
//! Answers one question per inbound request: is this bearer token allowed
//! to call us. Tokens are never kept or logged in plain text.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::time::Duration;

#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn is_authorized(&self, credential: &str) -> bool;
}

/// Hex SHA-256 of a credential
pub fn hash_credential(credential: &str) -> String {
    hex::encode(Sha256::digest(credential.as_bytes()))
}

/// Short, stable identifier for a credential, safe to log
pub fn fingerprint(credential: &str) -> String {
    hash_credential(credential)[..16].to_string()
}

// =========================================================================
// Static tokens
// =========================================================================

/// Accepts a fixed set of tokens, stored as SHA-256 hashes
#[derive(Debug, Clone, Default)]
pub struct TokenAuthorizer {
    hashes: HashSet<String>,
}

impl TokenAuthorizer {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hashes = tokens
            .into_iter()
            .map(|t| t.as_ref().trim().to_string())
            .filter(|t| !t.is_empty())
            .map(|t| hash_credential(&t))
            .collect();

        Self { hashes }
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

#[async_trait]
impl Authorizer for TokenAuthorizer {
    async fn is_authorized(&self, credential: &str) -> bool {
        !credential.is_empty() && self.hashes.contains(&hash_credential(credential))
    }
}

// =========================================================================
// Remote validation
// =========================================================================

/// Delegates to an identity service: `GET {url}` with the caller's bearer
/// token, authorized only on a 2xx reply whose JSON body is `true`.
#[derive(Debug, Clone)]
pub struct RemoteAuthorizer {
    client: reqwest::Client,
    url: String,
}

impl RemoteAuthorizer {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Authorizer for RemoteAuthorizer {
    async fn is_authorized(&self, credential: &str) -> bool {
        if credential.is_empty() {
            return false;
        }

        let response = match self.client.get(&self.url).bearer_auth(credential).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Token validation request failed");
                return false;
            }
        };

        if !response.status().is_success() {
            tracing::debug!(
                status = %response.status(),
                principal = %fingerprint(credential),
                "Token rejected"
            );
            return false;
        }

        match response.json::<bool>().await {
            Ok(valid) => valid,
            Err(e) => {
                tracing::warn!(error = %e, "Token validation returned an unexpected body");
                false
            }
        }
    }
}
