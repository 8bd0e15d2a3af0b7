//! Service credential for outbound calls
//!
//! Acquires bearer tokens with the OAuth2 client-credential flow against an
//! Entra ID tenant. Tokens are cached until shortly before they expire so a
//! burst of membership lookups shares one token request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Default token authority
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Scope for Microsoft Graph
pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Scope for Azure Resource Manager
pub const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";

/// Refresh this long before the token's stated expiry
const EXPIRY_SKEW: Duration = Duration::from_secs(60);

/// Source of bearer tokens for one audience
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return a currently valid access token
    async fn token(&self) -> Result<String>;
}

/// Tenant / client id / client secret triple
#[derive(Clone)]
pub struct ClientSecretCredential {
    /// Directory (tenant) id
    pub tenant_id: String,
    /// Application (client) id
    pub client_id: String,
    /// Client secret
    pub client_secret: String,
}

impl std::fmt::Debug for ClientSecretCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSecretCredential")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3599
}

/// Client-credential token provider for a single scope
pub struct ClientCredentialProvider {
    credential: ClientSecretCredential,
    scope: String,
    authority: String,
    cache: Arc<RwLock<Option<CachedToken>>>,
    http_client: reqwest::Client,
}

impl ClientCredentialProvider {
    /// Create a provider for `scope` against the public Entra authority
    pub fn new(credential: ClientSecretCredential, scope: impl Into<String>) -> Result<Self> {
        Self::with_authority(credential, scope, DEFAULT_AUTHORITY)
    }

    /// Create a provider against a specific authority
    pub fn with_authority(
        credential: ClientSecretCredential,
        scope: impl Into<String>,
        authority: impl Into<String>,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            credential,
            scope: scope.into(),
            authority: authority.into().trim_end_matches('/').to_string(),
            cache: Arc::new(RwLock::new(None)),
            http_client,
        })
    }

    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority, self.credential.tenant_id
        )
    }

    async fn fetch(&self) -> Result<CachedToken> {
        debug!(scope = %self.scope, "Requesting client-credential token");

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.credential.client_id.as_str()),
            ("client_secret", self.credential.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];

        let response = self
            .http_client
            .post(self.token_url())
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::Credential(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Credential(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Credential(format!("invalid token response: {}", e)))?;

        if token.access_token.is_empty() {
            return Err(Error::Credential("token endpoint returned an empty token".into()));
        }

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(EXPIRY_SKEW);

        info!(scope = %self.scope, expires_in = token.expires_in, "Acquired access token");

        Ok(CachedToken {
            access_token: token.access_token,
            refresh_at: Instant::now() + lifetime,
        })
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialProvider {
    async fn token(&self) -> Result<String> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if Instant::now() < cached.refresh_at {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let mut cache = self.cache.write().await;
        // Another request may have refreshed while we waited for the lock
        if let Some(cached) = cache.as_ref() {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.access_token.clone());
            }
        }

        let fresh = self.fetch().await?;
        let token = fresh.access_token.clone();
        *cache = Some(fresh);
        Ok(token)
    }
}
