//! Credential providers
//!
//! Tokens are acquired with the OAuth2 client-credentials grant against the
//! identity platform, or taken verbatim from an environment variable.

use super::retry::{with_retry, RetryConfig};
use super::CredentialProvider;
use crate::{MigrateError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

/// Token endpoint template; `{tenant}` is substituted
const TOKEN_URL: &str = "https://login.microsoftonline.com/{tenant}/oauth2/v2.0/token";

/// Application scope for the destination API
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Tokens are treated as expired this long before their real expiry
const EXPIRY_SKEW_SECS: i64 = 60;

/// Per-request timeout for token acquisition
const TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

/// A bearer token and when it stops being valid
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    secret: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Tokens without an expiry never expire
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |exp| now >= exp)
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A fixed token, e.g. from `GRAPH_TOKEN`
#[derive(Debug, Clone)]
pub struct StaticToken {
    token: AccessToken,
}

impl StaticToken {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(secret, None),
        }
    }

    /// Read the token from an environment variable (a leading `$` is ignored)
    pub fn from_env(var: &str) -> Result<Self> {
        let name = var.trim_start_matches('$');
        std::env::var(name)
            .map(Self::new)
            .map_err(|_| MigrateError::Auth(format!("Environment variable {} is not set", name)))
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn get_token(&self) -> Result<AccessToken> {
        Ok(self.token.clone())
    }
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// OAuth2 client-credentials provider
pub struct ClientCredentials {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    retry: RetryConfig,
}

impl ClientCredentials {
    pub fn new(
        tenant_id: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder().timeout(TOKEN_TIMEOUT).build()?;
        Ok(Self {
            client,
            token_url: TOKEN_URL.replace("{tenant}", tenant_id),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            retry: RetryConfig::quick(),
        })
    }

    /// Point at a different token endpoint (sovereign clouds, tests)
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    async fn request_token(&self) -> Result<AccessToken> {
        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", GRAPH_SCOPE),
            ("grant_type", "client_credentials"),
        ];

        let response = self.client.post(&self.token_url).form(&form).send().await?;

        match response.status() {
            StatusCode::OK => {
                let body: TokenResponse = response.json().await?;
                let expires_at = body.expires_in.map(|secs| {
                    Utc::now() + ChronoDuration::seconds((secs - EXPIRY_SKEW_SECS).max(0))
                });
                tracing::info!(
                    expires_at = ?expires_at,
                    "Acquired access token"
                );
                Ok(AccessToken::new(body.access_token, expires_at))
            }
            StatusCode::TOO_MANY_REQUESTS => Err(MigrateError::RateLimited(
                response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60),
            )),
            status if status.is_server_error() => {
                let body = response.text().await.unwrap_or_default();
                Err(MigrateError::Network(format!(
                    "Token endpoint error: HTTP {}: {}",
                    status, body
                )))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(MigrateError::Auth(format!(
                    "Token request rejected: HTTP {}: {}",
                    status, body
                )))
            }
        }
    }
}

#[async_trait]
impl CredentialProvider for ClientCredentials {
    async fn get_token(&self) -> Result<AccessToken> {
        with_retry(&self.retry, "acquire token", || self.request_token()).await
    }
}
