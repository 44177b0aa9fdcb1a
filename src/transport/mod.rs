//! Retrying transport to the destination API
//!
//! Every remote call goes through [`RetryingTransport`], which:
//!
//! 1. Asks the [`CredentialProvider`] for a fresh token when the cached one is
//!    absent or expired (checked before every attempt)
//! 2. Issues the request through a [`RemoteApi`]
//! 3. Retries rate-limited (429), timed-out (408) and server (5xx) responses,
//!    honoring `Retry-After` exactly and otherwise backing off exponentially
//! 4. Surfaces a terminal [`TransportError`] carrying the route, method,
//!    request payload and last response body
//!
//! The HTTP implementation lives in [`graph`]; tests substitute scripted fakes.

pub mod credentials;
pub mod graph;
pub mod retry;

pub use credentials::{AccessToken, ClientCredentials, StaticToken};
pub use graph::GraphApi;
pub use retry::{with_retry, RetryConfig, RetryDecision, RetryableError};

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// HTTP method of a remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
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
        write!(f, "{}", name)
    }
}

/// What to send to a route
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestSpec {
    pub method: Method,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    /// Overrides the transport's retry ceiling for this call
    pub max_retries: Option<u32>,
}

impl RequestSpec {
    pub fn get() -> Self {
        Self::default()
    }

    /// POST with a JSON body
    pub fn post_json(body: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Some(body.into()),
            ..Default::default()
        }
    }

    /// POST with no body
    pub fn post_empty() -> Self {
        Self {
            method: Method::Post,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// A fully resolved request handed to a [`RemoteApi`]
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub route: String,
    pub spec: RequestSpec,
    pub bearer: Option<String>,
}

/// Response from the remote API
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApiResponse {
    pub status: u16,
    /// Header names are lower-cased
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Server-directed retry delay from `Retry-After` (delta-seconds)
    pub fn retry_after(&self) -> Option<Duration> {
        let value = self.header("retry-after")?.trim();
        value
            .parse::<u64>()
            .map(Duration::from_secs)
            .ok()
            .or_else(|| {
                value
                    .parse::<f64>()
                    .ok()
                    .filter(|secs| secs.is_finite() && *secs >= 0.0)
                    .map(Duration::from_secs_f64)
            })
    }

    /// Body parsed as JSON, `Null` when empty or not JSON
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap_or(serde_json::Value::Null)
    }

    /// `id` of the created resource, from the body or the `Location` header
    pub fn created_id(&self) -> Option<String> {
        if let Some(id) = self.json().get("id").and_then(|v| v.as_str()) {
            return Some(id.to_string());
        }
        self.header("location")
            .and_then(|loc| loc.trim_end_matches('/').rsplit('/').next())
            .map(|segment| {
                // Location may be OData style: messages('123')
                segment
                    .rsplit_once("('")
                    .map(|(_, id)| id.trim_end_matches("')").to_string())
                    .unwrap_or_else(|| segment.to_string())
            })
            .filter(|id| !id.is_empty())
    }
}

/// Whether a status is worth retrying
pub fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

/// Transport failure classification
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The server answered with a non-success status
    #[error("{method} {route} failed with HTTP {status} after {attempts} attempt(s): {body}")]
    Status {
        route: String,
        method: Method,
        status: u16,
        retryable: bool,
        attempts: u32,
        retry_after: Option<Duration>,
        payload: Option<String>,
        body: String,
    },

    /// The request never produced a response (connect, timeout, TLS)
    #[error("{method} {route} failed after {attempts} attempt(s): {message}")]
    Network {
        route: String,
        method: Method,
        message: String,
        retryable: bool,
        attempts: u32,
        payload: Option<String>,
    },

    /// No usable credential could be obtained
    #[error("Credential error: {0}")]
    Credentials(String),
}

impl TransportError {
    /// Classify a non-success response for a request
    pub fn from_response(request: &ApiRequest, response: ApiResponse) -> Self {
        TransportError::Status {
            route: request.route.clone(),
            method: request.spec.method,
            status: response.status,
            retryable: is_retryable_status(response.status),
            attempts: 1,
            retry_after: response.retry_after(),
            payload: request.spec.body.clone(),
            body: response.body,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Status { retryable, .. } => *retryable,
            TransportError::Network { retryable, .. } => *retryable,
            TransportError::Credentials(_) => false,
        }
    }

    fn with_attempts(mut self, total: u32) -> Self {
        match &mut self {
            TransportError::Status { attempts, .. } | TransportError::Network { attempts, .. } => {
                *attempts = total
            }
            TransportError::Credentials(_) => {}
        }
        self
    }
}

impl RetryableError for TransportError {
    fn retry_decision(&self) -> RetryDecision {
        match self {
            TransportError::Status {
                retryable: true,
                retry_after: Some(delay),
                ..
            } => RetryDecision::RetryAfter(*delay),
            other if other.is_retryable() => RetryDecision::Retry,
            _ => RetryDecision::NoRetry,
        }
    }
}

/// The remote API: sends one request, no retries
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// Source of bearer tokens
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Acquire a new token
    async fn get_token(&self) -> crate::Result<AccessToken>;

    fn is_expired(&self, token: &AccessToken) -> bool {
        token.is_expired()
    }
}

/// Anything that can execute a call to a route
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, route: &str, spec: &RequestSpec) -> Result<ApiResponse, TransportError>;
}

#[async_trait]
impl<C: CredentialProvider + ?Sized> CredentialProvider for Box<C> {
    async fn get_token(&self) -> crate::Result<AccessToken> {
        (**self).get_token().await
    }

    fn is_expired(&self, token: &AccessToken) -> bool {
        (**self).is_expired(token)
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for &T {
    async fn call(&self, route: &str, spec: &RequestSpec) -> Result<ApiResponse, TransportError> {
        (**self).call(route, spec).await
    }
}

/// Transport that authenticates and retries every call
pub struct RetryingTransport<A, C> {
    api: A,
    credentials: C,
    retry: RetryConfig,
    token: Mutex<Option<AccessToken>>,
}

impl<A: RemoteApi, C: CredentialProvider> RetryingTransport<A, C> {
    pub fn new(api: A, credentials: C, retry: RetryConfig) -> Self {
        Self {
            api,
            credentials,
            retry,
            token: Mutex::new(None),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Current bearer token, refreshed if absent or expired
    async fn bearer(&self) -> Result<String, TransportError> {
        let mut cached = self.token.lock().await;
        let needs_refresh = match cached.as_ref() {
            Some(token) => self.credentials.is_expired(token),
            None => true,
        };

        if needs_refresh {
            tracing::debug!("Refreshing access token");
            let token = self
                .credentials
                .get_token()
                .await
                .map_err(|e| TransportError::Credentials(e.to_string()))?;
            *cached = Some(token);
        }

        cached
            .as_ref()
            .map(|token| token.secret().to_string())
            .ok_or_else(|| TransportError::Credentials("no token available".to_string()))
    }

    async fn attempt(&self, route: &str, spec: &RequestSpec) -> Result<ApiResponse, TransportError> {
        let request = ApiRequest {
            route: route.to_string(),
            spec: spec.clone(),
            bearer: Some(self.bearer().await?),
        };

        let response = self.api.send(&request).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(TransportError::from_response(&request, response))
        }
    }
}

#[async_trait]
impl<A: RemoteApi, C: CredentialProvider> Transport for RetryingTransport<A, C> {
    async fn call(&self, route: &str, spec: &RequestSpec) -> Result<ApiResponse, TransportError> {
        let config = match spec.max_retries {
            Some(max_retries) => self.retry.with_max_retries(max_retries),
            None => self.retry.clone(),
        };
        let operation = format!("{} {}", spec.method, route);
        let attempts = AtomicU32::new(0);

        with_retry(&config, &operation, || {
            attempts.fetch_add(1, Ordering::Relaxed);
            self.attempt(route, spec)
        })
        .await
        .map_err(|e| e.with_attempts(attempts.load(Ordering::Relaxed)))
    }
}
