//! Destination API over HTTP
//!
//! Thin reqwest adapter: joins routes onto the base URL, attaches the bearer
//! token and maps the response. No retries here; see `RetryingTransport`.

use super::{ApiRequest, ApiResponse, Method, RemoteApi, TransportError};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Production endpoint
pub const GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Destination API client
#[derive(Debug, Clone)]
pub struct GraphApi {
    client: Client,
    base_url: String,
}

impl GraphApi {
    /// Create a client for `base_url` with a per-request timeout
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a route (leading slashes on the route are ignored)
    pub fn url_for(&self, route: &str) -> String {
        format!("{}/{}", self.base_url, route.trim_start_matches('/'))
    }
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl RemoteApi for GraphApi {
    async fn send(&self, request: &ApiRequest) -> std::result::Result<ApiResponse, TransportError> {
        let url = self.url_for(&request.route);
        let spec = &request.spec;

        debug!(method = %spec.method, url = %url, "Sending request");

        let mut builder = self
            .client
            .request(to_reqwest(spec.method), &url)
            .query(&spec.query);
        for (name, value) in &spec.headers {
            builder = builder.header(name, value);
        }
        if let Some(ref token) = request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(ref body) = spec.body {
            builder = builder.body(body.clone());
        }

        let network_error = |e: reqwest::Error| TransportError::Network {
            route: request.route.clone(),
            method: spec.method,
            message: e.to_string(),
            retryable: e.is_connect() || e.is_timeout() || e.is_request(),
            attempts: 1,
            payload: spec.body.clone(),
        };

        let response = builder.send().await.map_err(network_error)?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(network_error)?;

        debug!(status, url = %url, "Received response");

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for_joins_cleanly() {
        let api = GraphApi::new("https://graph.microsoft.com/v1.0/", Duration::from_secs(5)).unwrap();
        assert_eq!(api.base_url(), GRAPH_BASE);
        assert_eq!(
            api.url_for("/teams/t1/channels"),
            "https://graph.microsoft.com/v1.0/teams/t1/channels"
        );
        assert_eq!(
            api.url_for("teams/t1/completeMigration"),
            "https://graph.microsoft.com/v1.0/teams/t1/completeMigration"
        );
    }

    #[test]
    fn test_method_mapping() {
        assert_eq!(to_reqwest(Method::Post), reqwest::Method::POST);
        assert_eq!(to_reqwest(Method::Get), reqwest::Method::GET);
    }
}
