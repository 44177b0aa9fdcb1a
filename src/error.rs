//! Error types for chatport
//!
//! One enum covering every failure mode of a migration run. Concern-specific
//! errors (queue, transport, conversion, preparation) convert into it with `?`.

use crate::convert::ConvertError;
use crate::queue::QueueError;
use crate::resolve::ResolveError;
use crate::transport::{RetryDecision, RetryableError, TransportError};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for chatport operations
pub type Result<T> = std::result::Result<T, MigrateError>;

/// Comprehensive error type for chatport operations
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Export reading errors
    #[error("Export error: {0}")]
    Export(#[from] blockkit::Error),

    /// Durable queue errors
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Remote call errors (after retries)
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Record conversion errors
    #[error("Conversion error: {0}")]
    Convert(#[from] ConvertError),

    /// Record preparation errors (deduplication, linking)
    #[error("Preparation error: {0}")]
    Resolve(#[from] ResolveError),

    /// Network/HTTP errors outside the retrying transport
    #[error("Network error: {0}")]
    Network(String),

    /// Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Rate limited (with retry-after duration in seconds)
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// The run was interrupted by a signal
    #[error("Interrupted")]
    Interrupted,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),

    /// Failures annotated with context at the CLI edges; displays the whole chain
    #[error("{0:#}")]
    Anyhow(#[from] anyhow::Error),
}

impl RetryableError for MigrateError {
    fn retry_decision(&self) -> RetryDecision {
        match self {
            MigrateError::Network(_) => RetryDecision::Retry,
            MigrateError::RateLimited(secs) => RetryDecision::RetryAfter(Duration::from_secs(*secs)),
            MigrateError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    RetryDecision::Retry
                } else if let Some(status) = e.status() {
                    match status.as_u16() {
                        429 => RetryDecision::RetryAfter(Duration::from_secs(60)),
                        500..=599 => RetryDecision::Retry,
                        _ => RetryDecision::NoRetry,
                    }
                } else {
                    RetryDecision::NoRetry
                }
            }
            MigrateError::Transport(e) => e.retry_decision(),
            MigrateError::Config(_)
            | MigrateError::Export(_)
            | MigrateError::Queue(_)
            | MigrateError::Convert(_)
            | MigrateError::Resolve(_)
            | MigrateError::Auth(_)
            | MigrateError::Interrupted
            | MigrateError::Io(_)
            | MigrateError::Json(_)
            | MigrateError::Yaml(_)
            | MigrateError::Other(_)
            | MigrateError::Anyhow(_) => RetryDecision::NoRetry,
        }
    }
}
