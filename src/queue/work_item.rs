//! Queued remote calls

use crate::convert::{ConvertError, ConvertedMessage, Route};
use crate::record::RecordKey;
use crate::transport::{Method, RequestSpec};
use serde::{Deserialize, Serialize};

/// A fully formed remote call waiting in a queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    #[serde(flatten)]
    pub route: Route,

    #[serde(default = "default_method")]
    pub method: Method,

    /// JSON request body, empty for body-less calls
    #[serde(default)]
    pub body: String,

    /// Retries allowed after the first attempt
    pub retry_budget: u32,

    /// Record this call creates; its destination id is recorded on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_key: Option<RecordKey>,
}

fn default_method() -> Method {
    Method::Post
}

impl WorkItem {
    /// POST creating the converted message
    pub fn create(
        message: &ConvertedMessage,
        source_key: RecordKey,
        retry_budget: u32,
    ) -> Result<Self, ConvertError> {
        Ok(Self {
            route: message.route.clone(),
            method: Method::Post,
            body: message.body()?,
            retry_budget,
            source_key: Some(source_key),
        })
    }

    /// POST with no body to a fixed path
    pub fn action(path: impl Into<String>, retry_budget: u32) -> Self {
        Self {
            route: Route::new(path),
            method: Method::Post,
            body: String::new(),
            retry_budget,
            source_key: None,
        }
    }

    /// Whether the route depends on another item's destination id
    pub fn is_reply(&self) -> bool {
        self.route.reply_to.is_some()
    }

    pub fn request_spec(&self) -> RequestSpec {
        let spec = if self.body.is_empty() {
            RequestSpec {
                method: self.method,
                ..RequestSpec::default()
            }
        } else {
            RequestSpec {
                method: self.method,
                ..RequestSpec::post_json(self.body.clone())
            }
        };
        spec.with_max_retries(self.retry_budget)
    }
}
