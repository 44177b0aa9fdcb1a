//! Configuration validation
//!
//! Checks a loaded configuration before any work starts:
//! - Dispatch and queue intervals are usable
//! - The API base URL is absolute
//! - Credential settings are complete

use super::migrate_config::{AuthConfig, MigrateConfig};
use crate::MigrateError;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub context: Option<String>,
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            context: None,
            field: field.into(),
            message: message.into(),
        }
    }

    fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref ctx) = self.context {
            write!(f, "[{}] {}: {}", ctx, self.field, self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate a migration configuration, collecting every problem
pub fn validate_config(config: &MigrateConfig) -> ValidationResult {
    let mut errors = Vec::new();

    if config.dispatch.batch_size == 0 {
        errors.push(ValidationError::new(
            "dispatch.batch_size",
            "Batch size must be greater than 0",
        ));
    }

    if config.queue.flush_interval_ms == 0 {
        errors.push(ValidationError::new(
            "queue.flush_interval_ms",
            "Flush interval must be greater than 0",
        ));
    }

    if !is_http_url(&config.graph.base_url) {
        errors.push(ValidationError::new(
            "graph.base_url",
            format!("Invalid API URL: {}", config.graph.base_url),
        ));
    }

    if config.graph.timeout_secs == 0 {
        errors.push(ValidationError::new(
            "graph.timeout_secs",
            "Request timeout must be greater than 0",
        ));
    }

    if config.retry.multiplier < 1.0 {
        errors.push(ValidationError::new(
            "retry.multiplier",
            format!("Multiplier must be at least 1.0, got {}", config.retry.multiplier),
        ));
    }

    if config.resolve.max_dedup_rounds == 0 {
        errors.push(ValidationError::new(
            "resolve.max_dedup_rounds",
            "Deduplication round ceiling must be greater than 0",
        ));
    }

    if let Err(mut auth_errors) = validate_auth(&config.auth) {
        errors.append(&mut auth_errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_auth(auth: &AuthConfig) -> ValidationResult {
    let mut errors = Vec::new();

    match (&auth.tenant_id, &auth.client_id) {
        (Some(_), None) => errors.push(
            ValidationError::new("client_id", "tenant_id is set but client_id is missing")
                .with_context("auth"),
        ),
        (None, Some(_)) => errors.push(
            ValidationError::new("tenant_id", "client_id is set but tenant_id is missing")
                .with_context("auth"),
        ),
        _ => {}
    }

    let secret_var = if auth.uses_client_credentials() {
        ("client_secret_env", &auth.client_secret_env)
    } else {
        ("token_env", &auth.token_env)
    };
    if secret_var.1.is_empty() {
        errors.push(
            ValidationError::new(secret_var.0, "Environment variable name cannot be empty")
                .with_context("auth"),
        );
    } else if std::env::var(secret_var.1).is_err() {
        tracing::warn!(
            env_var = %secret_var.1,
            "Environment variable not set (this may be intentional if set at runtime)"
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

/// Validate configuration and return a Result
pub fn validate_config_result(config: &MigrateConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        MigrateError::Config(format!(
            "Configuration validation failed:\n  - {}",
            messages.join("\n  - ")
        ))
    })
}
