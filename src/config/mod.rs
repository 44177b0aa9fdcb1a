//! Configuration system
//!
//! Loads `chatport.yaml` (or `~/.config/chatport/config.yaml`) with:
//! - Export, state and queue locations
//! - Destination API endpoint and credentials source
//! - Queue flushing, dispatch pacing and retry policy
//!
//! Every field has a default, so an empty file is a valid configuration.

mod migrate_config;
pub mod validation;

pub use migrate_config::{
    AuthConfig, DispatchSettings, GraphConfig, MigrateConfig, PathsConfig, QueueConfig,
    ResolveConfig, RetrySettings,
};
pub use validation::{validate_config, validate_config_result, ValidationError};
