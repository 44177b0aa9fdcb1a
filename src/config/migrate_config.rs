//! Migration configuration file handling
//!
//! Loads and saves `chatport.yaml`. Secrets are never stored here; the file
//! only names the environment variables that hold them.

use crate::dispatch::DispatchConfig;
use crate::resolve::PrepareOptions;
use crate::transport::graph::GRAPH_BASE;
use crate::transport::retry::RetryConfig;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "chatport.yaml";

/// Where the export is read and run state is kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Unpacked export (holds `channels.json` and one directory per channel)
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,

    /// Identity/channel/file mappings and the reference table
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Queue snapshots (`parents.json`, `children.json`, `failed.json`)
    #[serde(default = "default_queue_dir")]
    pub queue_dir: PathBuf,

    /// Prometheus textfile written after dispatch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_file: Option<PathBuf>,
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("export")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_queue_dir() -> PathBuf {
    PathBuf::from("queues")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            export_dir: default_export_dir(),
            state_dir: default_state_dir(),
            queue_dir: default_queue_dir(),
            metrics_file: None,
        }
    }
}

impl PathsConfig {
    /// Snapshot file of the queue called `name`
    pub fn queue_path(&self, name: &str) -> PathBuf {
        self.queue_dir.join(format!("{}.json", name))
    }

    pub fn references_path(&self) -> PathBuf {
        self.state_dir.join("references.json")
    }
}

/// Destination API endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    GRAPH_BASE.to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl GraphConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Credentials source
///
/// With `tenant_id` and `client_id` set, tokens come from the client-credentials
/// flow using the secret in `client_secret_env`. Otherwise a static bearer token
/// is read from `token_env`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default = "default_client_secret_env")]
    pub client_secret_env: String,

    #[serde(default = "default_token_env")]
    pub token_env: String,
}

fn default_client_secret_env() -> String {
    "CHATPORT_CLIENT_SECRET".to_string()
}

fn default_token_env() -> String {
    "CHATPORT_TOKEN".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            tenant_id: None,
            client_id: None,
            client_secret_env: default_client_secret_env(),
            token_env: default_token_env(),
        }
    }
}

impl AuthConfig {
    /// Whether the client-credentials flow is configured
    pub fn uses_client_credentials(&self) -> bool {
        self.tenant_id.is_some() && self.client_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Background snapshot interval in milliseconds
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

fn default_flush_interval_ms() -> u64 {
    5000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl QueueConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Items issued concurrently per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Minimum wall time per batch in milliseconds
    #[serde(default = "default_pacing_floor_ms")]
    pub pacing_floor_ms: u64,

    #[serde(default = "default_true")]
    pub flush_after_batch: bool,
}

fn default_batch_size() -> usize {
    5
}

fn default_pacing_floor_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            pacing_floor_ms: default_pacing_floor_ms(),
            flush_after_batch: true,
        }
    }
}

impl From<&DispatchSettings> for DispatchConfig {
    fn from(settings: &DispatchSettings) -> Self {
        DispatchConfig::default()
            .with_batch_size(settings.batch_size)
            .with_pacing_floor(Duration::from_millis(settings.pacing_floor_ms))
            .with_flush_after_batch(settings.flush_after_batch)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Retries per item after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_secs() -> u64 {
    300
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        RetryConfig {
            max_retries: settings.max_retries,
            initial_backoff: Duration::from_millis(settings.base_delay_ms),
            max_backoff: Duration::from_secs(settings.max_delay_secs),
            multiplier: settings.multiplier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveConfig {
    /// Passes the timestamp deduplication may take before giving up
    #[serde(default = "default_max_dedup_rounds")]
    pub max_dedup_rounds: usize,
}

fn default_max_dedup_rounds() -> usize {
    10_000
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            max_dedup_rounds: default_max_dedup_rounds(),
        }
    }
}

impl From<&ResolveConfig> for PrepareOptions {
    fn from(config: &ResolveConfig) -> Self {
        PrepareOptions {
            max_dedup_rounds: config.max_dedup_rounds,
        }
    }
}

/// Migration configuration
///
/// Represents the complete `chatport.yaml` file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrateConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub graph: GraphConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub dispatch: DispatchSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub resolve: ResolveConfig,
}

impl MigrateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `./chatport.yaml` if present, else the user config path,
    /// else defaults
    pub fn load_default() -> Result<Self> {
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Self::load(&local);
        }
        let path = Self::default_path();
        if path.exists() {
            return Self::load(&path);
        }
        tracing::debug!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::MigrateError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading configuration");

        let content = fs::read_to_string(path)?;
        // an empty file deserializes as unit, not as a map
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&content)?
        };

        tracing::debug!(
            export_dir = %config.paths.export_dir.display(),
            batch_size = config.dispatch.batch_size,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving configuration");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// User config path (`~/.config/chatport/config.yaml`)
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("chatport");
        path.push("config.yaml");
        path
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig::from(&self.dispatch)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::from(&self.retry)
    }

    pub fn prepare_options(&self) -> PrepareOptions {
        PrepareOptions::from(&self.resolve)
    }
}
