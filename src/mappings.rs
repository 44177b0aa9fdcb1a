//! Source to destination identity mappings
//!
//! Earlier provisioning steps leave three files in the state directory:
//!
//! - `users.json`: `{ "default": {...}, "users": [{ "slackId", "entraId", "displayName" }] }`
//! - `channels.json`: `[{ "slackId", "slackName", "channelId", "teamId" }]`
//! - `files-uploaded.json`: `[{ "slackId", "id", "contentUrl", "name" }]`
//!
//! [`StateMappings`] indexes them by source id. Unmapped and bot authors fall
//! back to the default identity.

use crate::{MigrateError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const USERS_FILE: &str = "users.json";
pub const CHANNELS_FILE: &str = "channels.json";
pub const FILES_FILE: &str = "files-uploaded.json";

/// Destination user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: String,
    pub display_name: String,
}

/// Destination channel of a source channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTarget {
    pub team_id: String,
    pub channel_id: String,
    pub display_name: String,
}

/// A file already uploaded to the destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTarget {
    pub id: String,
    pub content_url: String,
    pub name: String,
}

/// Lookups the converter needs
pub trait IdentityMap {
    /// Destination user for a source user id, never failing
    fn user(&self, source_id: &str) -> UserIdentity;

    fn channel(&self, source_id: &str) -> Option<ChannelTarget>;

    fn file(&self, source_id: &str) -> Option<FileTarget>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserEntry {
    #[serde(default)]
    slack_id: Option<String>,
    entra_id: String,
    display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UsersFile {
    default: UserEntry,
    #[serde(default)]
    users: Vec<UserEntry>,
}

/// One row of `channels.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEntry {
    pub slack_id: String,
    pub slack_name: String,
    pub channel_id: String,
    pub team_id: String,
    #[serde(default)]
    pub archived: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileEntry {
    slack_id: String,
    id: String,
    content_url: String,
    name: String,
}

/// Mappings loaded from the state directory
#[derive(Debug, Clone)]
pub struct StateMappings {
    default_user: UserIdentity,
    users: HashMap<String, UserIdentity>,
    channels: Vec<ChannelEntry>,
    files: HashMap<String, FileTarget>,
}

impl StateMappings {
    /// Load all three files from `state_dir`
    ///
    /// `users.json` and `channels.json` are required; a missing
    /// `files-uploaded.json` means no files were migrated.
    pub fn load(state_dir: &Path) -> Result<Self> {
        let users: UsersFile = read_state(&state_dir.join(USERS_FILE))?;
        let channels: Vec<ChannelEntry> = read_state(&state_dir.join(CHANNELS_FILE))?;

        let files_path = state_dir.join(FILES_FILE);
        let files: Vec<FileEntry> = if files_path.exists() {
            read_state(&files_path)?
        } else {
            tracing::warn!(path = %files_path.display(), "No uploaded files mapping, attachments will be omitted");
            Vec::new()
        };

        let mappings = Self::new(
            to_identity(&users.default),
            users
                .users
                .iter()
                .filter_map(|u| u.slack_id.clone().map(|id| (id, to_identity(u))))
                .collect(),
            channels,
            files
                .into_iter()
                .map(|f| {
                    (
                        f.slack_id,
                        FileTarget {
                            id: f.id,
                            content_url: f.content_url,
                            name: f.name,
                        },
                    )
                })
                .collect(),
        );

        tracing::info!(
            users = mappings.users.len(),
            channels = mappings.channels.len(),
            files = mappings.files.len(),
            "Loaded mappings"
        );
        Ok(mappings)
    }

    pub fn new(
        default_user: UserIdentity,
        users: HashMap<String, UserIdentity>,
        channels: Vec<ChannelEntry>,
        files: HashMap<String, FileTarget>,
    ) -> Self {
        Self {
            default_user,
            users,
            channels,
            files,
        }
    }

    /// Mapped channels in file order
    pub fn channels(&self) -> &[ChannelEntry] {
        &self.channels
    }
}

impl IdentityMap for StateMappings {
    fn user(&self, source_id: &str) -> UserIdentity {
        self.users
            .get(source_id)
            .cloned()
            .unwrap_or_else(|| self.default_user.clone())
    }

    fn channel(&self, source_id: &str) -> Option<ChannelTarget> {
        self.channels
            .iter()
            .find(|c| c.slack_id == source_id)
            .map(|c| ChannelTarget {
                team_id: c.team_id.clone(),
                channel_id: c.channel_id.clone(),
                display_name: c.slack_name.clone(),
            })
    }

    fn file(&self, source_id: &str) -> Option<FileTarget> {
        self.files.get(source_id).cloned()
    }
}

fn to_identity(entry: &UserEntry) -> UserIdentity {
    UserIdentity {
        id: entry.entra_id.clone(),
        display_name: entry.display_name.clone(),
    }
}

fn read_state<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        MigrateError::Config(format!("Cannot read mapping {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content)
        .map_err(|e| MigrateError::Config(format!("Invalid mapping {}: {}", path.display(), e)))
}
