//! Typed model of a chat workspace export
//!
//! An export is a directory with a `channels.json` index and one directory per
//! channel holding day files (JSON arrays of messages). This crate reads that
//! layout into typed values: messages, their rich-text block trees, file
//! references and quoted-message attachments.
//!
//! # Example
//!
//! ```no_run
//! use blockkit::Export;
//!
//! let export = Export::open("./export")?;
//! for channel in export.channels()? {
//!     let messages = export.migratable_messages(&channel)?;
//!     println!("{}: {} messages", channel.name, messages.len());
//! }
//! # Ok::<(), blockkit::Error>(())
//! ```

pub mod blocks;
mod export;

pub use blocks::{Block, RichTextElement, TextObject, TextStyle};
pub use export::Export;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when reading an export
#[derive(Error, Debug)]
pub enum Error {
    #[error("Export not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid export: {0}")]
    InvalidExport(String),

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for export operations
pub type Result<T> = std::result::Result<T, Error>;

/// Source-side timestamp (`"1700000000.123456"`)
///
/// Exports write it as a string on messages and sometimes as a number on
/// attachments; both forms deserialize into the same textual value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct Ts(String);

impl Ts {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whole milliseconds since the epoch; sub-millisecond digits are truncated.
    pub fn to_millis(&self) -> Result<i64> {
        let raw = self.0.trim();
        let (secs, frac) = match raw.split_once('.') {
            Some((secs, frac)) => (secs, frac),
            None => (raw, ""),
        };

        let secs: i64 = secs
            .parse()
            .map_err(|_| Error::InvalidTimestamp(self.0.clone()))?;
        if !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::InvalidTimestamp(self.0.clone()));
        }

        let millis: i64 = format!("{:0<3}", &frac[..frac.len().min(3)])
            .parse()
            .map_err(|_| Error::InvalidTimestamp(self.0.clone()))?;

        secs.checked_mul(1000)
            .and_then(|ms| ms.checked_add(millis))
            .ok_or_else(|| Error::InvalidTimestamp(self.0.clone()))
    }
}

impl std::fmt::Display for Ts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for Ts {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de;

        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(s) => Ok(Ts(s)),
            serde_json::Value::Number(n) => Ok(Ts(n.to_string())),
            serde_json::Value::Null => Ok(Ts::default()),
            other => Err(de::Error::custom(format!(
                "expected string or number timestamp, got {}",
                other
            ))),
        }
    }
}

/// How a file is stored on the source side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Uploaded to and served by the source platform
    Hosted,
    /// Link to a third-party storage provider
    External,
    /// Created from an inbound email
    Email,
    /// Deleted, snippet, or any mode this crate doesn't know
    Other,
}

/// A file shared in a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    pub id: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
}

impl FileRef {
    pub fn mode(&self) -> FileMode {
        match self.mode.as_str() {
            "hosted" => FileMode::Hosted,
            "external" => FileMode::External,
            "email" => FileMode::Email,
            _ => FileMode::Other,
        }
    }
}

/// A reply entry listed on a thread parent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub user: String,
    pub ts: Ts,
}

/// Embedded message content carried by a shared-message attachment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBlock {
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub channel: Option<String>,
}

/// A message attachment (link unfurl or shared message)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub ts: Ts,
    #[serde(default)]
    pub message_blocks: Option<Vec<MessageBlock>>,
}

impl Attachment {
    /// True when the attachment is a shared message rather than an unfurl
    pub fn is_message_ref(&self) -> bool {
        self.message_blocks.is_some()
    }

    /// The shared message content, if the export kept it
    pub fn shared_message(&self) -> Option<&Message> {
        self.message_blocks
            .as_ref()
            .and_then(|blocks| blocks.first())
            .and_then(|block| block.message.as_ref())
    }
}

/// A single exported message
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub ts: Ts,
    #[serde(default)]
    pub thread_ts: Option<Ts>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub blocks: Option<Vec<Block>>,
    #[serde(default)]
    pub files: Vec<FileRef>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub replies: Vec<ReplyRef>,
}

/// Message subtypes that carry user-visible content worth migrating
const MIGRATABLE_SUBTYPES: &[&str] = &["thread_broadcast", "bot_message"];

impl Message {
    /// Plain user messages, thread broadcasts and bot messages; joins, topic
    /// changes and other system events are not migrated.
    pub fn is_migratable(&self) -> bool {
        self.kind == "message"
            && self
                .subtype
                .as_deref()
                .map_or(true, |s| MIGRATABLE_SUBTYPES.contains(&s))
    }

    /// Author id, falling back to the bot id for bot messages
    pub fn author(&self) -> Option<&str> {
        self.user.as_deref().or(self.bot_id.as_deref())
    }
}

/// Channel entry from `channels.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_general: bool,
    #[serde(default)]
    pub created: i64,
}
