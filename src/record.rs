//! Migratable records
//!
//! A [`Record`] is one exported message with its timestamp normalized to whole
//! milliseconds. Its identity is the composite [`RecordKey`] `(author, timestamp)`,
//! written `author:timestamp` wherever it is stored.

use blockkit::{Attachment, Block, FileRef, Message};
use chrono::{SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Source timestamp in milliseconds since the epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn millis(&self) -> i64 {
        self.0
    }

    /// ISO-8601 UTC with millisecond precision (`2023-11-14T22:13:20.123Z`)
    pub fn to_rfc3339(&self) -> String {
        Utc.timestamp_millis_opt(self.0)
            .single()
            .unwrap_or_default()
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Shift by `millis`, clamping at the ends of the range
    pub fn offset(&self, millis: i64) -> Self {
        Timestamp(self.0.saturating_add(millis))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Composite identity of a record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub author: String,
    pub timestamp: Timestamp,
}

impl RecordKey {
    pub fn new(author: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            author: author.into(),
            timestamp,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.author, self.timestamp)
    }
}

impl FromStr for RecordKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (author, ts) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("record key without ':' separator: {}", s))?;
        let millis = ts
            .parse::<i64>()
            .map_err(|_| format!("record key with invalid timestamp: {}", s))?;
        Ok(RecordKey::new(author, Timestamp(millis)))
    }
}

impl Serialize for RecordKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RecordKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Content of a record
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Blocks(Vec<Block>),
    /// Messages exported without a block tree
    Text(String),
}

/// A quoted (shared) message embedded in a record
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub author_name: String,
    /// `None` when the export dropped the quoted content
    pub record: Option<Box<Record>>,
}

/// One migratable unit of content
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub author: String,
    pub timestamp: Timestamp,
    /// Timestamp before deduplication, used to match reply lists
    pub source_timestamp: Timestamp,
    pub channel: String,
    pub body: Body,
    pub reply_to: Option<RecordKey>,
    pub quotes: Vec<Quote>,
    pub files: Vec<FileRef>,
    /// Replies listed on a thread parent, as source keys
    pub replies: Vec<RecordKey>,
    /// Attachments not yet turned into quotes
    pub attachments: Vec<Attachment>,
}

impl Record {
    /// Normalize an exported message into a record of `channel`
    pub fn from_message(message: &Message, channel: &str) -> blockkit::Result<Self> {
        let timestamp = Timestamp(message.ts.to_millis()?);

        let replies = message
            .replies
            .iter()
            .filter_map(|reply| match reply.ts.to_millis() {
                Ok(ms) => Some(RecordKey::new(reply.user.clone(), Timestamp(ms))),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping reply reference with invalid timestamp");
                    None
                }
            })
            .collect();

        let body = match &message.blocks {
            Some(blocks) => Body::Blocks(blocks.clone()),
            None => Body::Text(message.text.clone()),
        };

        Ok(Self {
            author: message.author().unwrap_or_default().to_string(),
            timestamp,
            source_timestamp: timestamp,
            channel: channel.to_string(),
            body,
            reply_to: None,
            quotes: Vec::new(),
            files: message.files.clone(),
            replies,
            attachments: message.attachments.clone(),
        })
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.author.clone(), self.timestamp)
    }

    pub fn source_key(&self) -> RecordKey {
        RecordKey::new(self.author.clone(), self.source_timestamp)
    }

    pub fn is_reply(&self) -> bool {
        self.reply_to.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_key_round_trip() {
        let key = RecordKey::new("U123", Timestamp(1_700_000_000_123));
        assert_eq!(key.to_string(), "U123:1700000000123");
        assert_eq!("U123:1700000000123".parse::<RecordKey>().unwrap(), key);

        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"U123:1700000000123\"");
    }

    #[test]
    fn test_record_key_rejects_garbage() {
        assert!("nocolon".parse::<RecordKey>().is_err());
        assert!("U1:abc".parse::<RecordKey>().is_err());
    }

    #[test]
    fn test_timestamp_rfc3339() {
        assert_eq!(
            Timestamp(1_700_000_000_123).to_rfc3339(),
            "2023-11-14T22:13:20.123Z"
        );
    }

    #[test]
    fn test_timestamp_offset_clamps() {
        assert_eq!(Timestamp(1000).offset(2), Timestamp(1002));
        assert_eq!(Timestamp(i64::MAX - 1).offset(5), Timestamp(i64::MAX));
    }

    #[test]
    fn test_from_message() {
        let message: Message = serde_json::from_str(
            r#"{
                "type": "message",
                "user": "U1",
                "ts": "1700000000.123456",
                "text": "hello",
                "replies": [{"user": "U2", "ts": "1700000001.000001"}]
            }"#,
        )
        .unwrap();

        let record = Record::from_message(&message, "C1").unwrap();
        assert_eq!(record.key(), RecordKey::new("U1", Timestamp(1_700_000_000_123)));
        assert_eq!(record.channel, "C1");
        assert_eq!(record.body, Body::Text("hello".to_string()));
        assert_eq!(
            record.replies,
            vec![RecordKey::new("U2", Timestamp(1_700_000_001_000))]
        );
        assert!(!record.is_reply());
    }

    #[test]
    fn test_bot_author_fallback() {
        let message: Message = serde_json::from_str(
            r#"{"type": "message", "subtype": "bot_message", "bot_id": "B9", "ts": "1.0"}"#,
        )
        .unwrap();
        let record = Record::from_message(&message, "C1").unwrap();
        assert_eq!(record.author, "B9");
    }
}
