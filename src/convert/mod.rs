//! Record to chat message conversion
//!
//! [`Converter`] walks a record's block tree by recursive descent and writes
//! HTML through [`Markup`]. Mentions and file references are collected on the
//! side and end up in the [`ChatMessagePayload`] next to the HTML body.
//!
//! Block and element kinds without a rendering (sections, context blocks,
//! unrecognized kinds) produce nothing.

mod markup;

pub use markup::Markup;

use crate::mappings::{ChannelTarget, IdentityMap, UserIdentity};
use crate::record::{Body, Quote, Record, RecordKey};
use crate::resolve::ReferenceTable;
use blockkit::{Block, FileMode, FileRef, RichTextElement};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Identity type of every destination user
pub const AAD_USER: &str = "aadUser";

/// Text of a quote whose content the export dropped
const DELETED_MESSAGE: &str = "Deleted message";

/// Fallback for mentions of channels that were not migrated
const DELETED_CHANNEL: &str = "deleted-channel";

/// Conversion failures
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The record's channel has no destination
    #[error("Channel {0} has no destination mapping")]
    UnmappedChannel(String),

    /// A reply was dispatched before its parent's destination id was known
    #[error("Parent {0} has not been migrated")]
    ParentNotMigrated(RecordKey),

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Where a message is created
///
/// Replies keep the parent's key and are addressed once the parent's
/// destination id is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<RecordKey>,
}

impl Route {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reply_to: None,
        }
    }

    /// Top-level message creation in a channel
    pub fn channel_messages(target: &ChannelTarget) -> Self {
        Self::new(format!(
            "teams/{}/channels/{}/messages",
            urlencoding::encode(&target.team_id),
            urlencoding::encode(&target.channel_id)
        ))
    }

    /// Final route, with the parent's destination id for replies
    pub fn resolve(&self, references: &ReferenceTable) -> Result<String, ConvertError> {
        match &self.reply_to {
            None => Ok(self.path.clone()),
            Some(parent) => {
                let parent_id = references
                    .get(parent)
                    .ok_or_else(|| ConvertError::ParentNotMigrated(parent.clone()))?;
                Ok(format!(
                    "{}/{}/replies",
                    self.path,
                    urlencoding::encode(&parent_id)
                ))
            }
        }
    }
}

/// `{ "id", "displayName", "userIdentityType" }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    pub user_identity_type: String,
}

impl From<UserIdentity> for Identity {
    fn from(user: UserIdentity) -> Self {
        Self {
            id: user.id,
            display_name: user.display_name,
            user_identity_type: AAD_USER.to_string(),
        }
    }
}

/// `{ "user": {...} }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySet {
    pub user: Identity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemBody {
    pub content_type: String,
    pub content: String,
}

/// A mention; `id` matches the `<at id="...">` tag in the body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mention {
    pub id: usize,
    pub mention_text: String,
    pub mentioned: IdentitySet,
}

/// Reference to a file already uploaded to the destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentReference {
    pub id: String,
    pub content_url: String,
    pub name: String,
    pub content_type: String,
}

/// Body of a message creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessagePayload {
    pub created_date_time: String,
    pub from: IdentitySet,
    pub body: ItemBody,
    pub attachments: Vec<AttachmentReference>,
    pub mentions: Vec<Mention>,
}

/// A converted record
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedMessage {
    pub route: Route,
    pub payload: ChatMessagePayload,
}

impl ConvertedMessage {
    pub fn body(&self) -> Result<String, ConvertError> {
        Ok(serde_json::to_string(&self.payload)?)
    }
}

/// Side output gathered while rendering
#[derive(Default)]
struct Collected {
    mentions: Vec<Mention>,
    attachments: Vec<AttachmentReference>,
}

/// Converts records using an identity map
pub struct Converter<'a, M: ?Sized> {
    map: &'a M,
}

impl<'a, M: IdentityMap + ?Sized> Converter<'a, M> {
    pub fn new(map: &'a M) -> Self {
        Self { map }
    }

    pub fn convert(&self, record: &Record) -> Result<ConvertedMessage, ConvertError> {
        Ok(ConvertedMessage {
            route: self.route(record)?,
            payload: self.payload(record),
        })
    }

    pub fn route(&self, record: &Record) -> Result<Route, ConvertError> {
        let target = self
            .map
            .channel(&record.channel)
            .ok_or_else(|| ConvertError::UnmappedChannel(record.channel.clone()))?;
        Ok(Route {
            reply_to: record.reply_to.clone(),
            ..Route::channel_messages(&target)
        })
    }

    pub fn payload(&self, record: &Record) -> ChatMessagePayload {
        let mut collected = Collected::default();
        let mut markup = Markup::new();
        markup.element("div", |m| self.write_record(m, record, &mut collected));

        ChatMessagePayload {
            created_date_time: record.timestamp.to_rfc3339(),
            from: IdentitySet {
                user: self.map.user(&record.author).into(),
            },
            body: ItemBody {
                content_type: "html".to_string(),
                content: markup.finish(),
            },
            attachments: collected.attachments,
            mentions: collected.mentions,
        }
    }

    fn write_record(&self, m: &mut Markup, record: &Record, collected: &mut Collected) {
        match &record.body {
            Body::Blocks(blocks) => {
                for block in blocks {
                    self.write_block(m, block, collected);
                }
            }
            // exported text is already entity-encoded
            Body::Text(text) => {
                m.raw(&text.replace('\n', "<br />"));
            }
        }

        for quote in &record.quotes {
            self.write_quote(m, quote, collected);
        }

        for file in &record.files {
            self.write_file(m, file, collected);
        }
    }

    fn write_quote(&self, m: &mut Markup, quote: &Quote, collected: &mut Collected) {
        m.element("blockquote", |m| match &quote.record {
            Some(quoted) => {
                m.element("strong", |m| {
                    m.text(&quote.author_name);
                });
                m.raw("<br /><br />");
                self.write_record(m, quoted, collected);
            }
            None => {
                m.text(DELETED_MESSAGE);
            }
        });
    }

    fn write_file(&self, m: &mut Markup, file: &FileRef, collected: &mut Collected) {
        if file.mode() != FileMode::Hosted {
            debug!(file = %file.id, mode = %file.mode, "Omitting non-hosted file");
            return;
        }
        let Some(target) = self.map.file(&file.id) else {
            debug!(file = %file.id, "File was not migrated, omitting");
            return;
        };

        m.open_with("attachment", &[("id", target.id.as_str())]).close();
        if !collected.attachments.iter().any(|a| a.id == target.id) {
            collected.attachments.push(AttachmentReference {
                id: target.id,
                content_url: target.content_url,
                name: target.name,
                content_type: "reference".to_string(),
            });
        }
    }

    fn write_block(&self, m: &mut Markup, block: &Block, collected: &mut Collected) {
        match block {
            Block::RichText { elements } => {
                for element in elements {
                    self.write_element(m, element, collected);
                }
            }
            Block::Image {
                image_url,
                alt_text,
            } => {
                m.empty("img", &[("src", image_url.as_str()), ("alt", alt_text.as_str())]);
            }
            Block::Divider => {
                m.empty("hr", &[]);
            }
            Block::Header { text: Some(text) } => {
                m.element("strong", |m| {
                    m.text(&text.text);
                });
            }
            Block::Header { text: None } | Block::Section { .. } | Block::Context | Block::Unknown => {}
        }
    }

    fn write_element(&self, m: &mut Markup, element: &RichTextElement, collected: &mut Collected) {
        match element {
            RichTextElement::RichTextSection { elements } => {
                for child in elements {
                    self.write_element(m, child, collected);
                }
            }
            RichTextElement::RichTextList { style, elements } => {
                let tag = if style == "ordered" { "ol" } else { "ul" };
                m.element(tag, |m| {
                    for item in elements {
                        m.element("li", |m| self.write_element(m, item, collected));
                    }
                });
            }
            RichTextElement::RichTextPreformatted { elements } => {
                m.element("pre", |m| {
                    for child in elements {
                        self.write_element(m, child, collected);
                    }
                });
            }
            RichTextElement::RichTextQuote { elements } => {
                m.element("blockquote", |m| {
                    for child in elements {
                        self.write_element(m, child, collected);
                    }
                });
            }
            RichTextElement::Text { text, style } => {
                m.styled(style.as_ref(), |m| {
                    m.text(text);
                });
            }
            RichTextElement::Link { url, text, style } => {
                m.open_with("a", &[("href", url.as_str())]);
                m.styled(style.as_ref(), |m| {
                    m.text(text.as_deref().unwrap_or(url));
                });
                m.close();
            }
            RichTextElement::Emoji { unicode, .. } => {
                for codepoint in unicode.iter().flat_map(|u| u.split('-')) {
                    if !codepoint.is_empty() && codepoint.chars().all(|c| c.is_ascii_hexdigit()) {
                        m.raw(&format!("&#x{};", codepoint));
                    }
                }
            }
            RichTextElement::User { user_id } => {
                let user = self.map.user(user_id);
                let index = collected.mentions.len();
                m.open_with("at", &[("id", index.to_string().as_str())])
                    .text(&user.display_name)
                    .close();
                collected.mentions.push(Mention {
                    id: index,
                    mention_text: user.display_name.clone(),
                    mentioned: IdentitySet { user: user.into() },
                });
            }
            RichTextElement::Channel { channel_id } => {
                let name = self
                    .map
                    .channel(channel_id)
                    .map(|c| c.display_name)
                    .unwrap_or_else(|| DELETED_CHANNEL.to_string());
                m.element("strong", |m| {
                    m.text(&format!("@{}", name));
                });
            }
            RichTextElement::Broadcast { range } => {
                m.element("strong", |m| {
                    m.text(&format!("@{}", range));
                });
            }
            RichTextElement::Usergroup { .. } => {
                m.element("strong", |m| {
                    m.text("@deleted-group");
                });
            }
            RichTextElement::Unknown => {}
        }
    }
}
