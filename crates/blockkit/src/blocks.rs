//! Rich-text block tree
//!
//! Closed tagged enums, one variant per block or element kind. Kinds this
//! crate doesn't recognize deserialize to `Unknown` instead of failing, so
//! exports produced by newer platform versions still load.

use serde::{Deserialize, Serialize};

/// Top-level block of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    RichText {
        #[serde(default)]
        elements: Vec<RichTextElement>,
    },
    Image {
        image_url: String,
        #[serde(default)]
        alt_text: String,
    },
    Divider,
    Section {
        #[serde(default)]
        text: Option<TextObject>,
    },
    Context,
    Header {
        #[serde(default)]
        text: Option<TextObject>,
    },
    #[serde(other)]
    Unknown,
}

/// Plain or mrkdwn text object used by layout blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextObject {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

/// Inline emphasis flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TextStyle {
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub italic: bool,
    #[serde(default)]
    pub strike: bool,
    #[serde(default)]
    pub code: bool,
}

impl TextStyle {
    pub fn is_plain(&self) -> bool {
        !(self.bold || self.italic || self.strike || self.code)
    }
}

/// Element inside a `rich_text` block: containers and inline nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RichTextElement {
    RichTextSection {
        #[serde(default)]
        elements: Vec<RichTextElement>,
    },
    RichTextList {
        #[serde(default)]
        style: String,
        #[serde(default)]
        elements: Vec<RichTextElement>,
    },
    RichTextPreformatted {
        #[serde(default)]
        elements: Vec<RichTextElement>,
    },
    RichTextQuote {
        #[serde(default)]
        elements: Vec<RichTextElement>,
    },
    Text {
        #[serde(default)]
        text: String,
        #[serde(default)]
        style: Option<TextStyle>,
    },
    Link {
        url: String,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        style: Option<TextStyle>,
    },
    Emoji {
        #[serde(default)]
        name: String,
        #[serde(default)]
        unicode: Option<String>,
    },
    User {
        user_id: String,
    },
    Channel {
        channel_id: String,
    },
    Broadcast {
        range: String,
    },
    Usergroup {
        usergroup_id: String,
    },
    #[serde(other)]
    Unknown,
}
