use serde::{Deserialize, Serialize};

/// A row from the store's `message` table, joined to its conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: i64,
    pub guid: String,
    pub conversation_id: i64,
    pub timestamp: i64,
    pub is_from_me: bool,
    pub text: Option<String>,
    #[serde(skip)]
    pub attributed_body: Option<Vec<u8>>,
    pub handle: Option<String>,
    pub associated_guid: Option<String>,
    pub associated_type: Option<i64>,
    pub reply_to_guid: Option<String>,
    pub date_read: Option<i64>,
}

impl RawMessage {
    /// Tapback rows (add, remove, emoji and sticker variants) carry no content of their own.
    pub fn is_reaction_carrier(&self) -> bool {
        matches!(self.associated_type, Some(code) if (2000..4000).contains(&code))
    }

    pub fn plain_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionKind {
    Loved,
    Liked,
    Disliked,
    Laughed,
    Emphasized,
    Questioned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub target: String,
    pub kind: ReactionKind,
    pub polarity: Polarity,
    pub sender: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Video,
    Audio,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: i64,
    pub message_id: i64,
    pub path: Option<String>,
    pub mime_type: Option<String>,
    pub filename: String,
    pub kind: AttachmentKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeKind {
    Mention,
    Link,
    Breadcrumb,
}

/// A span of `RichText::text`, in byte offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRange {
    pub start: usize,
    pub end: usize,
    pub kind: RangeKind,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichText {
    pub text: String,
    pub ranges: Vec<TextRange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedMessage {
    pub id: i64,
    pub guid: String,
    pub timestamp: i64,
    pub date: Option<String>,
    pub date_read: Option<String>,
    pub year: i32,
    pub is_from_me: bool,
    pub text: String,
    pub ranges: Vec<TextRange>,
    pub sender: Option<String>,
    pub handle: Option<String>,
    pub reply_to_guid: Option<String>,
    pub attachments: Vec<Attachment>,
    pub reactions: Vec<Reaction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearGroup {
    pub year: i32,
    pub messages: Vec<ResolvedMessage>,
}

/// Conversation metadata as stored, before any contact resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationInfo {
    pub id: i64,
    pub display_name: Option<String>,
    pub identifier: Option<String>,
    pub is_group: bool,
    pub handles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: i64,
    pub display_name: String,
    pub handles: Vec<String>,
    pub is_group: bool,
    pub years: Vec<i32>,
    pub message_count: i64,
    pub preview: String,
    pub last_message_at: i64,
    pub last_message_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationDay {
    pub conversation_id: i64,
    pub display_name: String,
    pub handles: Vec<String>,
    pub is_group: bool,
    pub year_groups: Vec<YearGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentLocation {
    pub path: String,
    pub mime_type: Option<String>,
}
