use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

impl Sender {
    /// Short display name for output (User, Bot)
    pub fn short_name(&self) -> &'static str {
        match self {
            Sender::User => "User",
            Sender::Bot => "Bot",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub text: String,
    pub sender: Sender,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            sender,
            timestamp: Some(Utc::now()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, text)
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self::new(Sender::Bot, text)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_pinned: Option<bool>,
    /// Server-side id of the audio file this session works on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub metadata: SessionMetadata,
}

impl Session {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            messages: Vec::new(),
            created_at: Utc::now(),
            updated_at: None,
            is_archived: false,
            metadata: SessionMetadata::default(),
        }
    }

    /// `updated_at`, falling back to `created_at`
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }

    pub fn is_pinned(&self) -> bool {
        self.metadata.is_pinned == Some(true)
    }

    /// Timestamp used for filtering and ordering a message of this session.
    pub fn message_time(&self, message: &Message) -> DateTime<Utc> {
        message.timestamp.unwrap_or(self.created_at)
    }
}

/// Partial update applied by `SessionStore::update_session`.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub title: Option<String>,
    pub messages: Option<Vec<Message>>,
    pub is_archived: Option<bool>,
    pub metadata: Option<SessionMetadata>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SenderFilter {
    #[default]
    All,
    User,
    Bot,
}

impl SenderFilter {
    pub fn accepts(&self, sender: Sender) -> bool {
        match self {
            SenderFilter::All => true,
            SenderFilter::User => sender == Sender::User,
            SenderFilter::Bot => sender == Sender::Bot,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    #[serde(default)]
    pub sender: SenderFilter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub text: String,
    pub use_regex: bool,
    pub filters: SearchFilters,
    /// 0 means no limit
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HighlightSpan {
    /// Character offset of the first matched character
    pub start: usize,
    /// Character offset one past the last matched character
    pub end: usize,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub session_id: String,
    pub session_title: String,
    pub message_id: String,
    pub message_text: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    pub highlights: Vec<HighlightSpan>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SavedSearch {
    pub id: String,
    pub name: String,
    pub query: String,
    #[serde(default)]
    pub use_regex: bool,
    #[serde(default)]
    pub filters: SearchFilters,
    pub created_at: DateTime<Utc>,
}

impl SavedSearch {
    pub fn to_query(&self) -> SearchQuery {
        SearchQuery {
            text: self.query.clone(),
            use_regex: self.use_regex,
            filters: self.filters.clone(),
            limit: 0,
        }
    }
}
