//! Message model representing one turn in a chat.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Message from the user.
    User,
    /// Message from the assistant.
    Assistant,
    /// System message.
    System,
    /// Synthetic message describing a failed completion attempt.
    Error,
}

impl MessageRole {
    /// Convert role to string for database storage and request bodies.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Error => "error",
        }
    }

    /// Parse role from database string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Token usage reported by the completion API for one exchange.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// A message in a chat.
///
/// Messages are append-only: once stored they are never edited, aside
/// from whitespace trimming applied before insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for the message (auto-incremented by DB).
    pub id: i64,
    /// Chat ID this message belongs to.
    pub chat_id: i64,
    /// Role of the message sender.
    pub role: MessageRole,
    /// Content of the message.
    pub content: String,
    /// Token usage for the exchange that produced this message, if any.
    pub usage: Option<TokenUsage>,
    /// Model that produced this message, if any.
    pub model: Option<String>,
    /// When the message was created.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a new message (id will be set by database on insert).
    pub fn new(chat_id: i64, role: MessageRole, content: String) -> Self {
        Self {
            id: 0,
            chat_id,
            role,
            content,
            usage: None,
            model: None,
            created_at: Utc::now(),
        }
    }

    /// Attach completion metadata (usage counts and producing model).
    pub fn with_completion_meta(mut self, usage: Option<TokenUsage>, model: Option<String>) -> Self {
        self.usage = usage;
        self.model = model;
        self
    }
}
