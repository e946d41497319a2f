//! Chat model representing one persisted conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat is an ordered, append-only sequence of messages plus an
/// optional display name. Identified by an integer id assigned by the
/// database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    /// Unique identifier for the chat (auto-incremented by DB).
    pub id: i64,
    /// Display name, if one has been set or suggested.
    pub name: Option<String>,
    /// When the chat was created.
    pub created_at: DateTime<Utc>,
}
