//! Database query implementations.
//!
//! The message log is append-only: messages are inserted and listed in
//! insertion order, cleared wholesale, or removed with their chat. No
//! single-message delete, no reordering.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection};

use crate::models::{Chat, Message, MessageRole, TokenUsage};

/// Parse a timestamp string flexibly from various formats.
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // SQLite's own datetime() format, with and without fractional seconds
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }

    anyhow::bail!("Invalid timestamp format: {s}")
}

/// Queries for the chats table.
pub struct ChatQueries;

impl ChatQueries {
    /// Insert a new chat, returning it with its assigned id.
    pub fn insert(conn: &Connection, name: Option<&str>) -> Result<Chat> {
        let created_at = Utc::now();
        conn.execute(
            "INSERT INTO chats (name, created_at) VALUES (?1, ?2)",
            params![name, created_at.to_rfc3339()],
        )?;
        Ok(Chat {
            id: conn.last_insert_rowid(),
            name: name.map(String::from),
            created_at,
        })
    }

    /// Get a chat by ID.
    pub fn get_by_id(conn: &Connection, id: i64) -> Result<Option<Chat>> {
        let mut stmt = conn.prepare("SELECT id, name, created_at FROM chats WHERE id = ?1")?;

        let result = stmt.query_row(params![id], |row| Ok(Self::row_to_chat(row)));

        match result {
            Ok(chat) => Ok(Some(chat?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List all chats, newest first.
    pub fn list(conn: &Connection) -> Result<Vec<Chat>> {
        let mut stmt =
            conn.prepare("SELECT id, name, created_at FROM chats ORDER BY id DESC")?;
        let rows = stmt.query_map([], |row| Ok(Self::row_to_chat(row)))?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(row??);
        }
        Ok(chats)
    }

    /// Set a chat's display name.
    pub fn rename(conn: &Connection, id: i64, name: &str) -> Result<()> {
        conn.execute("UPDATE chats SET name = ?1 WHERE id = ?2", params![name, id])?;
        Ok(())
    }

    /// Delete a chat and all of its messages.
    pub fn delete(conn: &Connection, id: i64) -> Result<()> {
        conn.execute("DELETE FROM messages WHERE chat_id = ?1", params![id])?;
        conn.execute("DELETE FROM chats WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Convert a row to a Chat.
    fn row_to_chat(row: &rusqlite::Row<'_>) -> Result<Chat> {
        let created_at_str: String = row.get(2)?;
        let created_at = parse_timestamp(&created_at_str)?;

        Ok(Chat {
            id: row.get(0)?,
            name: row.get(1)?,
            created_at,
        })
    }
}

/// Queries for the messages table.
pub struct MessageQueries;

impl MessageQueries {
    /// Append a message (id is auto-generated).
    pub fn insert(conn: &Connection, message: &Message) -> Result<i64> {
        let usage = message
            .usage
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            r"INSERT INTO messages (chat_id, role, content, usage, model, created_at)
              VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.chat_id,
                message.role.as_str(),
                message.content,
                usage,
                message.model,
                message.created_at.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// List messages for a chat in conversation order.
    pub fn list_for_chat(conn: &Connection, chat_id: i64) -> Result<Vec<Message>> {
        let mut stmt = conn.prepare(
            r"SELECT id, chat_id, role, content, usage, model, created_at
              FROM messages WHERE chat_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![chat_id], |row| Ok(Self::row_to_message(row)))?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row??);
        }
        Ok(messages)
    }

    /// Count messages in a chat.
    pub fn count_for_chat(conn: &Connection, chat_id: i64) -> Result<usize> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE chat_id = ?1",
            params![chat_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Delete every message in a chat, returning how many were removed.
    pub fn clear_for_chat(conn: &Connection, chat_id: i64) -> Result<usize> {
        let count = conn.execute("DELETE FROM messages WHERE chat_id = ?1", params![chat_id])?;
        Ok(count)
    }

    /// Convert a row to a Message.
    fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message> {
        let role_str: String = row.get(2)?;
        let role = MessageRole::from_str(&role_str)
            .context(format!("Invalid message role: {role_str}"))?;

        let usage: Option<TokenUsage> = row
            .get::<_, Option<String>>(4)?
            .map(|s| serde_json::from_str(&s))
            .transpose()?;

        let created_at_str: String = row.get(6)?;
        let created_at = parse_timestamp(&created_at_str)?;

        Ok(Message {
            id: row.get(0)?,
            chat_id: row.get(1)?,
            role,
            content: row.get(3)?,
            usage,
            model: row.get(5)?,
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn open_test_db(dir: &tempfile::TempDir) -> Database {
        Database::open_at(&dir.path().join("test.db")).unwrap()
    }

    #[test]
    fn chat_insert_assigns_sequential_ids() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_test_db(&dir);

        let first = ChatQueries::insert(db.conn(), None).unwrap();
        let second = ChatQueries::insert(db.conn(), Some("greetings")).unwrap();
        assert!(second.id > first.id);
        assert_eq!(second.name.as_deref(), Some("greetings"));
    }

    #[test]
    fn messages_come_back_in_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_test_db(&dir);
        let chat = ChatQueries::insert(db.conn(), None).unwrap();

        for content in ["first", "second", "third"] {
            let msg = Message::new(chat.id, MessageRole::User, content.to_string());
            MessageQueries::insert(db.conn(), &msg).unwrap();
        }

        let messages = MessageQueries::list_for_chat(db.conn(), chat.id).unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[test]
    fn usage_and_model_round_trip_through_storage() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_test_db(&dir);
        let chat = ChatQueries::insert(db.conn(), None).unwrap();

        let msg = Message::new(chat.id, MessageRole::Assistant, "hello".to_string())
            .with_completion_meta(
                Some(TokenUsage {
                    prompt_tokens: 3,
                    completion_tokens: 4,
                    total_tokens: 7,
                }),
                Some("gpt-4o".to_string()),
            );
        MessageQueries::insert(db.conn(), &msg).unwrap();

        let messages = MessageQueries::list_for_chat(db.conn(), chat.id).unwrap();
        assert_eq!(messages[0].model.as_deref(), Some("gpt-4o"));
        assert_eq!(messages[0].usage.as_ref().unwrap().total_tokens, 7);
    }

    #[test]
    fn error_role_survives_storage() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_test_db(&dir);
        let chat = ChatQueries::insert(db.conn(), None).unwrap();

        let msg = Message::new(chat.id, MessageRole::Error, "Error: boom".to_string());
        MessageQueries::insert(db.conn(), &msg).unwrap();

        let messages = MessageQueries::list_for_chat(db.conn(), chat.id).unwrap();
        assert_eq!(messages[0].role, MessageRole::Error);
    }

    #[test]
    fn clear_empties_only_the_target_chat() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_test_db(&dir);
        let kept = ChatQueries::insert(db.conn(), None).unwrap();
        let cleared = ChatQueries::insert(db.conn(), None).unwrap();

        for chat_id in [kept.id, cleared.id] {
            let msg = Message::new(chat_id, MessageRole::User, "hi".to_string());
            MessageQueries::insert(db.conn(), &msg).unwrap();
        }

        let removed = MessageQueries::clear_for_chat(db.conn(), cleared.id).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(MessageQueries::count_for_chat(db.conn(), cleared.id).unwrap(), 0);
        assert_eq!(MessageQueries::count_for_chat(db.conn(), kept.id).unwrap(), 1);
    }

    #[test]
    fn delete_removes_chat_and_messages() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_test_db(&dir);
        let chat = ChatQueries::insert(db.conn(), None).unwrap();
        let msg = Message::new(chat.id, MessageRole::User, "hi".to_string());
        MessageQueries::insert(db.conn(), &msg).unwrap();

        ChatQueries::delete(db.conn(), chat.id).unwrap();
        assert!(ChatQueries::get_by_id(db.conn(), chat.id).unwrap().is_none());
        assert_eq!(MessageQueries::count_for_chat(db.conn(), chat.id).unwrap(), 0);
    }

    #[test]
    fn rename_persists() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_test_db(&dir);
        let chat = ChatQueries::insert(db.conn(), None).unwrap();

        ChatQueries::rename(db.conn(), chat.id, "Travel plans").unwrap();
        let loaded = ChatQueries::get_by_id(db.conn(), chat.id).unwrap().unwrap();
        assert_eq!(loaded.name.as_deref(), Some("Travel plans"));
    }

    #[test]
    fn chat_listing_is_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_test_db(&dir);
        ChatQueries::insert(db.conn(), Some("old")).unwrap();
        let newest = ChatQueries::insert(db.conn(), Some("new")).unwrap();

        let chats = ChatQueries::list(db.conn()).unwrap();
        assert_eq!(chats[0].id, newest.id);
    }
}
