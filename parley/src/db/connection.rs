//! Database connection management.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::PathBuf;

use crate::config;

/// Database wrapper for the conversation store.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create the database at the default location (~/.parley/parley.db).
    pub fn open() -> Result<Self> {
        let db_path = Self::default_path()?;
        Self::open_at(&db_path)
    }

    /// Get the default database path.
    pub fn default_path() -> Result<PathBuf> {
        Ok(config::data_dir()?.join("parley.db"))
    }

    /// Open or create the database at a specific path.
    pub fn open_at(path: &PathBuf) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Initialize the database schema.
    fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS chats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                usage TEXT,
                model TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (chat_id) REFERENCES chats(id)
            );

            CREATE INDEX IF NOT EXISTS idx_messages_chat_id ON messages(chat_id);
            ",
        )?;
        Ok(())
    }

    /// Get a reference to the connection.
    pub const fn conn(&self) -> &Connection {
        &self.conn
    }
}
