//! SQLite persistence for chats and messages.

mod connection;
mod queries;

pub use connection::Database;
pub use queries::{ChatQueries, MessageQueries};
