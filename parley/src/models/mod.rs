//! Data models for chats and messages.

mod chat;
mod message;

pub use chat::Chat;
pub use message::{Message, MessageRole, TokenUsage};
