//! Transport to the OpenAI-compatible completions API.

mod client;
mod types;

pub use client::CompletionClient;
pub use types::{Choice, ChoiceMessage, Completion, CompletionError};
