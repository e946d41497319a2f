//! CLI argument definitions.

use clap::{Parser, Subcommand};

/// Parley - chat with a hosted completion API
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Chat to message (defaults to the most recent chat)
    #[arg(short, long)]
    pub chat: Option<i64>,

    // === Generation Settings ===
    /// Model to answer with (must be on the supported list)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Sampling temperature (0 to 2)
    #[arg(long)]
    pub temperature: Option<String>,

    /// Nucleus sampling mass (0 to 1)
    #[arg(long)]
    pub top_p: Option<String>,

    /// Upper bound on generated tokens per reply
    #[arg(long)]
    pub max_tokens: Option<String>,

    // === Advanced Options (wired up but not prominently exposed) ===
    /// Presence penalty (-2 to 2)
    #[arg(long, hide = true)]
    pub presence_penalty: Option<String>,

    /// Frequency penalty (-2 to 2)
    #[arg(long, hide = true)]
    pub frequency_penalty: Option<String>,

    /// Message to send (used with default behavior)
    #[arg(trailing_var_arg = true)]
    pub message: Vec<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a new chat (optionally sending a first message)
    New {
        /// First message for the new chat
        #[arg(trailing_var_arg = true)]
        message: Vec<String>,
    },

    /// List chats
    List,

    /// View messages for a chat
    History {
        /// Chat ID to view messages for
        chat_id: i64,
    },

    /// Rename a chat
    Rename {
        /// Chat ID to rename
        chat_id: i64,

        /// New display name
        #[arg(trailing_var_arg = true)]
        name: Vec<String>,
    },

    /// Ask the model to suggest a name for a chat
    Suggest {
        /// Chat ID to name
        chat_id: i64,
    },

    /// Clear all messages in a chat
    Clear {
        /// Chat ID to clear
        chat_id: i64,
    },

    /// Delete a chat and its messages
    Delete {
        /// Chat ID to delete
        chat_id: i64,
    },

    /// List models selectable on the configured endpoint
    Models,

    /// Show or update the API key and endpoint base URL
    Config {
        /// Set the API key
        #[arg(long)]
        key: Option<String>,

        /// Set the endpoint base URL
        #[arg(long)]
        base_url: Option<String>,
    },

    /// Start the chat server and web UI
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = crate::server::DEFAULT_PORT)]
        port: u16,

        /// Open browser automatically
        #[arg(long)]
        open: bool,
    },
}
