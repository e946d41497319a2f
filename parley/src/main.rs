//! Parley - chat with a hosted completion API from the terminal or browser.
//!
//! Architecture:
//! - CLI is a thin client that talks to the parley server via HTTP
//! - Server owns the SQLite conversation store and all upstream API calls
//! - A single-page UI served by the server mirrors the CLI surface

mod api;
mod cli;
mod compose;
mod config;
mod db;
mod models;
mod server;
mod settings;

use anyhow::Result;
use clap::Parser;

use cli::{execute, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    execute(cli).await
}
