//! CLI command execution.
//!
//! This is a thin client - all store access and upstream API calls go
//! through the server.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};

use crate::config::Config;
use crate::models::{Chat, Message, MessageRole};
use crate::server::{
    self, ChatSummary, ClearResponse, CreateChatRequest, ModelsResponse, RenameRequest,
    RenameResponse, SubmitRequest, SubmitResponse, SuggestNameResponse,
};

use super::args::{Cli, Commands};

// === HTTP Client for Server Communication ===

fn api_base(port: u16) -> String {
    format!("http://127.0.0.1:{port}/api")
}

/// Create a chat via the server.
async fn create_chat_on_server(port: u16, name: Option<&str>) -> Result<Chat> {
    let url = format!("{}/chats", api_base(port));
    let body = CreateChatRequest {
        name: name.map(String::from),
    };

    let resp = reqwest::Client::new()
        .post(&url)
        .json(&body)
        .send()
        .await
        .context("Failed to create chat on server")?;

    if !resp.status().is_success() {
        bail!("Server returned {}", resp.status());
    }

    resp.json().await.context("Failed to parse chat")
}

/// Get chat summaries from the server.
async fn get_chats_from_server(port: u16) -> Result<Vec<ChatSummary>> {
    let url = format!("{}/chats", api_base(port));

    let resp = reqwest::Client::new()
        .get(&url)
        .send()
        .await
        .context("Failed to get chats from server")?;

    if !resp.status().is_success() {
        bail!("Server returned {}", resp.status());
    }

    resp.json().await.context("Failed to parse chats")
}

/// Get a chat's message history from the server.
async fn get_messages_from_server(port: u16, chat_id: i64) -> Result<Vec<Message>> {
    let url = format!("{}/chats/{chat_id}/messages", api_base(port));

    let resp = reqwest::Client::new()
        .get(&url)
        .send()
        .await
        .context("Failed to get messages from server")?;

    if !resp.status().is_success() {
        bail!("Server returned {}", resp.status());
    }

    resp.json().await.context("Failed to parse messages")
}

/// Submit a message to a chat via the server.
async fn send_message_to_server(
    port: u16,
    chat_id: i64,
    content: &str,
    settings: HashMap<String, String>,
) -> Result<SubmitResponse> {
    let url = format!("{}/chats/{chat_id}/messages", api_base(port));
    let body = SubmitRequest {
        content: content.to_string(),
        settings,
    };

    let resp = reqwest::Client::new()
        .post(&url)
        .json(&body)
        .send()
        .await
        .context("Failed to send message to server")?;

    if !resp.status().is_success() {
        bail!("Server returned {}", resp.status());
    }

    resp.json().await.context("Failed to parse response")
}

/// Rename a chat via the server.
async fn rename_chat_on_server(port: u16, chat_id: i64, name: &str) -> Result<RenameResponse> {
    let url = format!("{}/chats/{chat_id}", api_base(port));
    let body = RenameRequest {
        name: name.to_string(),
    };

    let resp = reqwest::Client::new()
        .patch(&url)
        .json(&body)
        .send()
        .await
        .context("Failed to rename chat on server")?;

    if !resp.status().is_success() {
        bail!("Server returned {}", resp.status());
    }

    resp.json().await.context("Failed to parse response")
}

/// Ask the server for a model-suggested chat name.
async fn suggest_name_on_server(port: u16, chat_id: i64) -> Result<SuggestNameResponse> {
    let url = format!("{}/chats/{chat_id}/name", api_base(port));

    let resp = reqwest::Client::new()
        .post(&url)
        .send()
        .await
        .context("Failed to request name suggestion")?;

    if !resp.status().is_success() {
        bail!("Server returned {}", resp.status());
    }

    resp.json().await.context("Failed to parse response")
}

/// Clear a chat's messages via the server.
async fn clear_chat_on_server(port: u16, chat_id: i64) -> Result<ClearResponse> {
    let url = format!("{}/chats/{chat_id}/messages", api_base(port));

    let resp = reqwest::Client::new()
        .delete(&url)
        .send()
        .await
        .context("Failed to clear chat on server")?;

    if !resp.status().is_success() {
        bail!("Server returned {}", resp.status());
    }

    resp.json().await.context("Failed to parse response")
}

/// Delete a chat via the server.
async fn delete_chat_on_server(port: u16, chat_id: i64) -> Result<()> {
    let url = format!("{}/chats/{chat_id}", api_base(port));

    let resp = reqwest::Client::new()
        .delete(&url)
        .send()
        .await
        .context("Failed to delete chat on server")?;

    if !resp.status().is_success() {
        bail!("Server returned {}", resp.status());
    }

    Ok(())
}

/// Get the selectable models from the server.
async fn get_models_from_server(port: u16) -> Result<ModelsResponse> {
    let url = format!("{}/models", api_base(port));

    let resp = reqwest::Client::new()
        .get(&url)
        .send()
        .await
        .context("Failed to get models from server")?;

    if !resp.status().is_success() {
        bail!("Server returned {}", resp.status());
    }

    resp.json().await.context("Failed to parse models")
}

// === Command Execution ===

/// Map the generation flags onto raw settings-form values. Flags left
/// unset stay out of the map and therefore out of the request.
fn settings_from_cli(cli: &Cli) -> HashMap<String, String> {
    let pairs = [
        ("model", &cli.model),
        ("temperature", &cli.temperature),
        ("top_p", &cli.top_p),
        ("max_tokens", &cli.max_tokens),
        ("presence_penalty", &cli.presence_penalty),
        ("frequency_penalty", &cli.frequency_penalty),
    ];

    let mut form = HashMap::new();
    for (key, value) in pairs {
        if let Some(v) = value {
            form.insert(key.to_string(), v.clone());
        }
    }
    form
}

pub async fn execute(cli: Cli) -> Result<()> {
    let settings = settings_from_cli(&cli);
    let target_chat = cli.chat;

    match cli.command {
        Some(Commands::New { message }) => {
            let message = message.join(" ");
            new_chat(&message, settings).await
        }
        Some(Commands::List) => list_chats().await,
        Some(Commands::History { chat_id }) => show_history(chat_id).await,
        Some(Commands::Rename { chat_id, name }) => {
            let name = name.join(" ");
            if name.is_empty() {
                bail!("A name is required for the rename command");
            }
            rename_chat(chat_id, &name).await
        }
        Some(Commands::Suggest { chat_id }) => suggest_name(chat_id).await,
        Some(Commands::Clear { chat_id }) => clear_chat(chat_id).await,
        Some(Commands::Delete { chat_id }) => delete_chat(chat_id).await,
        Some(Commands::Models) => list_models().await,
        Some(Commands::Config { key, base_url }) => configure(key, base_url),
        Some(Commands::Serve { port, open }) => server::start_server(port, open).await,
        None => {
            let message = cli.message.join(" ");
            if message.is_empty() {
                print_usage();
                return Ok(());
            }
            send_message(target_chat, &message, settings).await
        }
    }
}

fn print_usage() {
    println!("Parley - chat with a hosted completion API");
    println!();
    println!("Usage: parley [OPTIONS] [MESSAGE]...");
    println!("       parley <COMMAND>");
    println!();
    println!("Commands:");
    println!("  new            Start a new chat");
    println!("  list           List chats");
    println!("  history <ID>   View messages for a chat");
    println!("  rename <ID>    Rename a chat");
    println!("  suggest <ID>   Ask the model to suggest a name");
    println!("  clear <ID>     Clear all messages in a chat");
    println!("  delete <ID>    Delete a chat");
    println!("  models         List selectable models");
    println!("  config         Show or update the API key and endpoint");
    println!("  serve          Start the chat server and web UI");
    println!();
    println!("Options:");
    println!("  -c, --chat <ID>      Chat to message (defaults to the most recent)");
    println!("  -m, --model <MODEL>  Model to answer with");
    println!("  -h, --help           Print help");
}

/// Send a message to an existing chat, creating one if none exists.
async fn send_message(
    chat: Option<i64>,
    message: &str,
    settings: HashMap<String, String>,
) -> Result<()> {
    let port = server::ensure_server_running()?;

    let chat_id = match chat {
        Some(id) => id,
        None => match get_chats_from_server(port).await?.first() {
            Some(summary) => summary.id,
            None => create_chat_on_server(port, None).await?.id,
        },
    };

    let response = send_message_to_server(port, chat_id, message, settings).await?;
    print_replies(chat_id, &response.messages);
    Ok(())
}

async fn new_chat(message: &str, settings: HashMap<String, String>) -> Result<()> {
    let port = server::ensure_server_running()?;

    let chat = create_chat_on_server(port, None).await?;
    println!("Created chat {}", chat.id);

    if !message.is_empty() {
        let response = send_message_to_server(port, chat.id, message, settings).await?;
        print_replies(chat.id, &response.messages);
    }
    Ok(())
}

/// Print the replies from one submission (everything but the echoed
/// user message).
fn print_replies(chat_id: i64, messages: &[Message]) {
    for msg in messages {
        match msg.role {
            MessageRole::User => {}
            MessageRole::Error => println!("\n{}", msg.content),
            _ => {
                println!("\n{}", msg.content);
                let mut meta = Vec::new();
                if let Some(model) = &msg.model {
                    meta.push(model.clone());
                }
                if let Some(usage) = &msg.usage {
                    meta.push(format!("{} tokens", usage.total_tokens));
                }
                if !meta.is_empty() {
                    println!("({}, chat {chat_id})", meta.join(", "));
                }
            }
        }
    }
}

async fn list_chats() -> Result<()> {
    let port = server::ensure_server_running()?;

    let chats = get_chats_from_server(port).await?;
    if chats.is_empty() {
        println!("No chats found.");
        return Ok(());
    }

    println!("{:<6} {:<30} {:<10} {:<12}", "ID", "NAME", "MESSAGES", "CREATED");
    println!("{}", "-".repeat(60));

    for chat in chats {
        let name = chat.name.as_deref().unwrap_or("New chat");
        let name_short = if name.len() > 28 { &name[..28] } else { name };
        let created = chat.created_at.get(..10).unwrap_or(&chat.created_at);
        println!(
            "{:<6} {:<30} {:<10} {:<12}",
            chat.id, name_short, chat.message_count, created,
        );
    }
    Ok(())
}

async fn show_history(chat_id: i64) -> Result<()> {
    let port = server::ensure_server_running()?;

    let messages = get_messages_from_server(port, chat_id).await?;
    if messages.is_empty() {
        println!("No messages found for chat {chat_id}.");
        return Ok(());
    }

    for msg in messages {
        println!("[{}]:", msg.role.as_str().to_uppercase());
        println!("{}", msg.content);
        if let Some(model) = &msg.model {
            println!("({model})");
        }
        println!();
    }
    Ok(())
}

async fn rename_chat(chat_id: i64, name: &str) -> Result<()> {
    let port = server::ensure_server_running()?;

    let response = rename_chat_on_server(port, chat_id, name).await?;
    if response.renamed {
        println!("Chat {chat_id} renamed to: {name}");
    } else {
        println!("Name unchanged.");
    }
    Ok(())
}

async fn suggest_name(chat_id: i64) -> Result<()> {
    let port = server::ensure_server_running()?;

    let response = suggest_name_on_server(port, chat_id).await?;
    match (response.name, response.error) {
        (Some(name), _) => println!("Chat {chat_id} named: {name}"),
        (None, Some(error)) => println!("Could not suggest a name: {error}"),
        (None, None) => println!("Could not suggest a name."),
    }
    Ok(())
}

async fn clear_chat(chat_id: i64) -> Result<()> {
    let port = server::ensure_server_running()?;

    let response = clear_chat_on_server(port, chat_id).await?;
    println!("Cleared {} messages from chat {chat_id}.", response.cleared);
    Ok(())
}

async fn delete_chat(chat_id: i64) -> Result<()> {
    let port = server::ensure_server_running()?;

    delete_chat_on_server(port, chat_id).await?;
    println!("Deleted chat {chat_id}.");
    Ok(())
}

async fn list_models() -> Result<()> {
    let port = server::ensure_server_running()?;

    let response = get_models_from_server(port).await?;
    if let Some(error) = response.error {
        println!("Could not list models: {error}");
        return Ok(());
    }
    if response.models.is_empty() {
        println!("No supported models available on this endpoint.");
        return Ok(());
    }

    for model in response.models {
        println!("{model}");
    }
    Ok(())
}

/// Show or update local configuration. Does not require the server.
fn configure(key: Option<String>, base_url: Option<String>) -> Result<()> {
    let mut config = Config::load()?;

    let mut changed = false;
    if let Some(key) = key {
        config.api_key = Some(key);
        changed = true;
    }
    if let Some(url) = base_url {
        config.base_url = url;
        changed = true;
    }
    if changed {
        config.save()?;
        println!("Configuration saved.");
    }

    println!("Endpoint: {}", config.base_url);
    match &config.api_key {
        Some(key) => {
            let tail: String = key.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
            println!("API key: ****{tail}");
        }
        None => println!("API key: (not set)"),
    }
    Ok(())
}
