//! Parley server - owns the conversation store and the upstream API calls.
//!
//! Architecture:
//! - One server runs at ~/.parley (manages PID/port files)
//! - The SQLite store lives at ~/.parley/parley.db
//! - All store access goes through the server; CLI and web UI are thin clients
//!
//! Endpoints:
//! - GET / - Single-page chat UI
//! - GET /api/settings - Generation-parameter descriptors
//! - GET /api/models - Selectable models (remote list filtered by allow-list)
//! - GET /api/chats - List chats
//! - POST /api/chats - Create a chat
//! - GET|PATCH|DELETE /api/chats/{id} - Fetch, rename, delete a chat
//! - GET|POST|DELETE /api/chats/{id}/messages - History, submit, clear
//! - POST /api/chats/{id}/name - Suggest a name from the conversation
//! - WS /ws - Appended messages, pushed as they land

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{delete, get, patch, post},
    Json, Router,
};
use regex::Regex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tower_http::cors::CorsLayer;

use crate::api::{Completion, CompletionError};
use crate::compose::compose_request;
use crate::config::Config;
use crate::db::{ChatQueries, Database, MessageQueries};
use crate::models::{Chat, Message, MessageRole};
use crate::settings;

/// Server configuration file paths.
const SERVER_DIR: &str = ".parley";
const PID_FILE: &str = "server.pid";
const PORT_FILE: &str = "server.port";

/// Port used when the CLI has to start the server itself.
pub const DEFAULT_PORT: u16 = 58419;

/// Prompt appended (unpersisted) to the history for name suggestion.
const NAME_PROMPT: &str =
    "Suggest a name for this conversation, summarizing it in five words or fewer. \
     Reply with only the name.";

/// Suggested names longer than this are cut off.
const MAX_NAME_LEN: usize = 60;

/// Shared server state.
pub struct ServerState {
    /// Conversation store, serialized behind a lock.
    db: Mutex<Database>,
    /// Broadcast channel for appended messages.
    tx: broadcast::Sender<MessageBroadcast>,
}

/// Pushed over the WebSocket whenever a message is appended.
#[derive(Clone, Debug, Serialize)]
pub struct MessageBroadcast {
    /// Chat the message was appended to.
    pub chat_id: i64,
    /// The appended message.
    pub message: Message,
}

// === Request/Response Types ===

/// Request to create a chat.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateChatRequest {
    pub name: Option<String>,
}

/// Request to submit a message to a chat.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// The user's input text.
    pub content: String,
    /// Raw settings-form values, keyed by descriptor key. Empty values
    /// are treated as unset.
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

/// Everything appended by one submission: the user message, then either
/// one assistant message per returned choice or a single error message.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub messages: Vec<Message>,
}

/// Request to rename a chat.
#[derive(Debug, Serialize, Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RenameResponse {
    /// False when the name was empty or unchanged (nothing persisted).
    pub renamed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuggestNameResponse {
    pub name: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearResponse {
    pub cleared: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub models: Vec<String>,
    pub error: Option<String>,
}

/// Chat summary for listings.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: i64,
    pub name: Option<String>,
    pub created_at: String,
    pub message_count: usize,
}

// === Server Lifecycle ===

/// Start the server.
pub async fn start_server(port: u16, open_browser: bool) -> Result<()> {
    let server_dir = get_server_dir()?;
    std::fs::create_dir_all(&server_dir)?;

    let pid = std::process::id();
    std::fs::write(server_dir.join(PID_FILE), pid.to_string())?;
    std::fs::write(server_dir.join(PORT_FILE), port.to_string())?;

    let (tx, _rx) = broadcast::channel(1000);

    let db = Database::open()?;
    let state = Arc::new(ServerState {
        db: Mutex::new(db),
        tx,
    });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/api/settings", get(list_settings))
        .route("/api/models", get(list_models))
        .route("/api/chats", get(list_chats))
        .route("/api/chats", post(create_chat))
        .route("/api/chats/{chat_id}", get(get_chat))
        .route("/api/chats/{chat_id}", patch(rename_chat))
        .route("/api/chats/{chat_id}", delete(delete_chat))
        .route("/api/chats/{chat_id}/messages", get(list_messages))
        .route("/api/chats/{chat_id}/messages", post(submit_message))
        .route("/api/chats/{chat_id}/messages", delete(clear_messages))
        .route("/api/chats/{chat_id}/name", post(suggest_name))
        .route("/ws", get(websocket_handler))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    println!("Parley server starting on http://{addr}");

    if open_browser {
        let _ = open::that(format!("http://{addr}"));
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await.context("Server error")?;

    let _ = std::fs::remove_file(server_dir.join(PID_FILE));
    let _ = std::fs::remove_file(server_dir.join(PORT_FILE));

    Ok(())
}

fn get_server_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not find home directory")?;
    Ok(home.join(SERVER_DIR))
}

/// Port of a live server, if one is running.
pub fn get_server_port() -> Option<u16> {
    let server_dir = get_server_dir().ok()?;
    let pid_file = server_dir.join(PID_FILE);
    let port_file = server_dir.join(PORT_FILE);

    if let Ok(pid_str) = std::fs::read_to_string(&pid_file) {
        if let Ok(pid) = pid_str.trim().parse::<u32>() {
            #[cfg(unix)]
            {
                use std::process::Command;
                let output = Command::new("kill").args(["-0", &pid.to_string()]).output();
                if output.map(|o| o.status.success()).unwrap_or(false) {
                    if let Ok(port_str) = std::fs::read_to_string(&port_file) {
                        return port_str.trim().parse().ok();
                    }
                }
            }
            #[cfg(not(unix))]
            {
                if let Ok(port_str) = std::fs::read_to_string(&port_file) {
                    return port_str.trim().parse().ok();
                }
            }
        }
    }
    None
}

/// Spawn the server as a detached daemon.
pub fn spawn_server_daemon(port: u16) -> Result<()> {
    use std::process::{Command, Stdio};

    let exe = std::env::current_exe()?;

    #[cfg(unix)]
    {
        Command::new(&exe)
            .args(["serve", "--port", &port.to_string()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn server daemon")?;
    }

    #[cfg(not(unix))]
    {
        Command::new(&exe)
            .args(["serve", "--port", &port.to_string()])
            .spawn()
            .context("Failed to spawn server daemon")?;
    }

    std::thread::sleep(std::time::Duration::from_millis(500));
    Ok(())
}

/// Return the port of a running server, starting one if needed.
pub fn ensure_server_running() -> Result<u16> {
    if let Some(port) = get_server_port() {
        return Ok(port);
    }

    spawn_server_daemon(DEFAULT_PORT)?;

    for _ in 0..20 {
        if let Some(p) = get_server_port() {
            return Ok(p);
        }
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    anyhow::bail!("Server failed to start")
}

// === Submission flow ===

/// Append the outcome of one completion attempt to a chat: one assistant
/// message per returned choice (content trimmed, tagged with usage and
/// model), or a single error message. Never both.
fn apply_completion(
    conn: &Connection,
    chat_id: i64,
    outcome: Result<Completion, CompletionError>,
) -> Result<Vec<Message>> {
    let mut appended = Vec::new();

    match outcome {
        Ok(completion) => {
            for choice in &completion.choices {
                let mut msg = Message::new(
                    chat_id,
                    MessageRole::Assistant,
                    choice.message.content.trim().to_string(),
                )
                .with_completion_meta(completion.usage.clone(), completion.model.clone());
                msg.id = MessageQueries::insert(conn, &msg)?;
                appended.push(msg);
            }
        }
        Err(e) => {
            let mut msg = Message::new(chat_id, MessageRole::Error, format!("Error: {e}"));
            msg.id = MessageQueries::insert(conn, &msg)?;
            appended.push(msg);
        }
    }

    Ok(appended)
}

/// Decide whether a rename should be persisted: the trimmed name must be
/// non-empty and differ from the current one.
fn normalized_rename(current: Option<&str>, proposed: &str) -> Option<String> {
    let proposed = proposed.trim();
    if proposed.is_empty() || Some(proposed) == current {
        return None;
    }
    Some(proposed.to_string())
}

/// Clean up a model-suggested chat name: collapse whitespace, strip
/// surrounding quotes and trailing punctuation, cap the length.
fn sanitize_name(raw: &str) -> String {
    let collapsed = Regex::new(r"\s+").unwrap().replace_all(raw, " ");
    let trimmed = collapsed
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim_end_matches('.')
        .trim();
    trimmed.chars().take(MAX_NAME_LEN).collect()
}

// === Handlers ===

async fn index_handler() -> Html<&'static str> {
    Html(include_str!("ui.html"))
}

async fn list_settings() -> Json<&'static [settings::SettingDescriptor]> {
    Json(settings::descriptors())
}

async fn list_models() -> Json<ModelsResponse> {
    let client = match Config::load() {
        Ok(config) => config.client(),
        Err(e) => {
            return Json(ModelsResponse {
                models: Vec::new(),
                error: Some(e.to_string()),
            })
        }
    };

    match client.list_models().await {
        Ok(available) => Json(ModelsResponse {
            models: settings::supported_models(&available),
            error: None,
        }),
        Err(e) => Json(ModelsResponse {
            models: Vec::new(),
            error: Some(e.to_string()),
        }),
    }
}

async fn list_chats(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<Vec<ChatSummary>>, StatusCode> {
    let db = state.db.lock().await;
    let chats = ChatQueries::list(db.conn()).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let mut summaries = Vec::with_capacity(chats.len());
    for chat in chats {
        let message_count = MessageQueries::count_for_chat(db.conn(), chat.id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        summaries.push(ChatSummary {
            id: chat.id,
            name: chat.name,
            created_at: chat.created_at.to_rfc3339(),
            message_count,
        });
    }

    Ok(Json(summaries))
}

async fn create_chat(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<CreateChatRequest>,
) -> Result<Json<Chat>, StatusCode> {
    let db = state.db.lock().await;
    let chat = ChatQueries::insert(db.conn(), req.name.as_deref())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(chat))
}

async fn get_chat(
    State(state): State<Arc<ServerState>>,
    Path(chat_id): Path<i64>,
) -> Result<Json<Chat>, StatusCode> {
    let db = state.db.lock().await;
    let chat = ChatQueries::get_by_id(db.conn(), chat_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(chat))
}

async fn rename_chat(
    State(state): State<Arc<ServerState>>,
    Path(chat_id): Path<i64>,
    Json(req): Json<RenameRequest>,
) -> Result<Json<RenameResponse>, StatusCode> {
    let db = state.db.lock().await;
    let chat = ChatQueries::get_by_id(db.conn(), chat_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    match normalized_rename(chat.name.as_deref(), &req.name) {
        Some(name) => {
            ChatQueries::rename(db.conn(), chat_id, &name)
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            Ok(Json(RenameResponse { renamed: true }))
        }
        None => Ok(Json(RenameResponse { renamed: false })),
    }
}

async fn delete_chat(
    State(state): State<Arc<ServerState>>,
    Path(chat_id): Path<i64>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let db = state.db.lock().await;
    ChatQueries::delete(db.conn(), chat_id).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(serde_json::json!({"deleted": true})))
}

async fn list_messages(
    State(state): State<Arc<ServerState>>,
    Path(chat_id): Path<i64>,
) -> Result<Json<Vec<Message>>, StatusCode> {
    let db = state.db.lock().await;
    let messages = MessageQueries::list_for_chat(db.conn(), chat_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(messages))
}

async fn submit_message(
    State(state): State<Arc<ServerState>>,
    Path(chat_id): Path<i64>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, StatusCode> {
    let content = req.content.trim();
    if content.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    // Append the user message and snapshot the history, then release the
    // lock before the upstream call so other handlers stay responsive.
    let mut appended = Vec::new();
    let history = {
        let db = state.db.lock().await;
        ChatQueries::get_by_id(db.conn(), chat_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::NOT_FOUND)?;

        let mut msg = Message::new(chat_id, MessageRole::User, content.to_string());
        msg.id = MessageQueries::insert(db.conn(), &msg)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let _ = state.tx.send(MessageBroadcast {
            chat_id,
            message: msg.clone(),
        });
        appended.push(msg);

        MessageQueries::list_for_chat(db.conn(), chat_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    };

    let body = compose_request(&history, &req.settings);
    let client = Config::load()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .client();
    let outcome = client.complete(&body).await;

    let db = state.db.lock().await;
    let new_messages = apply_completion(db.conn(), chat_id, outcome)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    for message in &new_messages {
        let _ = state.tx.send(MessageBroadcast {
            chat_id,
            message: message.clone(),
        });
    }
    appended.extend(new_messages);

    Ok(Json(SubmitResponse { messages: appended }))
}

async fn clear_messages(
    State(state): State<Arc<ServerState>>,
    Path(chat_id): Path<i64>,
) -> Result<Json<ClearResponse>, StatusCode> {
    let db = state.db.lock().await;
    let cleared = MessageQueries::clear_for_chat(db.conn(), chat_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(ClearResponse { cleared }))
}

async fn suggest_name(
    State(state): State<Arc<ServerState>>,
    Path(chat_id): Path<i64>,
) -> Result<Json<SuggestNameResponse>, StatusCode> {
    let mut history = {
        let db = state.db.lock().await;
        ChatQueries::get_by_id(db.conn(), chat_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::NOT_FOUND)?;
        MessageQueries::list_for_chat(db.conn(), chat_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    };

    // The prompt rides along for this one request only; it is never stored.
    history.push(Message::new(
        chat_id,
        MessageRole::User,
        NAME_PROMPT.to_string(),
    ));

    let body = compose_request(&history, &HashMap::new());
    let client = Config::load()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .client();

    match client.complete(&body).await {
        Ok(completion) => {
            let name = completion
                .choices
                .first()
                .map(|c| sanitize_name(&c.message.content))
                .unwrap_or_default();
            if name.is_empty() {
                return Ok(Json(SuggestNameResponse {
                    name: None,
                    error: Some("Model returned an empty name".to_string()),
                }));
            }
            let db = state.db.lock().await;
            ChatQueries::rename(db.conn(), chat_id, &name)
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            Ok(Json(SuggestNameResponse {
                name: Some(name),
                error: None,
            }))
        }
        Err(e) => Ok(Json(SuggestNameResponse {
            name: None,
            error: Some(e.to_string()),
        })),
    }
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

async fn handle_websocket(mut socket: axum::extract::ws::WebSocket, state: Arc<ServerState>) {
    use axum::extract::ws::Message;

    let mut rx = state.tx.subscribe();

    while let Ok(broadcast) = rx.recv().await {
        if let Ok(json) = serde_json::to_string(&broadcast) {
            if socket.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Choice, ChoiceMessage};
    use crate::models::TokenUsage;

    fn open_test_db(dir: &tempfile::TempDir) -> Database {
        Database::open_at(&dir.path().join("test.db")).unwrap()
    }

    fn completion(contents: &[&str]) -> Completion {
        Completion {
            choices: contents
                .iter()
                .map(|c| Choice {
                    message: ChoiceMessage {
                        role: "assistant".to_string(),
                        content: (*c).to_string(),
                    },
                })
                .collect(),
            usage: Some(TokenUsage {
                prompt_tokens: 1,
                completion_tokens: 2,
                total_tokens: 3,
            }),
            model: Some("gpt-4o".to_string()),
        }
    }

    #[test]
    fn success_appends_one_assistant_message_per_choice() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_test_db(&dir);
        let chat = ChatQueries::insert(db.conn(), None).unwrap();

        let appended =
            apply_completion(db.conn(), chat.id, Ok(completion(&[" hello \n", "hi"]))).unwrap();

        assert_eq!(appended.len(), 2);
        assert!(appended.iter().all(|m| m.role == MessageRole::Assistant));
        assert_eq!(appended[0].content, "hello");
        assert_eq!(appended[0].model.as_deref(), Some("gpt-4o"));
        assert_eq!(appended[0].usage.as_ref().unwrap().total_tokens, 3);
    }

    #[test]
    fn failure_appends_exactly_one_error_message() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_test_db(&dir);
        let chat = ChatQueries::insert(db.conn(), None).unwrap();

        let outcome = Err(CompletionError::Api {
            message: "rate limited".to_string(),
        });
        let appended = apply_completion(db.conn(), chat.id, outcome).unwrap();

        assert_eq!(appended.len(), 1);
        assert_eq!(appended[0].role, MessageRole::Error);
        assert_eq!(appended[0].content, "Error: rate limited");
    }

    #[test]
    fn submission_never_mixes_assistant_and_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_test_db(&dir);
        let chat = ChatQueries::insert(db.conn(), None).unwrap();

        let user = Message::new(chat.id, MessageRole::User, "hi".to_string());
        MessageQueries::insert(db.conn(), &user).unwrap();
        apply_completion(
            db.conn(),
            chat.id,
            Err(CompletionError::Api {
                message: "boom".to_string(),
            }),
        )
        .unwrap();

        let stored = MessageQueries::list_for_chat(db.conn(), chat.id).unwrap();
        let roles: Vec<MessageRole> = stored.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![MessageRole::User, MessageRole::Error]);
    }

    #[test]
    fn rename_requires_nonempty_and_different() {
        assert_eq!(normalized_rename(None, "  "), None);
        assert_eq!(normalized_rename(Some("Trip"), "Trip"), None);
        assert_eq!(normalized_rename(Some("Trip"), " Trip "), None);
        assert_eq!(
            normalized_rename(Some("Trip"), "Travel plans"),
            Some("Travel plans".to_string())
        );
        assert_eq!(normalized_rename(None, " Fresh "), Some("Fresh".to_string()));
    }

    #[test]
    fn sanitize_collapses_whitespace_and_strips_quotes() {
        assert_eq!(sanitize_name("\"Rust  borrow\nchecker help\""), "Rust borrow checker help");
        assert_eq!(sanitize_name("  Weekend trip planning.  "), "Weekend trip planning");
    }

    #[test]
    fn sanitize_caps_length() {
        let long = "word ".repeat(40);
        assert!(sanitize_name(&long).chars().count() <= MAX_NAME_LEN);
    }
}
