//! Request composition: message history + settings form values become a
//! single completion request body.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::models::{Message, MessageRole};
use crate::settings::{self, SettingKind};

/// Build the request body for the completions endpoint.
///
/// The `messages` field carries role+content pairs in conversation
/// order, with synthetic `error` messages filtered out. Every settings
/// field whose form value is non-empty is included: numeric fields are
/// parsed as floating point (unparseable values are dropped), select
/// fields pass through as strings. Keys that match no descriptor are
/// ignored. Pure transform, no side effects.
pub fn compose_request(history: &[Message], form: &HashMap<String, String>) -> Value {
    let messages: Vec<Value> = history
        .iter()
        .filter(|m| m.role != MessageRole::Error)
        .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
        .collect();

    let mut body = json!({ "messages": messages });

    for descriptor in settings::descriptors() {
        let Some(raw) = form.get(descriptor.key) else {
            continue;
        };
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        match descriptor.kind {
            SettingKind::Number { .. } => {
                if let Ok(n) = raw.parse::<f64>() {
                    body[descriptor.key] = json!(n);
                }
            }
            SettingKind::Select { .. } => {
                body[descriptor.key] = json!(raw);
            }
        }
    }

    body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: MessageRole, content: &str) -> Message {
        Message::new(1, role, content.to_string())
    }

    #[test]
    fn history_and_empty_settings_compose_messages_only() {
        let history = vec![msg(MessageRole::User, "hi")];
        let body = compose_request(&history, &HashMap::new());
        assert_eq!(body, json!({"messages": [{"role": "user", "content": "hi"}]}));
    }

    #[test]
    fn error_messages_are_filtered_from_context() {
        let history = vec![
            msg(MessageRole::User, "hi"),
            msg(MessageRole::Error, "Error: rate limited"),
            msg(MessageRole::Assistant, "hello"),
        ];
        let body = compose_request(&history, &HashMap::new());
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m["role"] != "error"));
    }

    #[test]
    fn numeric_fields_parse_as_floating_point() {
        let history = vec![msg(MessageRole::User, "hi")];
        let mut form = HashMap::new();
        form.insert("temperature".to_string(), "0.7".to_string());
        form.insert("max_tokens".to_string(), "256".to_string());
        let body = compose_request(&history, &form);
        assert_eq!(body["temperature"], json!(0.7));
        assert_eq!(body["max_tokens"], json!(256.0));
    }

    #[test]
    fn empty_and_unparseable_values_are_omitted() {
        let history = vec![msg(MessageRole::User, "hi")];
        let mut form = HashMap::new();
        form.insert("temperature".to_string(), "  ".to_string());
        form.insert("top_p".to_string(), "warm".to_string());
        let body = compose_request(&history, &form);
        assert!(body.get("temperature").is_none());
        assert!(body.get("top_p").is_none());
    }

    #[test]
    fn select_fields_pass_through_as_strings() {
        let history = vec![msg(MessageRole::User, "hi")];
        let mut form = HashMap::new();
        form.insert("model".to_string(), "gpt-4o".to_string());
        let body = compose_request(&history, &form);
        assert_eq!(body["model"], json!("gpt-4o"));
    }

    #[test]
    fn unknown_form_keys_are_ignored() {
        let history = vec![msg(MessageRole::User, "hi")];
        let mut form = HashMap::new();
        form.insert("logit_bias".to_string(), "5".to_string());
        let body = compose_request(&history, &form);
        assert!(body.get("logit_bias").is_none());
    }

    #[test]
    fn conversation_order_is_preserved() {
        let history = vec![
            msg(MessageRole::System, "be brief"),
            msg(MessageRole::User, "hi"),
            msg(MessageRole::Assistant, "hello"),
            msg(MessageRole::User, "bye"),
        ];
        let body = compose_request(&history, &HashMap::new());
        let contents: Vec<&str> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["content"].as_str().unwrap())
            .collect();
        assert_eq!(contents, vec!["be brief", "hi", "hello", "bye"]);
    }
}
