//! Wire types for the completions API.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::models::TokenUsage;

/// Everything that can go wrong talking to the completions endpoint.
///
/// Transport failures, unparseable bodies, and well-formed API error
/// payloads all collapse into this one type; the submission flow renders
/// any variant as a single in-conversation `error` message.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// Network-level failure or a body that was not valid JSON.
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    /// Body was JSON but did not match the expected response shape.
    #[error("unexpected response shape: {0}")]
    Shape(#[from] serde_json::Error),
    /// The API returned an error payload or a non-success status.
    #[error("{message}")]
    Api { message: String },
}

/// One returned choice.
#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

/// Role + content pair inside a choice.
#[derive(Debug, Clone, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

/// A successful completion response.
#[derive(Debug, Clone, Deserialize)]
pub struct Completion {
    #[serde(default)]
    pub choices: Vec<Choice>,
    pub usage: Option<TokenUsage>,
    pub model: Option<String>,
}

/// Response shape of `GET /v1/models`.
#[derive(Debug, Deserialize)]
pub(crate) struct ModelList {
    #[serde(default)]
    pub data: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ModelInfo {
    pub id: String,
}

/// Normalize a JSON response body into a completion or an error.
///
/// A well-formed `{error:{message}}` payload wins over everything else;
/// otherwise a non-success HTTP status becomes an [`CompletionError::Api`],
/// and only then is the body required to look like a completion.
pub(crate) fn completion_from_body(
    status: reqwest::StatusCode,
    body: Value,
) -> Result<Completion, CompletionError> {
    if let Some(message) = body.pointer("/error/message").and_then(Value::as_str) {
        return Err(CompletionError::Api {
            message: message.to_string(),
        });
    }
    if !status.is_success() {
        return Err(CompletionError::Api {
            message: format!("HTTP {status}"),
        });
    }
    Ok(serde_json::from_value(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn completion_parses_choices_usage_and_model() {
        let body = json!({
            "model": "gpt-4o",
            "choices": [
                {"message": {"role": "assistant", "content": "hello"}},
                {"message": {"role": "assistant", "content": "hi there"}}
            ],
            "usage": {"prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12}
        });
        let completion = completion_from_body(reqwest::StatusCode::OK, body).unwrap();
        assert_eq!(completion.choices.len(), 2);
        assert_eq!(completion.choices[0].message.content, "hello");
        assert_eq!(completion.model.as_deref(), Some("gpt-4o"));
        assert_eq!(completion.usage.unwrap().total_tokens, 12);
    }

    #[test]
    fn error_payload_normalizes_to_api_error() {
        let body = json!({"error": {"message": "rate limited"}});
        let err = completion_from_body(reqwest::StatusCode::OK, body).unwrap_err();
        assert_eq!(err.to_string(), "rate limited");
    }

    #[test]
    fn error_payload_wins_over_status() {
        let body = json!({"error": {"message": "invalid api key"}});
        let err = completion_from_body(reqwest::StatusCode::UNAUTHORIZED, body).unwrap_err();
        assert_eq!(err.to_string(), "invalid api key");
    }

    #[test]
    fn bare_failure_status_becomes_api_error() {
        let err =
            completion_from_body(reqwest::StatusCode::BAD_GATEWAY, json!({})).unwrap_err();
        assert_eq!(err.to_string(), "HTTP 502 Bad Gateway");
    }

    #[test]
    fn model_list_parses_identifiers() {
        let list: ModelList = serde_json::from_value(json!({
            "data": [{"id": "gpt-4o"}, {"id": "whisper-1"}]
        }))
        .unwrap();
        let ids: Vec<_> = list.data.into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["gpt-4o", "whisper-1"]);
    }
}
