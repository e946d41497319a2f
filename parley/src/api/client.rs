//! HTTP client for the completions API.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use super::types::{completion_from_body, Completion, CompletionError, ModelList};

/// Client for one OpenAI-compatible endpoint.
///
/// Each user action gets a single best-effort attempt: no retry, no
/// backoff. All failure modes surface as [`CompletionError`].
pub struct CompletionClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl CompletionClient {
    /// Build a client for the given endpoint and bearer credential.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    /// POST a composed request body to the completions endpoint.
    pub async fn complete(&self, body: &Value) -> Result<Completion, CompletionError> {
        let response = self
            .http
            .post(self.endpoint("/v1/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await?;
        completion_from_body(status, body)
    }

    /// GET the identifiers of models available on the endpoint.
    pub async fn list_models(&self) -> Result<Vec<String>, CompletionError> {
        let response = self
            .http
            .get(self.endpoint("/v1/models"))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await?;
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
        let list: ModelList = serde_json::from_value(body)?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_handles_trailing_slash() {
        let client = CompletionClient::new("https://api.example.com/", "k");
        assert_eq!(
            client.endpoint("/v1/models"),
            "https://api.example.com/v1/models"
        );
    }
}
