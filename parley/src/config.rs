//! Local configuration: the stored API key and the endpoint base URL.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::CompletionClient;

/// Default completions endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

const CONFIG_FILE: &str = "config.json";

/// Persisted client configuration, stored as JSON under `~/.parley`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bearer credential for the completions API.
    pub api_key: Option<String>,
    /// Endpoint base URL (scheme + host, no trailing path).
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, falling back to
    /// defaults when no file exists yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&data_dir()?.join(CONFIG_FILE))
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config at {}", path.display()))
    }

    /// Persist configuration to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&data_dir()?.join(CONFIG_FILE))
    }

    /// Persist configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Build a completion client from this configuration.
    ///
    /// A missing key is sent as an empty bearer token; the upstream auth
    /// failure then surfaces in-conversation like any other API error.
    pub fn client(&self) -> CompletionClient {
        CompletionClient::new(
            self.base_url.clone(),
            self.api_key.clone().unwrap_or_default(),
        )
    }
}

/// The parley data directory (`~/.parley`), created on first use.
pub fn data_dir() -> Result<PathBuf> {
    let dir = dirs::home_dir()
        .context("Could not find home directory")?
        .join(".parley");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = Config {
            api_key: Some("sk-test".to_string()),
            base_url: "https://proxy.example.com".to_string(),
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.api_key.as_deref(), Some("sk-test"));
        assert_eq!(loaded.base_url, "https://proxy.example.com");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("missing.json")).unwrap();
        assert!(config.api_key.is_none());
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn base_url_defaults_when_absent_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"api_key": "sk-test"}"#).unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }
}
