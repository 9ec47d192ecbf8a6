//! Raw TOML configuration data types
//!
//! These structs represent the exact structure of the TOML config file.
//!
//! ```toml
//! [api]
//! url = "https://api.deepseek.com/v1/chat/completions"
//! model = "deepseek-chat"
//! temperature = 0.7
//! api_key_env = "STREAMCHAT_API_KEY"
//! connect_timeout_seconds = 10
//!
//! [storage]
//! path = "~/.local/share/streamchat/chats.json"
//!
//! [chat]
//! error_message = "The assistant is unavailable right now."
//!
//! [logging]
//! conversation_log = "/tmp/streamchat.conversation.jsonl"
//! ```

use crate::completion::{CompletionSettings, DEFAULT_API_URL, DEFAULT_MODEL, DEFAULT_TEMPERATURE};
use crate::storage::{DEFAULT_ACTIVE_CHAT_KEY, DEFAULT_CHATS_KEY};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use streamchat_application::ChatConfig;
use thiserror::Error;

/// Environment variable consulted for the API key unless overridden.
pub const DEFAULT_API_KEY_ENV: &str = "STREAMCHAT_API_KEY";

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("api.model cannot be empty")]
    EmptyModel,

    #[error("api.url cannot be empty")]
    EmptyUrl,

    #[error("api.temperature must be between 0.0 and 2.0, got {0}")]
    InvalidTemperature(f64),

    #[error("api.connect_timeout_seconds cannot be 0")]
    InvalidTimeout,

    #[error("No API key configured: set api.api_key or the {0} environment variable")]
    MissingApiKey(String),
}

/// Raw completion endpoint configuration from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileApiConfig {
    pub url: String,
    pub model: String,
    pub temperature: f64,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    /// Inline API key; takes precedence over `api_key_env`
    pub api_key: Option<String>,
    pub connect_timeout_seconds: Option<u64>,
}

impl Default for FileApiConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            api_key: None,
            connect_timeout_seconds: None,
        }
    }
}

impl FileApiConfig {
    /// The inline key if set, otherwise the value of `api_key_env`.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            return Ok(key.to_string());
        }
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ConfigError::MissingApiKey(self.api_key_env.clone())),
        }
    }

    pub fn to_settings(&self, api_key: String) -> CompletionSettings {
        CompletionSettings::new(api_key)
            .with_url(&self.url)
            .with_model(&self.model)
            .with_temperature(self.temperature)
            .with_connect_timeout(self.connect_timeout_seconds.map(Duration::from_secs))
    }
}

/// Raw storage configuration from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileStorageConfig {
    /// Chat file; defaults to `<data_dir>/streamchat/chats.json`
    pub path: Option<PathBuf>,
    pub chats_key: String,
    pub active_chat_key: String,
}

impl Default for FileStorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            chats_key: DEFAULT_CHATS_KEY.to_string(),
            active_chat_key: DEFAULT_ACTIVE_CHAT_KEY.to_string(),
        }
    }
}

impl FileStorageConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("streamchat")
                .join("chats.json")
        })
    }
}

/// Raw chat behavior configuration from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileChatConfig {
    /// Text persisted as the error message when a completion fails
    pub error_message: Option<String>,
}

impl FileChatConfig {
    pub fn to_chat_config(&self) -> ChatConfig {
        match &self.error_message {
            Some(message) if !message.trim().is_empty() => {
                ChatConfig::default().with_error_message(message.clone())
            }
            _ => ChatConfig::default(),
        }
    }
}

/// Raw logging configuration from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggingConfig {
    /// JSONL conversation transcript; disabled when unset
    pub conversation_log: Option<PathBuf>,
}

/// Complete configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub api: FileApiConfig,
    pub storage: FileStorageConfig,
    pub chat: FileChatConfig,
    pub logging: FileLoggingConfig,
}

impl FileConfig {
    /// Validate the configuration
    ///
    /// The API key is not checked here; see [`FileApiConfig::resolve_api_key`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.url.trim().is_empty() {
            return Err(ConfigError::EmptyUrl);
        }
        if self.api.model.trim().is_empty() {
            return Err(ConfigError::EmptyModel);
        }
        if !(0.0..=2.0).contains(&self.api.temperature) {
            return Err(ConfigError::InvalidTemperature(self.api.temperature));
        }
        if let Some(0) = self.api.connect_timeout_seconds {
            return Err(ConfigError::InvalidTimeout);
        }
        Ok(())
    }
}
