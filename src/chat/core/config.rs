//! Configuration for the chat subsystem.
//!
//! Values come from `Default`, an optional JSON file named by
//! `TRUTHLENS_CONFIG`, and environment overrides, in that order. The
//! completion credential is only ever read from the file or the environment.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::chat::completion::fallback::FallbackReplies;
use crate::chat::completion::prompt::FACT_CHECK_SYSTEM_PROMPT;
use crate::chat::core::errors::{ChatError, ChatResult};

/// Environment variable naming an optional JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "TRUTHLENS_CONFIG";

/// Required prefix of completion API keys.
const API_KEY_PREFIX: &str = "sk-";

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Completion service settings.
    pub completion: CompletionConfig,
    /// Document store settings.
    pub store: StoreConfig,
    /// Input and conversation defaults.
    pub input: InputConfig,
    /// Fallback assistant replies used when the completion service fails.
    pub replies: FallbackReplies,
    /// HTTP server settings.
    pub server: ServerConfig,
}

impl ChatConfig {
    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ChatResult<()> {
        if self.input.max_chars == 0 {
            return Err(ChatError::InvalidConfig(
                "input.max_chars must be > 0".to_string(),
            ));
        }

        if self.completion.max_tokens == 0 {
            return Err(ChatError::InvalidConfig(
                "completion.max_tokens must be > 0".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.completion.temperature) {
            return Err(ChatError::InvalidConfig(format!(
                "completion.temperature must be within 0..=2, got {}",
                self.completion.temperature
            )));
        }

        if self.completion.timeout_seconds == 0 {
            return Err(ChatError::InvalidConfig(
                "completion.timeout_seconds must be > 0".to_string(),
            ));
        }

        if self.completion.model.trim().is_empty() {
            return Err(ChatError::InvalidConfig(
                "completion.model must not be empty".to_string(),
            ));
        }

        if let Some(key) = &self.completion.api_key {
            if !key.starts_with(API_KEY_PREFIX) {
                return Err(ChatError::InvalidConfig(format!(
                    "completion.api_key must start with {API_KEY_PREFIX:?}"
                )));
            }
        }

        Url::parse(&self.completion.base_url)?;

        self.store.validate()
    }

    /// Load a configuration from a JSON file. Missing fields take defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> ChatResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Load configuration from the process environment.
    ///
    /// # Errors
    /// Returns an error if the config file or an override is invalid.
    pub fn from_env() -> ChatResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration using `lookup` as the environment.
    ///
    /// # Errors
    /// Returns an error if the config file or an override is invalid.
    pub fn from_lookup<F>(lookup: F) -> ChatResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(CONFIG_PATH_ENV) {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides<F>(&mut self, lookup: &F) -> ChatResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(key) = non_empty("TRUTHLENS_API_KEY").or_else(|| non_empty("OPENAI_API_KEY")) {
            self.completion.api_key = Some(key.trim().to_string());
        }
        if let Some(base_url) = non_empty("TRUTHLENS_BASE_URL") {
            self.completion.base_url = base_url;
        }
        if let Some(model) = non_empty("TRUTHLENS_MODEL") {
            self.completion.model = model;
        }
        if let Some(raw) = non_empty("TRUTHLENS_TIMEOUT_SECONDS") {
            self.completion.timeout_seconds = parse_override("TRUTHLENS_TIMEOUT_SECONDS", &raw)?;
        }
        if let Some(raw) = non_empty("TRUTHLENS_STORE") {
            self.store.backend = match raw.trim() {
                "memory" => StoreBackend::Memory,
                "sqlite" => StoreBackend::Sqlite,
                other => {
                    return Err(ChatError::InvalidConfig(format!(
                        "TRUTHLENS_STORE must be \"memory\" or \"sqlite\", got {other:?}"
                    )));
                }
            };
        }
        if let Some(path) = non_empty("TRUTHLENS_SQLITE_PATH") {
            self.store.sqlite_path = PathBuf::from(path);
        }
        if let Some(raw) = non_empty("TRUTHLENS_PORT") {
            self.server.port = parse_override("TRUTHLENS_PORT", &raw)?;
        }
        Ok(())
    }
}

/// Table names are spliced into SQL text, so only plain identifiers pass.
fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_override<T: std::str::FromStr>(key: &str, raw: &str) -> ChatResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| ChatError::InvalidConfig(format!("{key} has an invalid value: {raw:?}")))
}

/// Completion service settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Base URL of an OpenAI-compatible API.
    pub base_url: String,
    /// Model name.
    pub model: String,
    /// Bearer credential. Never serialized back out.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Token cap for a single reply.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound for one completion call, in seconds.
    pub timeout_seconds: u64,
    /// Replacement for the built-in fact-checking system prompt.
    pub system_prompt: Option<String>,
}

impl CompletionConfig {
    /// Completion call timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// System prompt sent with every request.
    #[must_use]
    pub fn effective_system_prompt(&self) -> &str {
        self.system_prompt
            .as_deref()
            .unwrap_or(FACT_CHECK_SYSTEM_PROMPT)
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            api_key: None,
            max_tokens: 1000,
            temperature: 0.7,
            timeout_seconds: 60,
            system_prompt: None,
        }
    }
}

impl fmt::Debug for CompletionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("system_prompt", &self.system_prompt.is_some())
            .finish()
    }
}

/// Document store backend selector.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Process-local store; contents are lost on exit.
    Memory,
    /// `SQLite` file store.
    #[default]
    Sqlite,
}

/// Document store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Which backend to use.
    pub backend: StoreBackend,
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
    /// Conversation table name.
    pub conversations_table: String,
    /// Message table name.
    pub messages_table: String,
}

impl StoreConfig {
    /// Check that both table names are plain SQL identifiers.
    ///
    /// # Errors
    /// Returns `InvalidConfig` naming the first offending table.
    pub fn validate(&self) -> ChatResult<()> {
        for (field, name) in [
            ("store.conversations_table", &self.conversations_table),
            ("store.messages_table", &self.messages_table),
        ] {
            if !is_sql_identifier(name) {
                return Err(ChatError::InvalidConfig(format!(
                    "{field} must match [A-Za-z_][A-Za-z0-9_]*, got {name:?}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            sqlite_path: PathBuf::from("truthlens.sqlite"),
            conversations_table: "conversations".to_string(),
            messages_table: "conversation_messages".to_string(),
        }
    }
}

/// Input and conversation defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Maximum characters accepted by the input buffer.
    pub max_chars: usize,
    /// Title given to newly created conversations.
    pub default_title: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            max_chars: 4000,
            default_title: "محادثة جديدة".to_string(),
        }
    }
}

/// HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listening port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}
