//! Error types for the chat subsystem.

use thiserror::Error;

use crate::chat::core::ids::ConversationId;

/// Chat subsystem error type.
///
/// Completion-service failures are not part of this enum: they are absorbed
/// into fallback replies by the send pipeline and never reach callers.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A stored record could not be decoded.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    /// The referenced conversation does not exist.
    #[error("conversation not found: {0}")]
    ConversationNotFound(ConversationId),
    /// A live subscription failed and was closed by the store.
    #[error("subscription failed: {0}")]
    Subscription(String),
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// HTTP client construction error.
    #[error("http client error: {0}")]
    HttpClient(#[from] reqwest::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result alias for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;
