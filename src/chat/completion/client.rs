//! Chat-completion capability.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

/// Boxed future returned by [`CompletionService::complete`].
pub type CompletionFuture<'a> =
    Pin<Box<dyn Future<Output = Result<String, CompletionError>> + Send + 'a>>;

/// Single-turn completion request: one system message and one user message.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    /// System instructions.
    pub system_prompt: String,
    /// Trimmed user text.
    pub user_message: String,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

impl CompletionRequest {
    /// Build a request; `user_message` is trimmed.
    #[must_use]
    pub fn new(
        system_prompt: impl Into<String>,
        user_message: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_message: user_message.trim().to_string(),
            max_tokens,
            temperature,
        }
    }
}

/// Why a completion produced no usable text.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CompletionError {
    /// No credential is configured.
    #[error("completion credential is not configured")]
    MissingCredential,
    /// The request could not be sent or the connection failed.
    #[error("completion transport error: {0}")]
    Transport(String),
    /// The service answered with a non-success status.
    #[error("completion service returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },
    /// The response body was not a valid completion payload.
    #[error("completion response could not be decoded: {0}")]
    Decode(String),
    /// The response carried no text.
    #[error("completion response was empty")]
    EmptyResponse,
    /// No answer arrived in time.
    #[error("completion timed out after {0:?}")]
    Timeout(Duration),
}

/// A chat-completion backend.
pub trait CompletionService: Send + Sync {
    /// Produce the assistant reply for `request`.
    ///
    /// # Errors
    /// Returns a [`CompletionError`] describing why no reply text exists.
    fn complete(&self, request: CompletionRequest) -> CompletionFuture<'_>;
}
