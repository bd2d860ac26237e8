//! OpenAI-compatible chat-completion client.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::chat::completion::client::{
    CompletionError, CompletionFuture, CompletionRequest, CompletionService,
};
use crate::chat::core::config::CompletionConfig;
use crate::chat::core::errors::ChatResult;

/// Upper bound for establishing a connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest error body kept in logs.
const LOGGED_BODY_CHARS: usize = 200;

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Resolve the completions endpoint from a base URL. A URL that already
/// points at `/chat/completions` is used as is.
fn completions_endpoint(base_url: &str) -> ChatResult<Url> {
    let trimmed = base_url.trim_end_matches('/');
    if trimmed.ends_with("/chat/completions") {
        return Ok(Url::parse(trimmed)?);
    }
    Ok(Url::parse(&format!("{trimmed}/chat/completions"))?)
}

/// Client for `POST {base_url}/chat/completions`.
pub struct OpenAiCompletionClient {
    client: Client,
    endpoint: Url,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl OpenAiCompletionClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client cannot
    /// be built.
    pub fn new(config: &CompletionConfig) -> ChatResult<Self> {
        let timeout = config.timeout();
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: completions_endpoint(&config.base_url)?,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            timeout,
        })
    }

    /// Endpoint requests are sent to.
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn transport_error(&self, err: &reqwest::Error) -> CompletionError {
        if err.is_timeout() {
            CompletionError::Timeout(self.timeout)
        } else {
            CompletionError::Transport(err.to_string())
        }
    }

    async fn send(&self, request: CompletionRequest) -> Result<String, CompletionError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(CompletionError::MissingCredential);
        };

        let body = ChatCompletionRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_message,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        debug!(
            endpoint = %self.endpoint,
            model = %self.model,
            chars = request.user_message.chars().count(),
            "Sending completion request"
        );
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| self.transport_error(&err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let logged: String = body.chars().take(LOGGED_BODY_CHARS).collect();
            warn!(status = status.as_u16(), body = %logged, "Completion service returned an error");
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| self.transport_error(&err))?;
        let payload: ChatCompletionResponse = serde_json::from_slice(&bytes)
            .map_err(|err| CompletionError::Decode(err.to_string()))?;

        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(CompletionError::EmptyResponse)
    }
}

impl CompletionService for OpenAiCompletionClient {
    fn complete(&self, request: CompletionRequest) -> CompletionFuture<'_> {
        Box::pin(self.send(request))
    }
}
