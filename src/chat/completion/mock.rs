//! Scripted completion service for tests and offline runs.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::chat::completion::client::{
    CompletionError, CompletionFuture, CompletionRequest, CompletionService,
};

/// What the mock answers with.
#[derive(Clone, Debug)]
pub enum MockReply {
    /// Reply with the user text prefixed by `echo: `.
    Echo,
    /// Reply with fixed text.
    Text(String),
    /// Fail with the given error.
    Fail(CompletionError),
}

/// Completion service returning scripted replies.
///
/// With a gate, each call waits for one permit before answering, which lets
/// tests hold a request in flight.
pub struct MockCompletionService {
    reply: MockReply,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockCompletionService {
    /// Service answering with `reply`.
    #[must_use]
    pub const fn new(reply: MockReply) -> Self {
        Self {
            reply,
            delay: None,
            gate: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Echo the user text back.
    #[must_use]
    pub const fn echo() -> Self {
        Self::new(MockReply::Echo)
    }

    /// Always reply with `text`.
    #[must_use]
    pub fn replying(text: impl Into<String>) -> Self {
        Self::new(MockReply::Text(text.into()))
    }

    /// Always fail with `error`.
    #[must_use]
    pub const fn failing(error: CompletionError) -> Self {
        Self::new(MockReply::Fail(error))
    }

    /// Sleep for `delay` before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Wait for a permit from `gate` before answering.
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Number of requests received.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Requests received so far, in arrival order.
    #[must_use]
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CompletionService for MockCompletionService {
    fn complete(&self, request: CompletionRequest) -> CompletionFuture<'_> {
        Box::pin(async move {
            let reply = match &self.reply {
                MockReply::Echo => Ok(format!("echo: {}", request.user_message)),
                MockReply::Text(text) => Ok(text.clone()),
                MockReply::Fail(error) => Err(error.clone()),
            };
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request);

            if let Some(gate) = &self.gate {
                gate.acquire()
                    .await
                    .map_err(|err| CompletionError::Transport(err.to_string()))?
                    .forget();
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            reply
        })
    }
}
