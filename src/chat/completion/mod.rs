//! Chat-completion capability and its implementations.

pub mod client;
pub mod fallback;
pub mod mock;
pub mod openai_client;
pub mod prompt;

pub use client::{CompletionError, CompletionFuture, CompletionRequest, CompletionService};
pub use fallback::FallbackReplies;
pub use mock::{MockCompletionService, MockReply};
pub use openai_client::OpenAiCompletionClient;
pub use prompt::FACT_CHECK_SYSTEM_PROMPT;
