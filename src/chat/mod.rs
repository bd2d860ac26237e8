//! Chat subsystem of the TruthLens agent.
//!
//! Organized into:
//! - `core`: configuration, errors, IDs, conversations and messages
//! - `store`: the document store capability and its backends
//! - `sync`: live conversation and message views fed by store subscriptions
//! - `completion`: the chat-completion capability, fixed prompt and fallback replies
//! - `pipeline`: busy flag, input buffer and the send pipeline
//! - `engine`: wiring of all of the above into one view

pub mod completion;
pub mod core;
pub mod engine;
pub mod pipeline;
pub mod store;
pub mod sync;

pub use completion::{
    CompletionError, CompletionRequest, CompletionService, FACT_CHECK_SYSTEM_PROMPT,
    FallbackReplies, MockCompletionService, OpenAiCompletionClient,
};
pub use core::{
    ChatConfig, ChatError, ChatResult, CompletionConfig, Conversation, ConversationId,
    InputConfig, Message, MessageId, MessageRole, NewConversation, NewMessage, ServerConfig,
    StoreBackend, StoreConfig,
};
pub use engine::{ChatBackends, ChatEngine};
pub use pipeline::{
    BusyFlag, BusyGuard, Exchange, InputBuffer, RejectReason, ReplySource, SendOutcome,
    SendPipeline,
};
pub use store::{DocumentStore, MemoryDocumentStore, SqliteDocumentStore, StoreFuture};
pub use sync::{
    ConversationSync, MessageView, Subscription, SubscriptionHandle, SubscriptionState,
    SyncStatus,
};
