//! Core chat types and identifiers.

pub mod config;
pub mod conversation;
pub mod errors;
pub mod ids;
pub mod message;

pub use config::{
    ChatConfig, CompletionConfig, InputConfig, ServerConfig, StoreBackend, StoreConfig,
};
pub use conversation::{Conversation, NewConversation};
pub use errors::{ChatError, ChatResult};
pub use ids::{ConversationId, MessageId};
pub use message::{Message, MessageRole, NewMessage};
