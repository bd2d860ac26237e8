//! Document store capability.

use std::future::Future;
use std::pin::Pin;

use crate::chat::core::conversation::{Conversation, NewConversation};
use crate::chat::core::errors::ChatResult;
use crate::chat::core::ids::ConversationId;
use crate::chat::core::message::{Message, NewMessage};
use crate::chat::sync::subscription::Subscription;

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A document database holding conversations and, per conversation, a
/// message sub-collection.
///
/// Implementations assign ids and strictly increasing server timestamps,
/// and push a complete ordered snapshot to every subscriber after each
/// write, in write order.
pub trait DocumentStore: Send + Sync {
    /// Create a conversation.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn create_conversation(
        &self,
        draft: NewConversation,
    ) -> StoreFuture<'_, ChatResult<Conversation>>;

    /// Append a message to a conversation.
    ///
    /// # Errors
    /// Returns `ConversationNotFound` for an unknown conversation, or an
    /// error if storage access fails.
    fn append_message(
        &self,
        conversation_id: ConversationId,
        draft: NewMessage,
    ) -> StoreFuture<'_, ChatResult<Message>>;

    /// All conversations, newest first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_conversations(&self) -> StoreFuture<'_, ChatResult<Vec<Conversation>>>;

    /// Messages of a conversation, oldest first.
    ///
    /// # Errors
    /// Returns `ConversationNotFound` for an unknown conversation, or an
    /// error if storage access fails.
    fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> StoreFuture<'_, ChatResult<Vec<Message>>>;

    /// Live snapshots of all conversations, newest first.
    ///
    /// # Errors
    /// Returns an error if the subscription cannot be opened.
    fn subscribe_conversations(&self) -> StoreFuture<'_, ChatResult<Subscription<Conversation>>>;

    /// Live snapshots of one conversation's messages, oldest first.
    ///
    /// # Errors
    /// Returns `ConversationNotFound` for an unknown conversation, or an
    /// error if the subscription cannot be opened.
    fn subscribe_messages(
        &self,
        conversation_id: ConversationId,
    ) -> StoreFuture<'_, ChatResult<Subscription<Message>>>;

    /// Delete a conversation together with its messages.
    ///
    /// # Errors
    /// Returns `ConversationNotFound` for an unknown conversation, or an
    /// error if storage access fails.
    fn delete_conversation(&self, conversation_id: ConversationId)
    -> StoreFuture<'_, ChatResult<()>>;
}
