//! Process-local document store.

use std::sync::{Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use tracing::debug;

use crate::chat::core::conversation::{Conversation, NewConversation};
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::{ConversationId, MessageId};
use crate::chat::core::message::{Message, NewMessage};
use crate::chat::store::clock::ServerClock;
use crate::chat::store::document_store::{DocumentStore, StoreFuture};
use crate::chat::store::registry::SubscriberRegistry;
use crate::chat::sync::subscription::Subscription;

/// In-memory implementation of [`DocumentStore`].
///
/// Lock order is conversations list, then message shard, then registry.
#[derive(Default)]
pub struct MemoryDocumentStore {
    clock: ServerClock,
    conversations: Mutex<Vec<Conversation>>,
    messages: DashMap<ConversationId, Vec<Message>>,
    conversation_subscribers: SubscriberRegistry<(), Conversation>,
    message_subscribers: SubscriberRegistry<ConversationId, Message>,
}

impl MemoryDocumentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live conversation-list subscriptions.
    #[must_use]
    pub fn conversation_subscriber_count(&self) -> usize {
        self.conversation_subscribers.subscriber_count(&())
    }

    /// Number of live message subscriptions for a conversation.
    #[must_use]
    pub fn message_subscriber_count(&self, conversation_id: ConversationId) -> usize {
        self.message_subscribers.subscriber_count(&conversation_id)
    }

    fn conversations(&self) -> MutexGuard<'_, Vec<Conversation>> {
        self.conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn create_conversation(
        &self,
        draft: NewConversation,
    ) -> StoreFuture<'_, ChatResult<Conversation>> {
        Box::pin(async move {
            let mut conversations = self.conversations();
            let conversation = draft.into_conversation(ConversationId::generate(), self.clock.now());
            // Timestamps only grow, so the newest conversation goes first.
            conversations.insert(0, conversation.clone());
            self.messages.insert(conversation.id, Vec::new());
            self.conversation_subscribers.publish(&(), &conversations);
            debug!(conversation_id = %conversation.id, "Conversation created");
            Ok(conversation)
        })
    }

    fn append_message(
        &self,
        conversation_id: ConversationId,
        draft: NewMessage,
    ) -> StoreFuture<'_, ChatResult<Message>> {
        Box::pin(async move {
            let mut messages = self
                .messages
                .get_mut(&conversation_id)
                .ok_or(ChatError::ConversationNotFound(conversation_id))?;
            let message = draft.into_message(MessageId::generate(), conversation_id, self.clock.now());
            messages.push(message.clone());
            self.message_subscribers.publish(&conversation_id, &messages);
            debug!(%conversation_id, role = %message.role, "Message appended");
            Ok(message)
        })
    }

    fn list_conversations(&self) -> StoreFuture<'_, ChatResult<Vec<Conversation>>> {
        Box::pin(async move { Ok(self.conversations().clone()) })
    }

    fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> StoreFuture<'_, ChatResult<Vec<Message>>> {
        Box::pin(async move {
            self.messages
                .get(&conversation_id)
                .map(|messages| messages.clone())
                .ok_or(ChatError::ConversationNotFound(conversation_id))
        })
    }

    fn subscribe_conversations(&self) -> StoreFuture<'_, ChatResult<Subscription<Conversation>>> {
        Box::pin(async move {
            let conversations = self.conversations();
            Ok(self
                .conversation_subscribers
                .subscribe((), conversations.clone()))
        })
    }

    fn subscribe_messages(
        &self,
        conversation_id: ConversationId,
    ) -> StoreFuture<'_, ChatResult<Subscription<Message>>> {
        Box::pin(async move {
            let messages = self
                .messages
                .get(&conversation_id)
                .ok_or(ChatError::ConversationNotFound(conversation_id))?;
            Ok(self
                .message_subscribers
                .subscribe(conversation_id, messages.clone()))
        })
    }

    fn delete_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> StoreFuture<'_, ChatResult<()>> {
        Box::pin(async move {
            let mut conversations = self.conversations();
            let position = conversations
                .iter()
                .position(|conversation| conversation.id == conversation_id)
                .ok_or(ChatError::ConversationNotFound(conversation_id))?;
            conversations.remove(position);
            let removed = self
                .messages
                .remove(&conversation_id)
                .map_or(0, |(_, messages)| messages.len());
            self.conversation_subscribers.publish(&(), &conversations);
            self.message_subscribers.publish(&conversation_id, &[]);
            debug!(%conversation_id, removed, "Conversation deleted");
            Ok(())
        })
    }
}
