//! Chat engine orchestration.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::chat::completion::client::CompletionService;
use crate::chat::completion::openai_client::OpenAiCompletionClient;
use crate::chat::core::config::{ChatConfig, StoreBackend};
use crate::chat::core::conversation::Conversation;
use crate::chat::core::errors::ChatResult;
use crate::chat::core::ids::ConversationId;
use crate::chat::core::message::Message;
use crate::chat::pipeline::input::InputBuffer;
use crate::chat::pipeline::send_pipeline::{SendOutcome, SendPipeline};
use crate::chat::store::document_store::DocumentStore;
use crate::chat::store::memory_store::MemoryDocumentStore;
use crate::chat::store::sqlite_store::SqliteDocumentStore;
use crate::chat::sync::conversation_sync::{ConversationSync, MessageView, SyncStatus};

/// Backend dependencies for the chat engine.
pub struct ChatBackends {
    /// Document store implementation.
    pub store: Arc<dyn DocumentStore>,
    /// Completion service implementation.
    pub completion: Arc<dyn CompletionService>,
}

impl ChatBackends {
    /// Build the configured store and the OpenAI-compatible client.
    ///
    /// # Errors
    /// Returns an error if the store cannot be opened or the client cannot be
    /// built.
    pub async fn from_config(config: &ChatConfig) -> ChatResult<Self> {
        let store: Arc<dyn DocumentStore> = match config.store.backend {
            StoreBackend::Memory => Arc::new(MemoryDocumentStore::new()),
            StoreBackend::Sqlite => Arc::new(SqliteDocumentStore::new(&config.store).await?),
        };
        let completion = Arc::new(OpenAiCompletionClient::new(&config.completion)?);

        Ok(Self { store, completion })
    }
}

/// One chat view: live conversation list, selected conversation and the
/// send pipeline.
pub struct ChatEngine {
    config: ChatConfig,
    store: Arc<dyn DocumentStore>,
    sync: Arc<ConversationSync>,
    pipeline: SendPipeline,
}

impl ChatEngine {
    /// Create an engine over the given backends. No subscription is opened
    /// until [`ChatEngine::start`].
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(config: ChatConfig, backends: ChatBackends) -> ChatResult<Self> {
        config.validate()?;
        let sync = Arc::new(ConversationSync::new(Arc::clone(&backends.store)));
        let pipeline = SendPipeline::new(
            &config,
            Arc::clone(&backends.store),
            backends.completion,
            Arc::clone(&sync),
        );

        Ok(Self {
            config,
            store: backends.store,
            sync,
            pipeline,
        })
    }

    /// Create an engine with backends chosen by `config`.
    ///
    /// # Errors
    /// Returns an error if backends cannot be initialized.
    pub async fn from_config(config: ChatConfig) -> ChatResult<Self> {
        let backends = ChatBackends::from_config(&config).await?;
        Self::new(config, backends)
    }

    /// Open the standing conversation-list subscription.
    ///
    /// # Errors
    /// Returns an error if the subscription cannot be opened.
    pub async fn start(&self) -> ChatResult<()> {
        self.sync.subscribe_conversations().await?;
        info!(
            store = ?self.config.store.backend,
            model = %self.config.completion.model,
            credential = self.config.completion.api_key.is_some(),
            "Chat engine started"
        );
        Ok(())
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Send the input buffer.
    ///
    /// # Errors
    /// Returns an error if a store write fails.
    pub async fn submit(&self) -> ChatResult<SendOutcome> {
        self.pipeline.submit().await
    }

    /// Send `text` directly.
    ///
    /// # Errors
    /// Returns an error if a store write fails.
    pub async fn send_text(&self, text: &str) -> ChatResult<SendOutcome> {
        self.pipeline.send_text(text).await
    }

    /// Create and select a new conversation; `None` while a send is in flight.
    ///
    /// # Errors
    /// Returns an error if the store write or subscription fails.
    pub async fn start_new_conversation(&self) -> ChatResult<Option<Conversation>> {
        self.pipeline.start_new_conversation().await
    }

    /// Select a conversation, or clear the selection with `None`.
    ///
    /// # Errors
    /// Returns an error if the message subscription cannot be opened.
    pub async fn select_conversation(
        &self,
        conversation_id: Option<ConversationId>,
    ) -> ChatResult<()> {
        self.sync.select_conversation(conversation_id).await
    }

    /// Clear the selection.
    pub fn clear_selection(&self) {
        self.pipeline.clear_selection();
    }

    /// Delete a conversation and its messages. Clears the selection first if
    /// it points at the deleted conversation.
    ///
    /// # Errors
    /// Returns an error if the conversation does not exist or the store
    /// write fails.
    pub async fn delete_conversation(&self, conversation_id: ConversationId) -> ChatResult<()> {
        if self.sync.selected() == Some(conversation_id) {
            self.sync.clear_selection();
        }
        self.store.delete_conversation(conversation_id).await?;
        info!(%conversation_id, "Conversation deleted");
        Ok(())
    }

    /// Input buffer used by [`ChatEngine::submit`].
    #[must_use]
    pub const fn input(&self) -> &InputBuffer {
        self.pipeline.input()
    }

    /// Whether a send is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.pipeline.is_busy()
    }

    /// Selected conversation.
    #[must_use]
    pub fn selected(&self) -> Option<ConversationId> {
        self.sync.selected()
    }

    /// Conversations, newest first.
    #[must_use]
    pub fn conversations(&self) -> Vec<Conversation> {
        self.sync.conversation_list()
    }

    /// Messages of the selected conversation, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.sync.message_list()
    }

    /// Current message view.
    #[must_use]
    pub fn message_view(&self) -> MessageView {
        self.sync.message_view()
    }

    /// Subscription health.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.sync.status()
    }

    /// Watch the conversation list.
    #[must_use]
    pub fn watch_conversations(&self) -> watch::Receiver<Vec<Conversation>> {
        self.sync.watch_conversations()
    }

    /// Watch the message view.
    #[must_use]
    pub fn watch_messages(&self) -> watch::Receiver<MessageView> {
        self.sync.watch_messages()
    }

    /// Watch subscription health.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.sync.watch_status()
    }

    /// Tear down every subscription.
    pub fn shutdown(&self) {
        self.sync.shutdown();
        info!("Chat engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::chat::completion::mock::MockCompletionService;
    use crate::chat::core::errors::ChatError;
    use crate::chat::sync::conversation_sync::SubscriptionState;

    const WAIT: Duration = Duration::from_secs(5);

    fn engine() -> ChatEngine {
        ChatEngine::new(
            ChatConfig::default(),
            ChatBackends {
                store: Arc::new(MemoryDocumentStore::new()),
                completion: Arc::new(MockCompletionService::echo()),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_views_follow_a_send() {
        let engine = engine();
        engine.start().await.unwrap();
        let mut conversations = engine.watch_conversations();
        let mut messages = engine.watch_messages();

        engine.input().set("test");
        let outcome = engine.submit().await.unwrap();
        assert!(matches!(outcome, SendOutcome::Completed(_)));

        tokio::time::timeout(WAIT, conversations.wait_for(|list| list.len() == 1))
            .await
            .unwrap()
            .unwrap();
        let view = tokio::time::timeout(WAIT, messages.wait_for(|view| view.messages.len() == 2))
            .await
            .unwrap()
            .unwrap()
            .clone();
        assert_eq!(view.conversation_id, engine.selected());
        assert_eq!(view.messages[1].content, "echo: test");
        assert_eq!(engine.status().conversations, SubscriptionState::Live);
        assert_eq!(engine.status().messages, SubscriptionState::Live);
    }

    #[tokio::test]
    async fn test_delete_selected_conversation_clears_view() {
        let engine = engine();
        engine.start().await.unwrap();
        let conversation = engine.start_new_conversation().await.unwrap().unwrap();
        engine.send_text("claim").await.unwrap();

        engine.delete_conversation(conversation.id).await.unwrap();

        assert_eq!(engine.selected(), None);
        assert!(engine.messages().is_empty());
        let mut conversations = engine.watch_conversations();
        tokio::time::timeout(WAIT, conversations.wait_for(Vec::is_empty))
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            engine.delete_conversation(conversation.id).await,
            Err(ChatError::ConversationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = ChatConfig::default();
        config.input.max_chars = 0;
        let result = ChatEngine::new(
            config,
            ChatBackends {
                store: Arc::new(MemoryDocumentStore::new()),
                completion: Arc::new(MockCompletionService::echo()),
            },
        );
        assert!(matches!(result, Err(ChatError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_from_config_with_memory_store() {
        let mut config = ChatConfig::default();
        config.store.backend = StoreBackend::Memory;
        let engine = ChatEngine::from_config(config).await.unwrap();
        engine.start().await.unwrap();
        assert!(engine.conversations().is_empty());

        engine.shutdown();
        assert_eq!(engine.status(), SyncStatus::default());
    }
}
