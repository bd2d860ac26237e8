//! Send pipeline: user text in, user message and assistant reply persisted.
//!
//! One send walks Idle, Resolving (create and adopt a conversation when none
//! is selected), Persisting the user message, Awaiting the completion and
//! Persisting the reply, then back to Idle. Completion failures become a
//! fallback reply; store failures end the send with an error. The busy flag
//! is held for the whole walk and released on every exit path.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::chat::completion::client::{CompletionError, CompletionRequest, CompletionService};
use crate::chat::completion::fallback::FallbackReplies;
use crate::chat::core::config::ChatConfig;
use crate::chat::core::conversation::{Conversation, NewConversation};
use crate::chat::core::errors::ChatResult;
use crate::chat::core::ids::ConversationId;
use crate::chat::core::message::{Message, NewMessage};
use crate::chat::pipeline::busy::BusyFlag;
use crate::chat::pipeline::input::{InputBuffer, clamp};
use crate::chat::store::document_store::DocumentStore;
use crate::chat::sync::conversation_sync::ConversationSync;

/// Why a send did not start.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Input was empty after trimming.
    EmptyInput,
    /// Another send is in flight.
    Busy,
}

/// Where the assistant reply came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    /// Text produced by the completion service.
    Completion,
    /// Fixed reply standing in for a failed completion.
    Fallback,
}

/// Both persisted turns of a completed send.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Exchange {
    /// Conversation both messages were written to.
    pub conversation_id: ConversationId,
    /// Whether the conversation was created by this send.
    pub created_conversation: bool,
    /// The persisted user message.
    pub user_message: Message,
    /// The persisted assistant message.
    pub reply: Message,
    /// Origin of the reply text.
    pub reply_source: ReplySource,
}

/// Result of a send request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing happened.
    Rejected(RejectReason),
    /// Both messages were persisted.
    Completed(Exchange),
}

#[derive(Debug)]
struct SendSettings {
    default_title: String,
    system_prompt: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
    replies: FallbackReplies,
}

impl SendSettings {
    fn from_config(config: &ChatConfig) -> Self {
        Self {
            default_title: config.input.default_title.clone(),
            system_prompt: config.completion.effective_system_prompt().to_string(),
            max_tokens: config.completion.max_tokens,
            temperature: config.completion.temperature,
            timeout: config.completion.timeout(),
            replies: config.replies.clone(),
        }
    }
}

/// Drives sends for one chat view.
pub struct SendPipeline {
    store: Arc<dyn DocumentStore>,
    completion: Arc<dyn CompletionService>,
    sync: Arc<ConversationSync>,
    input: InputBuffer,
    busy: BusyFlag,
    settings: SendSettings,
}

impl SendPipeline {
    /// Build a pipeline over the given store, completion service and view.
    #[must_use]
    pub fn new(
        config: &ChatConfig,
        store: Arc<dyn DocumentStore>,
        completion: Arc<dyn CompletionService>,
        sync: Arc<ConversationSync>,
    ) -> Self {
        Self {
            store,
            completion,
            sync,
            input: InputBuffer::new(config.input.max_chars),
            busy: BusyFlag::new(),
            settings: SendSettings::from_config(config),
        }
    }

    /// The input buffer `submit` reads from.
    #[must_use]
    pub const fn input(&self) -> &InputBuffer {
        &self.input
    }

    /// Whether a send is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.is_busy()
    }

    /// Send the input buffer. The buffer is cleared once the user message
    /// is persisted.
    ///
    /// # Errors
    /// Returns an error if a store write fails.
    pub async fn submit(&self) -> ChatResult<SendOutcome> {
        let text = self.input.contents();
        self.send(&text, true).await
    }

    /// Send `text` directly, truncated to the input cap. The input buffer is
    /// left untouched.
    ///
    /// # Errors
    /// Returns an error if a store write fails.
    pub async fn send_text(&self, text: &str) -> ChatResult<SendOutcome> {
        self.send(clamp(text, self.input.max_chars()), false).await
    }

    /// Create a conversation and select it. Returns `None` while a send is in
    /// flight.
    ///
    /// # Errors
    /// Returns an error if the store write or the new subscription fails.
    pub async fn start_new_conversation(&self) -> ChatResult<Option<Conversation>> {
        let Some(_busy) = self.busy.try_acquire() else {
            debug!("New conversation ignored while busy");
            return Ok(None);
        };
        let conversation = self
            .store
            .create_conversation(NewConversation::titled(self.settings.default_title.clone()))
            .await?;
        self.sync.select_conversation(Some(conversation.id)).await?;
        info!(conversation_id = %conversation.id, "Started new conversation");
        Ok(Some(conversation))
    }

    /// Drop the selection; the next send starts a new conversation.
    pub fn clear_selection(&self) {
        self.sync.clear_selection();
    }

    #[instrument(skip(self, text), fields(chars = text.chars().count()))]
    async fn send(&self, text: &str, from_buffer: bool) -> ChatResult<SendOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SendOutcome::Rejected(RejectReason::EmptyInput));
        }
        let Some(_busy) = self.busy.try_acquire() else {
            debug!("Send rejected while another is in flight");
            return Ok(SendOutcome::Rejected(RejectReason::Busy));
        };

        let (conversation_id, created_conversation) = self.resolve_conversation().await?;

        let user_message = self
            .store
            .append_message(conversation_id, NewMessage::user(text))
            .await?;
        if from_buffer {
            self.input.clear();
        }

        let (reply_text, reply_source) = self.await_reply(text).await;
        let (reply, reply_source) = self
            .persist_reply(conversation_id, reply_text, reply_source)
            .await?;

        info!(
            %conversation_id,
            created_conversation,
            ?reply_source,
            reply_chars = reply.content.chars().count(),
            "Send completed"
        );
        Ok(SendOutcome::Completed(Exchange {
            conversation_id,
            created_conversation,
            user_message,
            reply,
            reply_source,
        }))
    }

    async fn resolve_conversation(&self) -> ChatResult<(ConversationId, bool)> {
        if let Some(conversation_id) = self.sync.selected() {
            return Ok((conversation_id, false));
        }
        let conversation = self
            .store
            .create_conversation(NewConversation::titled(self.settings.default_title.clone()))
            .await?;
        self.sync.select_conversation(Some(conversation.id)).await?;
        debug!(conversation_id = %conversation.id, "Created conversation for first send");
        Ok((conversation.id, true))
    }

    /// Write the reply. A failed write is retried once with the `unexpected`
    /// fallback; a second failure ends the send with the first error.
    async fn persist_reply(
        &self,
        conversation_id: ConversationId,
        reply_text: String,
        reply_source: ReplySource,
    ) -> ChatResult<(Message, ReplySource)> {
        let err = match self
            .store
            .append_message(conversation_id, NewMessage::assistant(reply_text))
            .await
        {
            Ok(reply) => return Ok((reply, reply_source)),
            Err(err) => err,
        };
        warn!(%conversation_id, error = %err, "Reply write failed; writing fallback reply");
        match self
            .store
            .append_message(
                conversation_id,
                NewMessage::assistant(self.settings.replies.unexpected.clone()),
            )
            .await
        {
            Ok(reply) => Ok((reply, ReplySource::Fallback)),
            Err(retry) => {
                warn!(%conversation_id, error = %retry, "Fallback reply write failed");
                Err(err)
            }
        }
    }

    async fn await_reply(&self, text: &str) -> (String, ReplySource) {
        let request = CompletionRequest::new(
            self.settings.system_prompt.clone(),
            text,
            self.settings.max_tokens,
            self.settings.temperature,
        );
        let result =
            match tokio::time::timeout(self.settings.timeout, self.completion.complete(request))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(CompletionError::Timeout(self.settings.timeout)),
            };

        match result {
            Ok(reply) => (reply, ReplySource::Completion),
            Err(err) => {
                warn!(error = %err, "Completion failed; using fallback reply");
                (
                    self.settings.replies.for_error(&err).to_string(),
                    ReplySource::Fallback,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;
    use tokio::sync::Semaphore;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::chat::completion::mock::MockCompletionService;
    use crate::chat::completion::openai_client::OpenAiCompletionClient;
    use crate::chat::core::config::CompletionConfig;
    use crate::chat::core::message::MessageRole;
    use crate::chat::core::errors::ChatError;
    use crate::chat::store::document_store::StoreFuture;
    use crate::chat::store::memory_store::MemoryDocumentStore;
    use crate::chat::sync::subscription::Subscription;

    /// Memory store that refuses the first `failures` assistant writes.
    struct RefusingReplies {
        inner: MemoryDocumentStore,
        failures: AtomicUsize,
    }

    impl RefusingReplies {
        fn new(failures: usize) -> Self {
            Self {
                inner: MemoryDocumentStore::new(),
                failures: AtomicUsize::new(failures),
            }
        }
    }

    impl DocumentStore for RefusingReplies {
        fn create_conversation(
            &self,
            draft: NewConversation,
        ) -> StoreFuture<'_, ChatResult<Conversation>> {
            self.inner.create_conversation(draft)
        }

        fn append_message(
            &self,
            conversation_id: ConversationId,
            draft: NewMessage,
        ) -> StoreFuture<'_, ChatResult<Message>> {
            let refuse = draft.role == MessageRole::Assistant
                && self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                    .is_ok();
            if refuse {
                return Box::pin(async {
                    Err::<Message, _>(ChatError::Io(std::io::Error::other("write refused")))
                });
            }
            self.inner.append_message(conversation_id, draft)
        }

        fn list_conversations(&self) -> StoreFuture<'_, ChatResult<Vec<Conversation>>> {
            self.inner.list_conversations()
        }

        fn list_messages(
            &self,
            conversation_id: ConversationId,
        ) -> StoreFuture<'_, ChatResult<Vec<Message>>> {
            self.inner.list_messages(conversation_id)
        }

        fn subscribe_conversations(
            &self,
        ) -> StoreFuture<'_, ChatResult<Subscription<Conversation>>> {
            self.inner.subscribe_conversations()
        }

        fn subscribe_messages(
            &self,
            conversation_id: ConversationId,
        ) -> StoreFuture<'_, ChatResult<Subscription<Message>>> {
            self.inner.subscribe_messages(conversation_id)
        }

        fn delete_conversation(
            &self,
            conversation_id: ConversationId,
        ) -> StoreFuture<'_, ChatResult<()>> {
            self.inner.delete_conversation(conversation_id)
        }
    }

    fn pipeline_over(store: &Arc<RefusingReplies>) -> SendPipeline {
        let dyn_store: Arc<dyn DocumentStore> = store.clone();
        let sync = Arc::new(ConversationSync::new(Arc::clone(&dyn_store)));
        SendPipeline::new(
            &ChatConfig::default(),
            dyn_store,
            Arc::new(MockCompletionService::echo()),
            sync,
        )
    }

    struct Harness {
        store: Arc<MemoryDocumentStore>,
        sync: Arc<ConversationSync>,
        pipeline: Arc<SendPipeline>,
    }

    fn harness_with(config: &ChatConfig, completion: Arc<dyn CompletionService>) -> Harness {
        let store = Arc::new(MemoryDocumentStore::new());
        let dyn_store: Arc<dyn DocumentStore> = store.clone();
        let sync = Arc::new(ConversationSync::new(Arc::clone(&dyn_store)));
        let pipeline = Arc::new(SendPipeline::new(
            config,
            dyn_store,
            completion,
            Arc::clone(&sync),
        ));
        Harness {
            store,
            sync,
            pipeline,
        }
    }

    fn harness(completion: Arc<dyn CompletionService>) -> Harness {
        harness_with(&ChatConfig::default(), completion)
    }

    fn completed(outcome: SendOutcome) -> Exchange {
        match outcome {
            SendOutcome::Completed(exchange) => exchange,
            SendOutcome::Rejected(reason) => panic!("send rejected: {reason:?}"),
        }
    }

    #[tokio::test]
    async fn test_first_send_creates_exactly_one_conversation() {
        let mock = Arc::new(MockCompletionService::replying("analysis"));
        let h = harness(mock.clone());
        h.pipeline.input().set("test");

        let exchange = completed(h.pipeline.submit().await.unwrap());

        let conversations = h.store.list_conversations().await.unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].title, "محادثة جديدة");
        assert!(exchange.created_conversation);
        assert_eq!(exchange.conversation_id, conversations[0].id);
        assert_eq!(h.sync.selected(), Some(conversations[0].id));

        let messages = h.store.list_messages(exchange.conversation_id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].content, "test");
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].content, "analysis");
        assert!(messages[0].created_at < messages[1].created_at);

        assert!(h.pipeline.input().contents().is_empty());
        assert!(!h.pipeline.is_busy());
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_blank_input_is_rejected_without_side_effects() {
        let mock = Arc::new(MockCompletionService::echo());
        let h = harness(mock.clone());

        for text in ["", "   ", "\n\t "] {
            assert_eq!(
                h.pipeline.send_text(text).await.unwrap(),
                SendOutcome::Rejected(RejectReason::EmptyInput)
            );
        }
        assert!(h.store.list_conversations().await.unwrap().is_empty());
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_user_text_is_trimmed_before_persisting() {
        let mock = Arc::new(MockCompletionService::echo());
        let h = harness(mock.clone());

        let exchange = completed(h.pipeline.send_text("  rumour  \n").await.unwrap());
        assert_eq!(exchange.user_message.content, "rumour");
        assert_eq!(mock.requests()[0].user_message, "rumour");
    }

    #[tokio::test]
    async fn test_second_send_is_rejected_while_busy() {
        let gate = Arc::new(Semaphore::new(0));
        let mock = Arc::new(MockCompletionService::replying("slow").with_gate(Arc::clone(&gate)));
        let h = harness(mock.clone());

        let first = {
            let pipeline = Arc::clone(&h.pipeline);
            tokio::spawn(async move { pipeline.send_text("first").await })
        };
        while mock.calls() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(h.pipeline.is_busy());
        assert_eq!(
            h.pipeline.send_text("second").await.unwrap(),
            SendOutcome::Rejected(RejectReason::Busy)
        );
        assert_eq!(h.pipeline.start_new_conversation().await.unwrap(), None);

        gate.add_permits(1);
        let exchange = completed(first.await.unwrap().unwrap());
        assert_eq!(exchange.reply.content, "slow");
        assert_eq!(mock.calls(), 1);
        assert_eq!(h.store.list_conversations().await.unwrap().len(), 1);
        assert!(!h.pipeline.is_busy());
    }

    #[tokio::test]
    async fn test_reply_lands_in_starting_conversation_after_navigation() {
        let gate = Arc::new(Semaphore::new(0));
        let mock = Arc::new(MockCompletionService::replying("late").with_gate(Arc::clone(&gate)));
        let h = harness(mock.clone());
        let other = h
            .store
            .create_conversation(NewConversation::titled("other"))
            .await
            .unwrap();

        let send = {
            let pipeline = Arc::clone(&h.pipeline);
            tokio::spawn(async move { pipeline.send_text("claim").await })
        };
        while mock.calls() == 0 {
            tokio::task::yield_now().await;
        }
        h.sync.select_conversation(Some(other.id)).await.unwrap();
        gate.add_permits(1);

        let exchange = completed(send.await.unwrap().unwrap());
        assert_ne!(exchange.conversation_id, other.id);
        assert_eq!(
            h.store
                .list_messages(exchange.conversation_id)
                .await
                .unwrap()
                .len(),
            2
        );
        assert!(h.store.list_messages(other.id).await.unwrap().is_empty());
        assert_eq!(h.sync.selected(), Some(other.id));
        assert!(h.sync.message_list().is_empty());
    }

    #[tokio::test]
    async fn test_failed_completion_persists_fallback() {
        let mock = Arc::new(MockCompletionService::failing(
            CompletionError::MissingCredential,
        ));
        let h = harness(mock);

        let exchange = completed(h.pipeline.send_text("claim").await.unwrap());
        assert_eq!(exchange.reply_source, ReplySource::Fallback);
        assert_eq!(
            exchange.reply.content,
            FallbackReplies::default().missing_credential
        );
        assert_eq!(exchange.reply.role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn test_http_500_yields_connection_fallback() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        let client = OpenAiCompletionClient::new(&CompletionConfig {
            base_url: format!("http://{addr}/v1"),
            api_key: Some("sk-test".to_string()),
            ..CompletionConfig::default()
        })
        .unwrap();
        let h = harness(Arc::new(client));

        let exchange = completed(h.pipeline.send_text("claim").await.unwrap());
        assert_eq!(exchange.reply_source, ReplySource::Fallback);
        assert_eq!(
            exchange.reply.content,
            FallbackReplies::default().connection_failed
        );
        let messages = h.store.list_messages(exchange.conversation_id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert!(!h.pipeline.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_completion_times_out_into_fallback() {
        let mock = Arc::new(MockCompletionService::replying("too late").with_delay(Duration::from_secs(600)));
        let h = harness(mock);

        let exchange = completed(h.pipeline.send_text("claim").await.unwrap());
        assert_eq!(exchange.reply_source, ReplySource::Fallback);
        assert_eq!(
            exchange.reply.content,
            FallbackReplies::default().connection_failed
        );
    }

    #[tokio::test]
    async fn test_sends_append_in_order_to_selected_conversation() {
        let h = harness(Arc::new(MockCompletionService::echo()));
        let conversation = h.pipeline.start_new_conversation().await.unwrap().unwrap();

        let first = completed(h.pipeline.send_text("one").await.unwrap());
        let second = completed(h.pipeline.send_text("two").await.unwrap());
        assert!(!first.created_conversation);
        assert_eq!(second.conversation_id, conversation.id);

        let contents: Vec<String> = h
            .store
            .list_messages(conversation.id)
            .await
            .unwrap()
            .into_iter()
            .map(|message| message.content)
            .collect();
        assert_eq!(contents, vec!["one", "echo: one", "two", "echo: two"]);
        assert_eq!(h.store.list_conversations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_selection_starts_fresh_conversation_on_next_send() {
        let h = harness(Arc::new(MockCompletionService::echo()));
        let first = completed(h.pipeline.send_text("one").await.unwrap());

        h.pipeline.clear_selection();
        assert!(h.sync.message_list().is_empty());

        let second = completed(h.pipeline.send_text("two").await.unwrap());
        assert!(second.created_conversation);
        assert_ne!(first.conversation_id, second.conversation_id);
        assert_eq!(h.store.list_conversations().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_store_failure_propagates_and_releases_busy() {
        let h = harness(Arc::new(MockCompletionService::echo()));
        let conversation = h.pipeline.start_new_conversation().await.unwrap().unwrap();
        h.store.delete_conversation(conversation.id).await.unwrap();
        h.pipeline.input().set("orphan");

        assert!(h.pipeline.submit().await.is_err());
        assert!(!h.pipeline.is_busy());
        assert_eq!(h.pipeline.input().contents(), "orphan");
    }

    #[tokio::test]
    async fn test_failed_reply_write_falls_back_to_unexpected_reply() {
        let store = Arc::new(RefusingReplies::new(1));
        let pipeline = pipeline_over(&store);

        let exchange = completed(pipeline.send_text("claim").await.unwrap());
        assert_eq!(exchange.reply_source, ReplySource::Fallback);
        assert_eq!(exchange.reply.content, FallbackReplies::default().unexpected);

        let messages = store.list_messages(exchange.conversation_id).await.unwrap();
        assert_eq!(messages, vec![exchange.user_message, exchange.reply]);
        assert!(!pipeline.is_busy());
    }

    #[tokio::test]
    async fn test_second_reply_write_failure_propagates() {
        let store = Arc::new(RefusingReplies::new(2));
        let pipeline = pipeline_over(&store);

        let result = pipeline.send_text("claim").await;
        assert!(matches!(result, Err(ChatError::Io(_))));
        assert!(!pipeline.is_busy());

        let conversations = store.list_conversations().await.unwrap();
        let messages = store.list_messages(conversations[0].id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::User);
    }

    #[tokio::test]
    async fn test_send_text_is_capped() {
        let mut config = ChatConfig::default();
        config.input.max_chars = 10;
        let mock = Arc::new(MockCompletionService::echo());
        let h = harness_with(&config, mock);

        let exchange = completed(h.pipeline.send_text(&"x".repeat(25)).await.unwrap());
        assert_eq!(exchange.user_message.content.chars().count(), 10);
    }
}
