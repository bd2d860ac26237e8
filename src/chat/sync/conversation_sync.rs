//! Live conversation list and message view.
//!
//! `ConversationSync` owns at most one conversation-list subscription and at
//! most one message subscription. Each store snapshot replaces the matching
//! local view wholesale. Views are published through `tokio::sync::watch`, so
//! identical snapshots never wake watchers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chat::core::conversation::Conversation;
use crate::chat::core::errors::ChatResult;
use crate::chat::core::ids::ConversationId;
use crate::chat::core::message::Message;
use crate::chat::store::document_store::DocumentStore;
use crate::chat::sync::subscription::{SnapshotReceiver, Subscription, SubscriptionHandle};

/// State of one standing subscription.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum SubscriptionState {
    /// No subscription is open.
    #[default]
    Inactive,
    /// Snapshots are being applied.
    Live,
    /// The store reported an error; the subscription is closed.
    Failed(String),
}

/// Subscription health of both views.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    /// Conversation list subscription.
    pub conversations: SubscriptionState,
    /// Message subscription of the selected conversation.
    pub messages: SubscriptionState,
}

/// Messages of the selected conversation.
#[derive(Clone, Debug, Default)]
pub struct MessageView {
    /// Selected conversation, if any.
    pub conversation_id: Option<ConversationId>,
    /// Messages, oldest first. Empty when nothing is selected.
    pub messages: Vec<Message>,
    generation: u64,
}

impl MessageView {
    fn apply(&mut self, generation: u64, snapshot: Vec<Message>) -> bool {
        if self.generation != generation || self.messages == snapshot {
            return false;
        }
        self.messages = snapshot;
        true
    }

    fn reselect(&mut self, conversation_id: Option<ConversationId>) -> u64 {
        self.generation += 1;
        self.conversation_id = conversation_id;
        self.messages.clear();
        self.generation
    }
}

fn replace_if_changed<T: PartialEq>(current: &mut Vec<T>, snapshot: Vec<T>) -> bool {
    if *current == snapshot {
        return false;
    }
    *current = snapshot;
    true
}

fn lock<S>(mutex: &Mutex<S>) -> MutexGuard<'_, S> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A subscription handle together with the task applying its snapshots.
struct ActiveSubscription {
    _handle: SubscriptionHandle,
    task: JoinHandle<()>,
}

impl Drop for ActiveSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Keeps local views consistent with the document store.
pub struct ConversationSync {
    store: Arc<dyn DocumentStore>,
    conversations: Arc<watch::Sender<Vec<Conversation>>>,
    messages: Arc<watch::Sender<MessageView>>,
    status: Arc<watch::Sender<SyncStatus>>,
    conversation_slot: Mutex<Option<ActiveSubscription>>,
    message_slot: Mutex<Option<ActiveSubscription>>,
}

impl ConversationSync {
    /// Create a sync layer with empty views and no subscriptions.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            conversations: Arc::new(watch::Sender::new(Vec::new())),
            messages: Arc::new(watch::Sender::new(MessageView::default())),
            status: Arc::new(watch::Sender::new(SyncStatus::default())),
            conversation_slot: Mutex::new(None),
            message_slot: Mutex::new(None),
        }
    }

    /// Open the standing conversation-list subscription, replacing any
    /// previous one. Returns once the current snapshot has been applied.
    ///
    /// # Errors
    /// Returns an error if the subscription cannot be opened.
    pub async fn subscribe_conversations(&self) -> ChatResult<()> {
        drop(lock(&self.conversation_slot).take());

        let subscription = match self.store.subscribe_conversations().await {
            Ok(subscription) => subscription,
            Err(err) => {
                warn!(error = %err, "Conversation subscription could not be opened");
                self.status.send_modify(|status| {
                    status.conversations = SubscriptionState::Failed(err.to_string());
                });
                return Err(err);
            }
        };
        let (mut receiver, handle) = subscription.into_parts();
        if let Some(Ok(initial)) = receiver.recv().await {
            self.conversations
                .send_if_modified(|current| replace_if_changed(current, initial));
        }

        self.status
            .send_modify(|status| status.conversations = SubscriptionState::Live);
        let task = tokio::spawn(forward_conversations(
            receiver,
            Arc::clone(&self.conversations),
            Arc::clone(&self.status),
        ));
        *lock(&self.conversation_slot) = Some(ActiveSubscription {
            _handle: handle,
            task,
        });
        info!("Conversation subscription opened");
        Ok(())
    }

    /// Make `conversation_id` the selected conversation and follow its
    /// messages. `None` clears the selection.
    ///
    /// The previous message subscription is torn down before the new one is
    /// opened. Returns once the current snapshot has been applied.
    ///
    /// # Errors
    /// Returns an error if the subscription cannot be opened; the selection is
    /// cleared in that case.
    pub async fn select_conversation(
        &self,
        conversation_id: Option<ConversationId>,
    ) -> ChatResult<()> {
        let generation = {
            let mut slot = lock(&self.message_slot);
            drop(slot.take());
            let mut generation = 0;
            self.messages
                .send_modify(|view| generation = view.reselect(conversation_id));
            generation
        };

        let Some(conversation_id) = conversation_id else {
            self.status
                .send_modify(|status| status.messages = SubscriptionState::Inactive);
            debug!("Selection cleared");
            return Ok(());
        };

        let subscription = match self.store.subscribe_messages(conversation_id).await {
            Ok(subscription) => subscription,
            Err(err) => {
                warn!(%conversation_id, error = %err, "Message subscription could not be opened");
                let _slot = lock(&self.message_slot);
                if self.messages.borrow().generation == generation {
                    self.messages.send_modify(|view| {
                        view.reselect(None);
                    });
                    self.status.send_modify(|status| {
                        status.messages = SubscriptionState::Failed(err.to_string());
                    });
                }
                return Err(err);
            }
        };
        self.adopt(conversation_id, generation, subscription).await;
        Ok(())
    }

    async fn adopt(
        &self,
        conversation_id: ConversationId,
        generation: u64,
        subscription: Subscription<Message>,
    ) {
        let (mut receiver, handle) = subscription.into_parts();
        if let Some(Ok(initial)) = receiver.recv().await {
            self.messages
                .send_if_modified(|view| view.apply(generation, initial));
        }

        let mut slot = lock(&self.message_slot);
        if self.messages.borrow().generation != generation {
            debug!(%conversation_id, "Selection superseded before subscription was adopted");
            return;
        }
        self.status
            .send_modify(|status| status.messages = SubscriptionState::Live);
        let task = tokio::spawn(forward_messages(
            receiver,
            Arc::clone(&self.messages),
            Arc::clone(&self.status),
            conversation_id,
            generation,
        ));
        *slot = Some(ActiveSubscription {
            _handle: handle,
            task,
        });
        debug!(%conversation_id, "Message subscription opened");
    }

    /// Alias for `select_conversation(Some(conversation_id))`.
    ///
    /// # Errors
    /// Returns an error if the subscription cannot be opened.
    pub async fn subscribe_messages(&self, conversation_id: ConversationId) -> ChatResult<()> {
        self.select_conversation(Some(conversation_id)).await
    }

    /// Drop the selection and its message subscription. Nothing is deleted
    /// from the store.
    pub fn clear_selection(&self) {
        let mut slot = lock(&self.message_slot);
        drop(slot.take());
        self.messages.send_modify(|view| {
            view.reselect(None);
        });
        self.status
            .send_modify(|status| status.messages = SubscriptionState::Inactive);
    }

    /// Currently selected conversation.
    #[must_use]
    pub fn selected(&self) -> Option<ConversationId> {
        self.messages.borrow().conversation_id
    }

    /// Current conversation list, newest first.
    #[must_use]
    pub fn conversation_list(&self) -> Vec<Conversation> {
        self.conversations.borrow().clone()
    }

    /// Current message list of the selected conversation.
    #[must_use]
    pub fn message_list(&self) -> Vec<Message> {
        self.messages.borrow().messages.clone()
    }

    /// Current message view.
    #[must_use]
    pub fn message_view(&self) -> MessageView {
        self.messages.borrow().clone()
    }

    /// Current subscription health.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Watch the conversation list.
    #[must_use]
    pub fn watch_conversations(&self) -> watch::Receiver<Vec<Conversation>> {
        self.conversations.subscribe()
    }

    /// Watch the message view.
    #[must_use]
    pub fn watch_messages(&self) -> watch::Receiver<MessageView> {
        self.messages.subscribe()
    }

    /// Watch subscription health.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Tear down every subscription.
    pub fn shutdown(&self) {
        drop(lock(&self.conversation_slot).take());
        self.clear_selection();
        self.status
            .send_modify(|status| status.conversations = SubscriptionState::Inactive);
    }
}

impl Drop for ConversationSync {
    fn drop(&mut self) {
        drop(lock(&self.conversation_slot).take());
        drop(lock(&self.message_slot).take());
    }
}

async fn forward_conversations(
    mut receiver: SnapshotReceiver<Conversation>,
    conversations: Arc<watch::Sender<Vec<Conversation>>>,
    status: Arc<watch::Sender<SyncStatus>>,
) {
    while let Some(item) = receiver.recv().await {
        match item {
            Ok(snapshot) => {
                conversations.send_if_modified(|current| replace_if_changed(current, snapshot));
            }
            Err(err) => {
                warn!(error = %err, "Conversation subscription failed");
                status.send_modify(|status| {
                    status.conversations = SubscriptionState::Failed(err.to_string());
                });
                return;
            }
        }
    }
}

async fn forward_messages(
    mut receiver: SnapshotReceiver<Message>,
    messages: Arc<watch::Sender<MessageView>>,
    status: Arc<watch::Sender<SyncStatus>>,
    conversation_id: ConversationId,
    generation: u64,
) {
    while let Some(item) = receiver.recv().await {
        if messages.borrow().generation != generation {
            return;
        }
        match item {
            Ok(snapshot) => {
                messages.send_if_modified(|view| view.apply(generation, snapshot));
            }
            Err(err) => {
                warn!(%conversation_id, error = %err, "Message subscription failed");
                status.send_modify(|status| {
                    status.messages = SubscriptionState::Failed(err.to_string());
                });
                return;
            }
        }
    }
}
