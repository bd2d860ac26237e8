//! Subscriber bookkeeping shared by the store backends.
//!
//! Callers must publish while still holding whatever lock serializes their
//! writes, so that subscribers observe snapshots in write order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::chat::core::errors::ChatError;
use crate::chat::sync::subscription::{SnapshotResult, Subscription, SubscriptionHandle};

struct Subscriber<K, T> {
    key: K,
    sender: mpsc::UnboundedSender<SnapshotResult<T>>,
}

struct RegistryState<K, T> {
    next_id: u64,
    subscribers: HashMap<u64, Subscriber<K, T>>,
}

fn lock<S>(mutex: &Mutex<S>) -> MutexGuard<'_, S> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Live subscribers of one collection family, keyed by collection path.
pub struct SubscriberRegistry<K, T> {
    state: Arc<Mutex<RegistryState<K, T>>>,
}

impl<K, T> Default for SubscriberRegistry<K, T>
where
    K: Eq + Send + 'static,
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> SubscriberRegistry<K, T>
where
    K: Eq + Send + 'static,
    T: Clone + Send + 'static,
{
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState {
                next_id: 0,
                subscribers: HashMap::new(),
            })),
        }
    }

    /// Register a subscriber for `key`; `initial` is delivered first.
    pub fn subscribe(&self, key: K, initial: Vec<T>) -> Subscription<T> {
        let (sender, receiver) = mpsc::unbounded_channel();
        // The receiver is alive, so this cannot fail.
        let _ = sender.send(Ok(initial));

        let id = {
            let mut state = lock(&self.state);
            let id = state.next_id;
            state.next_id += 1;
            state.subscribers.insert(id, Subscriber { key, sender });
            id
        };

        let weak = Arc::downgrade(&self.state);
        let handle = SubscriptionHandle::new(move || {
            if let Some(state) = weak.upgrade() {
                lock(&state).subscribers.remove(&id);
            }
        });

        Subscription::new(receiver, handle)
    }

    /// Deliver a complete snapshot to every subscriber of `key`.
    ///
    /// Subscribers whose receiver is gone are dropped.
    pub fn publish(&self, key: &K, snapshot: &[T]) {
        lock(&self.state).subscribers.retain(|_, subscriber| {
            subscriber.key != *key || subscriber.sender.send(Ok(snapshot.to_vec())).is_ok()
        });
    }

    /// Send a terminal error to every subscriber of `key` and close them.
    pub fn fail(&self, key: &K, message: &str) {
        lock(&self.state).subscribers.retain(|_, subscriber| {
            if subscriber.key != *key {
                return true;
            }
            let _ = subscriber
                .sender
                .send(Err(ChatError::Subscription(message.to_string())));
            false
        });
    }

    /// Number of live subscribers for `key`.
    #[must_use]
    pub fn subscriber_count(&self, key: &K) -> usize {
        lock(&self.state)
            .subscribers
            .values()
            .filter(|subscriber| subscriber.key == *key && !subscriber.sender.is_closed())
            .count()
    }
}
