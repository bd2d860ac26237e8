//! Live snapshot subscriptions.
//!
//! A [`Subscription`] is a lazy stream of complete, ordered snapshots of one
//! collection. The first item is the collection as it was when the
//! subscription was opened. An `Err` item is terminal: the store closes the
//! subscription right after sending it.
//!
//! Dropping the subscription (or its [`SubscriptionHandle`] after
//! [`Subscription::into_parts`]) unregisters it from the store immediately.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::chat::core::errors::ChatResult;

/// One item delivered by a subscription.
pub type SnapshotResult<T> = ChatResult<Vec<T>>;

/// Receiving half of a subscription.
pub type SnapshotReceiver<T> = mpsc::UnboundedReceiver<SnapshotResult<T>>;

/// Unsubscribe handle. Unregisters from the store on drop.
pub struct SubscriptionHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionHandle {
    /// Wrap the store-side cancellation hook.
    #[must_use]
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Unregister now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// A live sequence of snapshots of one collection.
pub struct Subscription<T> {
    receiver: SnapshotReceiver<T>,
    handle: SubscriptionHandle,
}

impl<T> Subscription<T> {
    /// Build a subscription from its receiver and unsubscribe handle.
    #[must_use]
    pub const fn new(receiver: SnapshotReceiver<T>, handle: SubscriptionHandle) -> Self {
        Self { receiver, handle }
    }

    /// Wait for the next snapshot. `None` once the store has closed the subscription.
    pub async fn next_snapshot(&mut self) -> Option<SnapshotResult<T>> {
        self.receiver.recv().await
    }

    /// Unregister from the store.
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Split into the snapshot receiver and the unsubscribe handle.
    ///
    /// The receiver keeps yielding buffered snapshots after the handle is
    /// dropped, then ends.
    #[must_use]
    pub fn into_parts(self) -> (SnapshotReceiver<T>, SubscriptionHandle) {
        (self.receiver, self.handle)
    }
}

impl<T> Stream for Subscription<T> {
    type Item = SnapshotResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}
