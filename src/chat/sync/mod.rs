//! Live views over the document store.

pub mod conversation_sync;
pub mod subscription;

pub use conversation_sync::{ConversationSync, MessageView, SubscriptionState, SyncStatus};
pub use subscription::{SnapshotReceiver, SnapshotResult, Subscription, SubscriptionHandle};
