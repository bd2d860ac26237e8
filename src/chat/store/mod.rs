//! Document store backends and their live-snapshot plumbing.

pub mod clock;
pub mod document_store;
pub mod memory_store;
pub mod registry;
pub mod sqlite_store;

pub use clock::ServerClock;
pub use document_store::{DocumentStore, StoreFuture};
pub use memory_store::MemoryDocumentStore;
pub use registry::SubscriberRegistry;
pub use sqlite_store::SqliteDocumentStore;
