//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::chat::ChatEngine;

/// Shared application state.
pub struct AppState {
    /// Chat engine behind every route.
    pub engine: Arc<ChatEngine>,
    /// Completion model reported by the health endpoint.
    pub model_name: String,
}

impl AppState {
    /// Create a new application state around a started engine.
    #[must_use]
    pub fn new(engine: Arc<ChatEngine>) -> Arc<Self> {
        let model_name = engine.config().completion.model.clone();
        Arc::new(Self { engine, model_name })
    }
}
