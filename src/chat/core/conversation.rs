//! Conversation documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::core::ids::ConversationId;

/// A persisted conversation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Store-assigned identifier.
    pub id: ConversationId,
    /// Display title.
    pub title: String,
    /// Server-assigned creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A conversation that has not been written to the store yet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewConversation {
    /// Display title.
    pub title: String,
}

impl NewConversation {
    /// Build a draft with the given title.
    #[must_use]
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }

    /// Attach store-assigned fields.
    #[must_use]
    pub fn into_conversation(self, id: ConversationId, created_at: DateTime<Utc>) -> Conversation {
        Conversation {
            id,
            title: self.title,
            created_at,
        }
    }
}
