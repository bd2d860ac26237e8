//! Message model for conversation documents.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::chat::core::ids::{ConversationId, MessageId};

/// Author of a message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// Text typed by the user.
    User,
    /// Reply produced by the assistant (or a fallback in its place).
    Assistant,
}

impl MessageRole {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(value.to_string()),
        }
    }
}

/// A persisted message.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Store-assigned identifier.
    pub id: MessageId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Author of the message.
    pub role: MessageRole,
    /// Text content.
    pub content: String,
    /// Client clock at the time the message was written.
    pub sent_at: DateTime<Utc>,
    /// Server-assigned timestamp; defines ordering inside a conversation.
    pub created_at: DateTime<Utc>,
}

/// A message that has not been written to the store yet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewMessage {
    /// Author of the message.
    pub role: MessageRole,
    /// Text content.
    pub content: String,
    /// Client clock at the time the message was built, at microsecond
    /// resolution so it survives every backend unchanged.
    pub sent_at: DateTime<Utc>,
}

fn client_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

impl NewMessage {
    /// Build a user message stamped with the client clock.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            sent_at: client_now(),
        }
    }

    /// Build an assistant message stamped with the client clock.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            sent_at: client_now(),
        }
    }

    /// Attach store-assigned fields.
    #[must_use]
    pub fn into_message(
        self,
        id: MessageId,
        conversation_id: ConversationId,
        created_at: DateTime<Utc>,
    ) -> Message {
        Message {
            id,
            conversation_id,
            role: self.role,
            content: self.content,
            sent_at: self.sent_at.trunc_subsecs(6),
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_storage_form() {
        for role in [MessageRole::User, MessageRole::Assistant] {
            assert_eq!(MessageRole::from_str(role.as_str()), Ok(role));
        }
        assert!(MessageRole::from_str("system").is_err());
    }

    #[test]
    fn test_sent_at_has_microsecond_resolution() {
        let draft = NewMessage::user("claim");
        assert_eq!(draft.sent_at.timestamp_subsec_nanos() % 1_000, 0);

        let precise = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        let message = NewMessage {
            sent_at: precise,
            ..NewMessage::assistant("reply")
        }
        .into_message(MessageId::generate(), ConversationId::generate(), precise);
        assert_eq!(message.sent_at.timestamp_subsec_nanos(), 123_456_000);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&MessageRole::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }
}
