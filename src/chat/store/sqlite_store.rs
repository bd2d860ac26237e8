//! `SQLite` document store.
//!
//! Conversations and messages live in two tables linked by a cascading
//! foreign key. Timestamps are stored as microseconds since the epoch.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tokio::sync::Mutex;
use tokio_rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::chat::core::config::StoreConfig;
use crate::chat::core::conversation::{Conversation, NewConversation};
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::{ConversationId, MessageId};
use crate::chat::core::message::{Message, MessageRole, NewMessage};
use crate::chat::store::clock::ServerClock;
use crate::chat::store::document_store::{DocumentStore, StoreFuture};
use crate::chat::store::registry::SubscriberRegistry;
use crate::chat::sync::subscription::Subscription;

type ConversationRow = (ConversationId, String, i64);

struct MessageRow {
    id: MessageId,
    conversation_id: ConversationId,
    role: String,
    content: String,
    sent_at_us: i64,
    created_at_us: i64,
}

fn timestamp(micros: i64) -> ChatResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| ChatError::InvalidRecord(format!("invalid timestamp: {micros}")))
}

fn decode_conversation((id, title, created_at_us): ConversationRow) -> ChatResult<Conversation> {
    Ok(Conversation {
        id,
        title,
        created_at: timestamp(created_at_us)?,
    })
}

impl MessageRow {
    fn decode(self) -> ChatResult<Message> {
        let role = MessageRole::from_str(&self.role)
            .map_err(|err| ChatError::InvalidRecord(format!("invalid role: {err}")))?;
        Ok(Message {
            id: self.id,
            conversation_id: self.conversation_id,
            role,
            content: self.content,
            sent_at: timestamp(self.sent_at_us)?,
            created_at: timestamp(self.created_at_us)?,
        })
    }
}

fn select_conversations(
    conn: &rusqlite::Connection,
    table: &str,
) -> rusqlite::Result<Vec<ConversationRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, title, created_at_us FROM {table} ORDER BY created_at_us DESC"
    ))?;
    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect()
}

fn select_messages(
    conn: &rusqlite::Connection,
    table: &str,
    conversation_id: ConversationId,
) -> rusqlite::Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, conversation_id, role, content, sent_at_us, created_at_us
         FROM {table}
         WHERE conversation_id = ?1
         ORDER BY created_at_us ASC"
    ))?;
    stmt.query_map([conversation_id], |row| {
        Ok(MessageRow {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            role: row.get(2)?,
            content: row.get(3)?,
            sent_at_us: row.get(4)?,
            created_at_us: row.get(5)?,
        })
    })?
    .collect()
}

fn conversation_exists(
    conn: &rusqlite::Connection,
    table: &str,
    conversation_id: ConversationId,
) -> rusqlite::Result<bool> {
    conn.query_row(
        &format!("SELECT 1 FROM {table} WHERE id = ?1"),
        [conversation_id],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

/// `SQLite` implementation of [`DocumentStore`].
///
/// Writes are serialized by `write_lock`, which stays held until the fresh
/// snapshot has been published.
pub struct SqliteDocumentStore {
    conn: Connection,
    conversations_table: String,
    messages_table: String,
    clock: ServerClock,
    write_lock: Mutex<()>,
    conversation_subscribers: SubscriberRegistry<(), Conversation>,
    message_subscribers: SubscriberRegistry<ConversationId, Message>,
}

impl SqliteDocumentStore {
    /// Open (or create) the database at `config.sqlite_path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn new(config: &StoreConfig) -> ChatResult<Self> {
        let conn = Connection::open(&config.sqlite_path).await?;
        Self::with_connection(conn, config).await
    }

    /// Open the database at `path`, ignoring `config.sqlite_path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn open(path: impl AsRef<Path>, config: &StoreConfig) -> ChatResult<Self> {
        let conn = Connection::open(path.as_ref()).await?;
        Self::with_connection(conn, config).await
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub async fn open_in_memory(config: &StoreConfig) -> ChatResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::with_connection(conn, config).await
    }

    async fn with_connection(conn: Connection, config: &StoreConfig) -> ChatResult<Self> {
        config.validate()?;
        let conversations = config.conversations_table.clone();
        let messages = config.messages_table.clone();

        let last_write = conn
            .call(move |conn| {
                conn.execute_batch(&format!(
                    "PRAGMA foreign_keys = ON;
                    CREATE TABLE IF NOT EXISTS {conversations} (
                        id TEXT PRIMARY KEY,
                        title TEXT NOT NULL,
                        created_at_us INTEGER NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_{conversations}_created
                        ON {conversations} (created_at_us);
                    CREATE TABLE IF NOT EXISTS {messages} (
                        id TEXT PRIMARY KEY,
                        conversation_id TEXT NOT NULL
                            REFERENCES {conversations} (id) ON DELETE CASCADE,
                        role TEXT NOT NULL,
                        content TEXT NOT NULL,
                        sent_at_us INTEGER NOT NULL,
                        created_at_us INTEGER NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_{messages}_conversation_created
                        ON {messages} (conversation_id, created_at_us);"
                ))?;
                let last: Option<i64> = conn.query_row(
                    &format!(
                        "SELECT MAX(ts) FROM (
                            SELECT MAX(created_at_us) AS ts FROM {conversations}
                            UNION ALL
                            SELECT MAX(created_at_us) AS ts FROM {messages}
                        )"
                    ),
                    [],
                    |row| row.get(0),
                )?;
                Ok(last)
            })
            .await?;

        let last_write = last_write.map(timestamp).transpose()?;
        info!(
            conversations_table = %config.conversations_table,
            messages_table = %config.messages_table,
            "SQLite document store ready"
        );

        Ok(Self {
            conn,
            conversations_table: config.conversations_table.clone(),
            messages_table: config.messages_table.clone(),
            clock: ServerClock::starting_after(last_write),
            write_lock: Mutex::new(()),
            conversation_subscribers: SubscriberRegistry::new(),
            message_subscribers: SubscriberRegistry::new(),
        })
    }

    async fn load_conversations(&self) -> ChatResult<Vec<Conversation>> {
        let table = self.conversations_table.clone();
        let rows = self
            .conn
            .call(move |conn| Ok(select_conversations(conn, &table)?))
            .await?;
        rows.into_iter().map(decode_conversation).collect()
    }

    async fn load_messages(&self, conversation_id: ConversationId) -> ChatResult<Vec<Message>> {
        let conversations = self.conversations_table.clone();
        let messages = self.messages_table.clone();
        let rows = self
            .conn
            .call(move |conn| {
                if !conversation_exists(conn, &conversations, conversation_id)? {
                    return Ok(None);
                }
                Ok(Some(select_messages(conn, &messages, conversation_id)?))
            })
            .await?
            .ok_or(ChatError::ConversationNotFound(conversation_id))?;
        rows.into_iter().map(MessageRow::decode).collect()
    }

    async fn publish_conversations(&self) {
        match self.load_conversations().await {
            Ok(snapshot) => self.conversation_subscribers.publish(&(), &snapshot),
            Err(err) => {
                warn!(error = %err, "Conversation snapshot reload failed");
                self.conversation_subscribers.fail(&(), &err.to_string());
            }
        }
    }

    async fn publish_messages(&self, conversation_id: ConversationId) {
        match self.load_messages(conversation_id).await {
            Ok(snapshot) => self.message_subscribers.publish(&conversation_id, &snapshot),
            Err(err) => {
                warn!(%conversation_id, error = %err, "Message snapshot reload failed");
                self.message_subscribers
                    .fail(&conversation_id, &err.to_string());
            }
        }
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn create_conversation(
        &self,
        draft: NewConversation,
    ) -> StoreFuture<'_, ChatResult<Conversation>> {
        Box::pin(async move {
            let _write = self.write_lock.lock().await;
            let conversation = draft.into_conversation(ConversationId::generate(), self.clock.now());

            let table = self.conversations_table.clone();
            let record = conversation.clone();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!(
                            "INSERT INTO {table} (id, title, created_at_us) VALUES (?1, ?2, ?3)"
                        ),
                        rusqlite::params![
                            record.id,
                            record.title,
                            record.created_at.timestamp_micros()
                        ],
                    )?;
                    Ok(())
                })
                .await?;

            self.publish_conversations().await;
            debug!(conversation_id = %conversation.id, "Conversation created");
            Ok(conversation)
        })
    }

    fn append_message(
        &self,
        conversation_id: ConversationId,
        draft: NewMessage,
    ) -> StoreFuture<'_, ChatResult<Message>> {
        Box::pin(async move {
            let _write = self.write_lock.lock().await;
            let message =
                draft.into_message(MessageId::generate(), conversation_id, self.clock.now());

            let conversations = self.conversations_table.clone();
            let messages = self.messages_table.clone();
            let record = message.clone();
            let inserted = self
                .conn
                .call(move |conn| {
                    if !conversation_exists(conn, &conversations, record.conversation_id)? {
                        return Ok(false);
                    }
                    conn.execute(
                        &format!(
                            "INSERT INTO {messages}
                            (id, conversation_id, role, content, sent_at_us, created_at_us)
                            VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                        ),
                        rusqlite::params![
                            record.id,
                            record.conversation_id,
                            record.role.as_str(),
                            record.content,
                            record.sent_at.timestamp_micros(),
                            record.created_at.timestamp_micros()
                        ],
                    )?;
                    Ok(true)
                })
                .await?;
            if !inserted {
                return Err(ChatError::ConversationNotFound(conversation_id));
            }

            self.publish_messages(conversation_id).await;
            debug!(%conversation_id, role = %message.role, "Message appended");
            Ok(message)
        })
    }

    fn list_conversations(&self) -> StoreFuture<'_, ChatResult<Vec<Conversation>>> {
        Box::pin(self.load_conversations())
    }

    fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> StoreFuture<'_, ChatResult<Vec<Message>>> {
        Box::pin(self.load_messages(conversation_id))
    }

    fn subscribe_conversations(&self) -> StoreFuture<'_, ChatResult<Subscription<Conversation>>> {
        Box::pin(async move {
            let _write = self.write_lock.lock().await;
            let snapshot = self.load_conversations().await?;
            Ok(self.conversation_subscribers.subscribe((), snapshot))
        })
    }

    fn subscribe_messages(
        &self,
        conversation_id: ConversationId,
    ) -> StoreFuture<'_, ChatResult<Subscription<Message>>> {
        Box::pin(async move {
            let _write = self.write_lock.lock().await;
            let snapshot = self.load_messages(conversation_id).await?;
            Ok(self.message_subscribers.subscribe(conversation_id, snapshot))
        })
    }

    fn delete_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> StoreFuture<'_, ChatResult<()>> {
        Box::pin(async move {
            let _write = self.write_lock.lock().await;
            let table = self.conversations_table.clone();
            let deleted = self
                .conn
                .call(move |conn| {
                    Ok(conn.execute(
                        &format!("DELETE FROM {table} WHERE id = ?1"),
                        [conversation_id],
                    )?)
                })
                .await?;
            if deleted == 0 {
                return Err(ChatError::ConversationNotFound(conversation_id));
            }

            self.publish_conversations().await;
            self.message_subscribers.publish(&conversation_id, &[]);
            debug!(%conversation_id, "Conversation deleted");
            Ok(())
        })
    }
}
