use crate::error::AppError;
use crate::models::Message;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The conversation tail no longer matches what the append was built on.
    #[error("tail of conversation {conversation_id} moved past sequence {expected_sequence}")]
    TailMoved {
        conversation_id: Uuid,
        expected_sequence: i64,
    },

    #[error("message {0} not found")]
    MessageNotFound(Uuid),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("stored row could not be decoded: {0}")]
    Corrupt(String),
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(e: tokio_postgres::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for StoreError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::MessageNotFound(id) => AppError::MessageNotFound(id),
            StoreError::TailMoved {
                conversation_id, ..
            } => AppError::Conflict {
                conversation_id,
                attempts: 1,
            },
            StoreError::Backend(msg) | StoreError::Corrupt(msg) => AppError::Database(msg),
        }
    }
}

/// Result of a read-state transition.
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub message: Message,
    /// false when the message was already read
    pub changed: bool,
}

/// Durable, append-only message storage.
///
/// Messages are never updated except for the single unread-to-read
/// transition; everything else about a stored message is immutable.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Last message of the conversation, if any.
    async fn tail(&self, conversation_id: Uuid) -> Result<Option<Message>, StoreError>;

    /// Compare-and-swap append.
    ///
    /// Succeeds only if the stored tail is exactly the message `message`
    /// links to: sequence `message.sequence_number - 1` carrying
    /// `message.previous_hash`, or no tail at all for sequence 0. Otherwise
    /// returns [`StoreError::TailMoved`] and stores nothing.
    async fn append(&self, message: &Message) -> Result<(), StoreError>;

    async fn message(&self, message_id: Uuid) -> Result<Option<Message>, StoreError>;

    /// Messages ordered by sequence number, optionally bounded (inclusive).
    async fn conversation_messages(
        &self,
        conversation_id: Uuid,
        up_to_sequence: Option<i64>,
    ) -> Result<Vec<Message>, StoreError>;

    /// Every message tagged with `sos_id`, across conversations.
    async fn sos_messages(&self, sos_id: &str) -> Result<Vec<Message>, StoreError>;

    /// Set `is_read` once. Repeated calls report `changed == false`.
    async fn mark_read(
        &self,
        message_id: Uuid,
        read_at: DateTime<Utc>,
    ) -> Result<ReadOutcome, StoreError>;

    async fn conversation_ids(&self) -> Result<Vec<Uuid>, StoreError>;

    /// Full scan used to rebuild derived views at startup.
    async fn all_messages(&self) -> Result<Vec<Message>, StoreError>;
}
