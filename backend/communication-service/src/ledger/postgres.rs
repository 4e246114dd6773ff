use super::store::{LedgerStore, ReadOutcome, StoreError};
use crate::error::AppResult;
use crate::models::{Attachment, ConversationSummary, Message, MessageType, ParticipantType};
use crate::services::conversation_index::{preview, ConversationView};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::Json;
use tokio_postgres::Row;
use uuid::Uuid;

const MESSAGE_COLUMNS: &str = "id, conversation_id, sequence_number, sender_id, sender_type, \
     sender_name, receiver_id, receiver_name, message_type, content, attachments, sos_id, \
     is_read, read_at, previous_hash, current_hash, created_at";

/// Latest message per conversation of `$1`, with the counts the summary needs.
const SUMMARY_SQL: &str = "\
WITH mine AS (
    SELECT * FROM ledger_messages WHERE sender_id = $1 OR receiver_id = $1
), latest AS (
    SELECT DISTINCT ON (conversation_id) *
    FROM mine
    ORDER BY conversation_id, sequence_number DESC
)
SELECT l.conversation_id, l.sequence_number, l.sender_id, l.sender_name,
       l.receiver_id, l.receiver_name, l.content, l.attachments, l.created_at,
       (SELECT COUNT(*) FROM mine u
         WHERE u.conversation_id = l.conversation_id
           AND u.receiver_id = $1 AND u.is_read = FALSE) AS unread_count,
       (SELECT s.sos_id FROM mine s
         WHERE s.conversation_id = l.conversation_id AND s.sos_id IS NOT NULL
         ORDER BY s.sequence_number DESC LIMIT 1) AS sos_id,
       (SELECT p.sender_type FROM ledger_messages p
         WHERE p.sender_id = CASE WHEN l.sender_id = $1 THEN l.receiver_id ELSE l.sender_id END
         ORDER BY p.created_at DESC LIMIT 1) AS partner_type
FROM latest l
ORDER BY l.created_at DESC, l.conversation_id ASC";

/// PostgreSQL-backed ledger store.
///
/// `ledger_tails` holds one row per conversation and is the compare-and-swap
/// target; the message insert and the tail swap commit in one transaction.
///
/// Also serves conversation summaries straight from `ledger_messages`, so
/// instances sharing the database agree on them without any local state.
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: Pool,
}

impl PostgresLedgerStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn message_from_row(row: &Row) -> Result<Message, StoreError> {
    let sender_type: String = row.try_get("sender_type")?;
    let message_type: String = row.try_get("message_type")?;
    let attachments: Json<Vec<Attachment>> = row.try_get("attachments")?;
    let previous_hash: String = row.try_get("previous_hash")?;
    let current_hash: String = row.try_get("current_hash")?;

    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        sequence_number: row.try_get("sequence_number")?,
        sender_id: row.try_get("sender_id")?,
        sender_type: sender_type
            .parse::<ParticipantType>()
            .map_err(StoreError::Corrupt)?,
        sender_name: row.try_get("sender_name")?,
        receiver_id: row.try_get("receiver_id")?,
        receiver_name: row.try_get("receiver_name")?,
        message_type: message_type
            .parse::<MessageType>()
            .map_err(StoreError::Corrupt)?,
        content: row.try_get("content")?,
        attachments: attachments.0,
        sos_id: row.try_get("sos_id")?,
        is_read: row.try_get("is_read")?,
        read_at: row.try_get("read_at")?,
        previous_hash: previous_hash.trim_end().to_string(),
        current_hash: current_hash.trim_end().to_string(),
        created_at: row.try_get("created_at")?,
    })
}

fn collect(rows: &[Row]) -> Result<Vec<Message>, StoreError> {
    rows.iter().map(message_from_row).collect()
}

fn summary_from_row(participant_id: &str, row: &Row) -> Result<ConversationSummary, StoreError> {
    let sender_id: String = row.try_get("sender_id")?;
    let (partner_id, partner_name) = if sender_id == participant_id {
        (row.try_get("receiver_id")?, row.try_get("receiver_name")?)
    } else {
        (sender_id, row.try_get("sender_name")?)
    };
    let partner_type = row
        .try_get::<_, Option<String>>("partner_type")?
        .map(|raw| raw.parse::<ParticipantType>())
        .transpose()
        .map_err(StoreError::Corrupt)?;
    let content: String = row.try_get("content")?;
    let attachments: Json<Vec<Attachment>> = row.try_get("attachments")?;
    let unread_count: i64 = row.try_get("unread_count")?;

    Ok(ConversationSummary {
        conversation_id: row.try_get("conversation_id")?,
        partner_id,
        partner_name,
        partner_type,
        last_message: preview(&content, &attachments.0),
        last_sequence_number: row.try_get("sequence_number")?,
        unread_count: unread_count.max(0) as u64,
        sos_id: row.try_get("sos_id")?,
        updated_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn tail(&self, conversation_id: Uuid) -> Result<Option<Message>, StoreError> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM ledger_messages \
             WHERE conversation_id = $1 ORDER BY sequence_number DESC LIMIT 1"
        );
        let row = client.query_opt(&sql, &[&conversation_id]).await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn append(&self, message: &Message) -> Result<(), StoreError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let swapped = if message.sequence_number == 0 {
            tx.execute(
                "INSERT INTO ledger_tails (conversation_id, sequence_number, current_hash) \
                 VALUES ($1, $2, $3) ON CONFLICT (conversation_id) DO NOTHING",
                &[
                    &message.conversation_id,
                    &message.sequence_number,
                    &message.current_hash,
                ],
            )
            .await?
        } else {
            tx.execute(
                "UPDATE ledger_tails SET sequence_number = $2, current_hash = $3 \
                 WHERE conversation_id = $1 AND sequence_number = $4 AND current_hash = $5",
                &[
                    &message.conversation_id,
                    &message.sequence_number,
                    &message.current_hash,
                    &(message.sequence_number - 1),
                    &message.previous_hash,
                ],
            )
            .await?
        };

        let moved = StoreError::TailMoved {
            conversation_id: message.conversation_id,
            expected_sequence: message.sequence_number - 1,
        };
        if swapped != 1 {
            tx.rollback().await?;
            return Err(moved);
        }

        let sql = format!(
            "INSERT INTO ledger_messages ({MESSAGE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
        );
        let inserted = tx
            .execute(
                &sql,
                &[
                    &message.id,
                    &message.conversation_id,
                    &message.sequence_number,
                    &message.sender_id,
                    &message.sender_type.as_str(),
                    &message.sender_name,
                    &message.receiver_id,
                    &message.receiver_name,
                    &message.message_type.as_str(),
                    &message.content,
                    &Json(&message.attachments),
                    &message.sos_id,
                    &message.is_read,
                    &message.read_at,
                    &message.previous_hash,
                    &message.current_hash,
                    &message.created_at,
                ],
            )
            .await;

        match inserted {
            Ok(_) => {
                tx.commit().await?;
                Ok(())
            }
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                tx.rollback().await?;
                Err(moved)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn message(&self, message_id: Uuid) -> Result<Option<Message>, StoreError> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM ledger_messages WHERE id = $1");
        let row = client.query_opt(&sql, &[&message_id]).await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn conversation_messages(
        &self,
        conversation_id: Uuid,
        up_to_sequence: Option<i64>,
    ) -> Result<Vec<Message>, StoreError> {
        let client = self.pool.get().await?;
        let rows = match up_to_sequence {
            Some(bound) => {
                let sql = format!(
                    "SELECT {MESSAGE_COLUMNS} FROM ledger_messages \
                     WHERE conversation_id = $1 AND sequence_number <= $2 \
                     ORDER BY sequence_number ASC"
                );
                client.query(&sql, &[&conversation_id, &bound]).await?
            }
            None => {
                let sql = format!(
                    "SELECT {MESSAGE_COLUMNS} FROM ledger_messages \
                     WHERE conversation_id = $1 ORDER BY sequence_number ASC"
                );
                client.query(&sql, &[&conversation_id]).await?
            }
        };
        collect(&rows)
    }

    async fn sos_messages(&self, sos_id: &str) -> Result<Vec<Message>, StoreError> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM ledger_messages WHERE sos_id = $1 \
             ORDER BY created_at ASC, conversation_id ASC, sequence_number ASC"
        );
        let rows = client.query(&sql, &[&sos_id]).await?;
        collect(&rows)
    }

    async fn mark_read(
        &self,
        message_id: Uuid,
        read_at: DateTime<Utc>,
    ) -> Result<ReadOutcome, StoreError> {
        let client = self.pool.get().await?;
        let sql = format!(
            "UPDATE ledger_messages SET is_read = TRUE, read_at = $2 \
             WHERE id = $1 AND is_read = FALSE RETURNING {MESSAGE_COLUMNS}"
        );
        if let Some(row) = client.query_opt(&sql, &[&message_id, &read_at]).await? {
            return Ok(ReadOutcome {
                message: message_from_row(&row)?,
                changed: true,
            });
        }

        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM ledger_messages WHERE id = $1");
        match client.query_opt(&sql, &[&message_id]).await? {
            Some(row) => Ok(ReadOutcome {
                message: message_from_row(&row)?,
                changed: false,
            }),
            None => Err(StoreError::MessageNotFound(message_id)),
        }
    }

    async fn conversation_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        let client = self.pool.get().await?;
        let rows = client
            .query("SELECT conversation_id FROM ledger_tails", &[])
            .await?;
        rows.iter()
            .map(|row| row.try_get::<_, Uuid>(0).map_err(StoreError::from))
            .collect()
    }

    async fn all_messages(&self) -> Result<Vec<Message>, StoreError> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM ledger_messages \
             ORDER BY conversation_id ASC, sequence_number ASC"
        );
        let rows = client.query(&sql, &[]).await?;
        collect(&rows)
    }
}

#[async_trait]
impl ConversationView for PostgresLedgerStore {
    async fn on_append(&self, _message: &Message) -> AppResult<()> {
        Ok(())
    }

    async fn on_read(&self, _message: &Message) -> AppResult<()> {
        Ok(())
    }

    async fn conversations_for(&self, participant_id: &str) -> AppResult<Vec<ConversationSummary>> {
        let client = self.pool.get().await?;
        let rows = client.query(SUMMARY_SQL, &[&participant_id]).await?;
        Ok(rows
            .iter()
            .map(|row| summary_from_row(participant_id, row))
            .collect::<Result<_, _>>()?)
    }

    async fn unread_count(&self, participant_id: &str) -> AppResult<u64> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM ledger_messages WHERE receiver_id = $1 AND is_read = FALSE",
                &[&participant_id],
            )
            .await?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    async fn known_name(&self, participant_id: &str) -> AppResult<Option<String>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT sender_name FROM ledger_messages WHERE sender_id = $1 \
                 ORDER BY created_at DESC, sequence_number DESC LIMIT 1",
                &[&participant_id],
            )
            .await?;
        Ok(row.map(|row| row.try_get::<_, String>(0)).transpose()?)
    }

    async fn rebuild(&self, _store: &dyn LedgerStore) -> AppResult<()> {
        Ok(())
    }
}
