use super::store::{LedgerStore, ReadOutcome, StoreError};
use crate::models::Message;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    conversations: HashMap<Uuid, Vec<Message>>,
    /// message id -> (conversation id, position)
    index: HashMap<Uuid, (Uuid, usize)>,
}

/// Process-local ledger store.
#[derive(Default)]
pub struct MemoryLedgerStore {
    inner: RwLock<Inner>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite a stored message in place, bypassing every ledger rule.
    ///
    /// Models out-of-band tampering (someone editing the table directly) for
    /// audit drills and tests. Returns false when the id is unknown.
    pub async fn overwrite_raw<F>(&self, message_id: Uuid, edit: F) -> bool
    where
        F: FnOnce(&mut Message),
    {
        let mut inner = self.inner.write().await;
        let Some(&(conversation_id, position)) = inner.index.get(&message_id) else {
            return false;
        };
        match inner
            .conversations
            .get_mut(&conversation_id)
            .and_then(|messages| messages.get_mut(position))
        {
            Some(message) => {
                edit(message);
                tracing::warn!(%message_id, %conversation_id, "ledger row overwritten out of band");
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn tail(&self, conversation_id: Uuid) -> Result<Option<Message>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .conversations
            .get(&conversation_id)
            .and_then(|messages| messages.last().cloned()))
    }

    async fn append(&self, message: &Message) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let messages = inner
            .conversations
            .entry(message.conversation_id)
            .or_default();

        let links = match messages.last() {
            None => message.sequence_number == 0,
            Some(tail) => {
                tail.sequence_number + 1 == message.sequence_number
                    && tail.current_hash == message.previous_hash
            }
        };
        if !links {
            return Err(StoreError::TailMoved {
                conversation_id: message.conversation_id,
                expected_sequence: message.sequence_number - 1,
            });
        }

        let position = messages.len();
        messages.push(message.clone());
        inner
            .index
            .insert(message.id, (message.conversation_id, position));
        Ok(())
    }

    async fn message(&self, message_id: Uuid) -> Result<Option<Message>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.index.get(&message_id).and_then(|(cid, pos)| {
            inner
                .conversations
                .get(cid)
                .and_then(|messages| messages.get(*pos).cloned())
        }))
    }

    async fn conversation_messages(
        &self,
        conversation_id: Uuid,
        up_to_sequence: Option<i64>,
    ) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.read().await;
        let Some(messages) = inner.conversations.get(&conversation_id) else {
            return Ok(Vec::new());
        };
        Ok(match up_to_sequence {
            Some(bound) => messages
                .iter()
                .filter(|m| m.sequence_number <= bound)
                .cloned()
                .collect(),
            None => messages.clone(),
        })
    }

    async fn sos_messages(&self, sos_id: &str) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .conversations
            .values()
            .flatten()
            .filter(|m| m.sos_id.as_deref() == Some(sos_id))
            .cloned()
            .collect())
    }

    async fn mark_read(
        &self,
        message_id: Uuid,
        read_at: DateTime<Utc>,
    ) -> Result<ReadOutcome, StoreError> {
        let mut inner = self.inner.write().await;
        let &(conversation_id, position) = inner
            .index
            .get(&message_id)
            .ok_or(StoreError::MessageNotFound(message_id))?;
        let message = inner
            .conversations
            .get_mut(&conversation_id)
            .and_then(|messages| messages.get_mut(position))
            .ok_or(StoreError::MessageNotFound(message_id))?;

        let changed = !message.is_read;
        if changed {
            message.is_read = true;
            message.read_at = Some(read_at);
        }
        Ok(ReadOutcome {
            message: message.clone(),
            changed,
        })
    }

    async fn conversation_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .conversations
            .iter()
            .filter(|(_, messages)| !messages.is_empty())
            .map(|(id, _)| *id)
            .collect())
    }

    async fn all_messages(&self) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.conversations.values().flatten().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::hashing::{compute_hash, truncate_timestamp, GENESIS_HASH};
    use crate::models::{MessageType, ParticipantType};

    fn linked(conversation_id: Uuid, seq: i64, previous_hash: &str) -> Message {
        let mut m = Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id: "a".into(),
            sender_type: ParticipantType::Hospital,
            sender_name: "A".into(),
            receiver_id: "b".into(),
            receiver_name: "B".into(),
            message_type: MessageType::Text,
            content: format!("#{seq}"),
            attachments: vec![],
            sos_id: None,
            is_read: false,
            read_at: None,
            sequence_number: seq,
            previous_hash: previous_hash.to_string(),
            current_hash: String::new(),
            created_at: truncate_timestamp(Utc::now()),
        };
        m.current_hash = compute_hash(&m);
        m
    }

    #[tokio::test]
    async fn append_rejects_stale_tail() {
        let store = MemoryLedgerStore::new();
        let cid = Uuid::new_v4();
        let first = linked(cid, 0, GENESIS_HASH);
        store.append(&first).await.unwrap();

        let winner = linked(cid, 1, &first.current_hash);
        let loser = linked(cid, 1, &first.current_hash);
        store.append(&winner).await.unwrap();

        let err = store.append(&loser).await.unwrap_err();
        assert!(matches!(err, StoreError::TailMoved { expected_sequence: 0, .. }));
        assert_eq!(store.conversation_messages(cid, None).await.unwrap().len(), 2);
        assert!(store.message(loser.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn first_append_must_start_at_zero() {
        let store = MemoryLedgerStore::new();
        let orphan = linked(Uuid::new_v4(), 3, GENESIS_HASH);
        assert!(store.append(&orphan).await.is_err());
        assert!(store.conversation_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_read_transitions_once() {
        let store = MemoryLedgerStore::new();
        let m = linked(Uuid::new_v4(), 0, GENESIS_HASH);
        store.append(&m).await.unwrap();

        let first = store.mark_read(m.id, Utc::now()).await.unwrap();
        let second = store.mark_read(m.id, Utc::now()).await.unwrap();
        assert!(first.changed);
        assert!(!second.changed);
        assert_eq!(first.message.read_at, second.message.read_at);
    }

    #[tokio::test]
    async fn bounded_read_respects_snapshot() {
        let store = MemoryLedgerStore::new();
        let cid = Uuid::new_v4();
        let a = linked(cid, 0, GENESIS_HASH);
        let b = linked(cid, 1, &a.current_hash);
        store.append(&a).await.unwrap();
        store.append(&b).await.unwrap();

        let bounded = store.conversation_messages(cid, Some(0)).await.unwrap();
        assert_eq!(bounded.len(), 1);
        assert_eq!(bounded[0].id, a.id);
    }

    #[tokio::test]
    async fn overwrite_raw_bypasses_rules() {
        let store = MemoryLedgerStore::new();
        let m = linked(Uuid::new_v4(), 0, GENESIS_HASH);
        store.append(&m).await.unwrap();

        assert!(store.overwrite_raw(m.id, |row| row.content = "edited".into()).await);
        assert!(!store.overwrite_raw(Uuid::new_v4(), |_| {}).await);
        let stored = store.message(m.id).await.unwrap().unwrap();
        assert_eq!(stored.content, "edited");
    }
}
