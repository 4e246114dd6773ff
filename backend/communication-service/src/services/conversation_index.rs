use crate::error::AppResult;
use crate::ledger::LedgerStore;
use crate::models::{Attachment, ConversationSummary, Message, ParticipantType};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct KnownParticipant {
    name: String,
    participant_type: ParticipantType,
}

#[derive(Default)]
struct Inner {
    /// owner -> conversation -> summary
    summaries: HashMap<String, HashMap<Uuid, ConversationSummary>>,
    participants: HashMap<String, KnownParticipant>,
}

/// Per-participant conversation summaries and unread counts.
///
/// Every implementation is derived from the ledger store, which stays the
/// only source of truth. `on_append` and `on_read` are called by the ledger
/// service while it holds the conversation lane.
#[async_trait]
pub trait ConversationView: Send + Sync {
    async fn on_append(&self, message: &Message) -> AppResult<()>;

    /// Called once per unread-to-read transition.
    async fn on_read(&self, message: &Message) -> AppResult<()>;

    /// Summaries of `participant_id`, most recently updated first.
    async fn conversations_for(&self, participant_id: &str) -> AppResult<Vec<ConversationSummary>>;

    async fn unread_count(&self, participant_id: &str) -> AppResult<u64>;

    /// Display name last used by `participant_id` as a sender.
    async fn known_name(&self, participant_id: &str) -> AppResult<Option<String>>;

    /// Bring the view in line with `store` at startup.
    async fn rebuild(&self, store: &dyn LedgerStore) -> AppResult<()>;
}

/// In-process materialized view, for a single instance over its own store.
///
/// Backends shared between instances answer these queries from storage
/// instead (see `PostgresLedgerStore`).
#[derive(Default)]
pub struct ConversationIndex {
    inner: RwLock<Inner>,
}

/// Short text shown for the last message of a conversation.
pub(crate) fn preview(content: &str, attachments: &[Attachment]) -> String {
    if !content.trim().is_empty() {
        return content.to_string();
    }
    match attachments.first() {
        Some(first) if attachments.len() == 1 => format!("[attachment] {}", first.file_name),
        Some(_) => format!("[{} attachments]", attachments.len()),
        None => String::new(),
    }
}

impl Inner {
    fn apply(&mut self, message: &Message) {
        self.participants.insert(
            message.sender_id.clone(),
            KnownParticipant {
                name: message.sender_name.clone(),
                participant_type: message.sender_type,
            },
        );
        let receiver_type = self
            .participants
            .get(&message.receiver_id)
            .map(|p| p.participant_type);

        let sides = [
            (
                &message.sender_id,
                &message.receiver_id,
                &message.receiver_name,
                receiver_type,
            ),
            (
                &message.receiver_id,
                &message.sender_id,
                &message.sender_name,
                Some(message.sender_type),
            ),
        ];

        for (owner, partner_id, partner_name, partner_type) in sides {
            let summary = self
                .summaries
                .entry(owner.clone())
                .or_default()
                .entry(message.conversation_id)
                .or_insert_with(|| ConversationSummary {
                    conversation_id: message.conversation_id,
                    partner_id: partner_id.clone(),
                    partner_name: partner_name.clone(),
                    partner_type,
                    last_message: String::new(),
                    last_sequence_number: -1,
                    unread_count: 0,
                    sos_id: None,
                    updated_at: message.created_at,
                });

            if summary.partner_type.is_none() {
                summary.partner_type = partner_type;
            }
            if message.sequence_number > summary.last_sequence_number {
                summary.last_sequence_number = message.sequence_number;
                summary.last_message = preview(&message.content, &message.attachments);
                summary.partner_name = partner_name.clone();
                summary.updated_at = message.created_at;
                if message.sos_id.is_some() {
                    summary.sos_id = message.sos_id.clone();
                }
            }
            if *owner == message.receiver_id && !message.is_read {
                summary.unread_count += 1;
            }
        }
    }
}

impl ConversationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole view with one derived from `messages`.
    pub async fn load(&self, messages: &[Message]) {
        let mut ordered: Vec<&Message> = messages.iter().collect();
        ordered.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.sequence_number.cmp(&b.sequence_number))
        });

        let mut fresh = Inner::default();
        for message in ordered {
            fresh.apply(message);
        }

        let conversations: usize = fresh.summaries.values().map(|c| c.len()).sum();
        *self.inner.write().await = fresh;
        tracing::info!(
            messages = messages.len(),
            conversations,
            "conversation index rebuilt"
        );
    }
}

#[async_trait]
impl ConversationView for ConversationIndex {
    async fn on_append(&self, message: &Message) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        inner.apply(message);
        Ok(())
    }

    async fn on_read(&self, message: &Message) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(summary) = inner
            .summaries
            .get_mut(&message.receiver_id)
            .and_then(|by_conversation| by_conversation.get_mut(&message.conversation_id))
        {
            summary.unread_count = summary.unread_count.saturating_sub(1);
        }
        Ok(())
    }

    async fn conversations_for(&self, participant_id: &str) -> AppResult<Vec<ConversationSummary>> {
        let inner = self.inner.read().await;
        let mut summaries: Vec<ConversationSummary> = inner
            .summaries
            .get(participant_id)
            .map(|by_conversation| by_conversation.values().cloned().collect())
            .unwrap_or_default();
        summaries.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.conversation_id.cmp(&b.conversation_id))
        });
        Ok(summaries)
    }

    async fn unread_count(&self, participant_id: &str) -> AppResult<u64> {
        let inner = self.inner.read().await;
        Ok(inner
            .summaries
            .get(participant_id)
            .map(|by_conversation| by_conversation.values().map(|s| s.unread_count).sum())
            .unwrap_or(0))
    }

    async fn known_name(&self, participant_id: &str) -> AppResult<Option<String>> {
        let inner = self.inner.read().await;
        Ok(inner.participants.get(participant_id).map(|p| p.name.clone()))
    }

    async fn rebuild(&self, store: &dyn LedgerStore) -> AppResult<()> {
        let messages = store.all_messages().await?;
        self.load(&messages).await;
        Ok(())
    }
}
