use crate::error::{AppError, AppResult};
use crate::ledger::hashing::{compute_hash, is_sealed, truncate_timestamp};
use crate::ledger::{verify_chain, LedgerStore, ReadOutcome, StoreError};
use crate::metrics;
use crate::models::{
    conversation_id_for, BreakReason, ConversationSummary, Message, NewMessage,
    ParticipantProfile, VerificationReport,
};
use crate::services::conversation_index::ConversationView;
use crate::services::notifier::RealtimeNotifier;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

const MAX_CONTENT_CHARS: usize = 10_000;
const MAX_PARTICIPANT_ID_CHARS: usize = 128;
const MAX_SOS_ID_CHARS: usize = 128;

/// Bounded retry for appends that lose the tail race.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::from_millis(25),
        }
    }
}

type LaneMap = DashMap<Uuid, Arc<Mutex<()>>>;

/// One async mutex per conversation. Appends to different conversations
/// never wait on each other; idle lanes are dropped from the map.
#[derive(Default, Clone)]
pub struct AppendLanes {
    lanes: Arc<LaneMap>,
}

pub struct LaneGuard {
    guard: Option<OwnedMutexGuard<()>>,
    lane: Arc<Mutex<()>>,
    lanes: Arc<LaneMap>,
    conversation_id: Uuid,
}

impl AppendLanes {
    pub async fn acquire(&self, conversation_id: Uuid) -> LaneGuard {
        let lane = self
            .lanes
            .entry(conversation_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lane.clone().lock_owned().await;
        LaneGuard {
            guard: Some(guard),
            lane,
            lanes: self.lanes.clone(),
            conversation_id,
        }
    }

    pub fn active(&self) -> usize {
        self.lanes.len()
    }
}

impl Drop for LaneGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Map entry plus our handle: nobody else holds or waits on the lane.
        self.lanes.remove_if(&self.conversation_id, |_, lane| {
            Arc::ptr_eq(lane, &self.lane) && Arc::strong_count(lane) == 2
        });
    }
}

/// Chain builder, verifier front end and read-state owner.
pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    index: Arc<dyn ConversationView>,
    notifier: RealtimeNotifier,
    lanes: AppendLanes,
    retry: RetryPolicy,
}

/// Addressing and size rules that hold whatever the message carries.
/// Callers that stage attachments run this before writing any blob.
pub(crate) fn validate_envelope(new: &NewMessage) -> AppResult<()> {
    let receiver = new.receiver_id.trim();
    if receiver.is_empty() {
        return Err(AppError::Validation("receiverId is required".into()));
    }
    if receiver.chars().count() > MAX_PARTICIPANT_ID_CHARS {
        return Err(AppError::Validation("receiverId is too long".into()));
    }
    if receiver == new.sender.id {
        return Err(AppError::Validation(
            "sender and receiver must be different organisations".into(),
        ));
    }
    if new.content.chars().count() > MAX_CONTENT_CHARS {
        return Err(AppError::Validation(format!(
            "content exceeds {MAX_CONTENT_CHARS} characters"
        )));
    }
    if let Some(sos_id) = &new.sos_id {
        if sos_id.trim().is_empty() || sos_id.chars().count() > MAX_SOS_ID_CHARS {
            return Err(AppError::Validation("sosId is malformed".into()));
        }
    }
    Ok(())
}

fn validate(new: &NewMessage) -> AppResult<()> {
    validate_envelope(new)?;
    if new.content.trim().is_empty() && new.attachments.is_empty() {
        return Err(AppError::Validation(
            "a message needs content or at least one attachment".into(),
        ));
    }
    Ok(())
}

impl LedgerService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        index: Arc<dyn ConversationView>,
        notifier: RealtimeNotifier,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            index,
            notifier,
            lanes: AppendLanes::default(),
            retry,
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn index(&self) -> &Arc<dyn ConversationView> {
        &self.index
    }

    pub fn notifier(&self) -> &RealtimeNotifier {
        &self.notifier
    }

    pub fn lanes(&self) -> &AppendLanes {
        &self.lanes
    }

    /// Append a message to the two-party conversation of sender and receiver.
    pub async fn append(&self, new: NewMessage) -> AppResult<Message> {
        validate(&new)?;
        let started = Instant::now();
        let receiver_id = new.receiver_id.trim().to_string();
        let conversation_id = conversation_id_for(&new.sender.id, &receiver_id);
        let receiver_name = match new.receiver_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self
                .index
                .known_name(&receiver_id)
                .await?
                .unwrap_or_else(|| receiver_id.clone()),
        };

        let _lane = self.lanes.acquire(conversation_id).await;

        let mut attempt = 0;
        let message = loop {
            attempt += 1;
            let tail = self.store.tail(conversation_id).await?;

            if let Some(tail) = &tail {
                if !is_sealed(tail) {
                    let report = VerificationReport {
                        conversation_id,
                        is_valid: false,
                        message_count: (tail.sequence_number + 1) as usize,
                        broken_at: Some(tail.sequence_number),
                        reason: Some(BreakReason::HashMismatch),
                    };
                    metrics::record_verification(false);
                    self.report_violation(&report).await;
                    metrics::record_append(
                        new.message_type.as_str(),
                        "integrity",
                        started.elapsed().as_secs_f64(),
                    );
                    return Err(AppError::ChainIntegrity {
                        conversation_id,
                        broken_at: tail.sequence_number,
                        reason: BreakReason::HashMismatch.to_string(),
                    });
                }
            }

            let now = truncate_timestamp(Utc::now());
            let (sequence_number, previous_hash, created_at) = match &tail {
                Some(tail) => (
                    tail.sequence_number + 1,
                    tail.current_hash.clone(),
                    now.max(tail.created_at),
                ),
                None => (0, crate::ledger::GENESIS_HASH.to_string(), now),
            };

            let mut candidate = Message {
                id: Uuid::new_v4(),
                conversation_id,
                sender_id: new.sender.id.clone(),
                sender_type: new.sender.participant_type,
                sender_name: new.sender.name.clone(),
                receiver_id: receiver_id.clone(),
                receiver_name: receiver_name.clone(),
                message_type: new.message_type,
                content: new.content.clone(),
                attachments: new.attachments.clone(),
                sos_id: new.sos_id.clone(),
                is_read: false,
                read_at: None,
                sequence_number,
                previous_hash,
                current_hash: String::new(),
                created_at,
            };
            candidate.current_hash = compute_hash(&candidate);

            match self.store.append(&candidate).await {
                Ok(()) => break candidate,
                Err(StoreError::TailMoved { .. }) if attempt < self.retry.max_attempts => {
                    metrics::record_append_conflict("retried");
                    tracing::debug!(%conversation_id, attempt, "tail moved, rebuilding append");
                    tokio::time::sleep(self.retry.backoff * attempt).await;
                }
                Err(StoreError::TailMoved { .. }) => {
                    metrics::record_append_conflict("exhausted");
                    metrics::record_append(
                        new.message_type.as_str(),
                        "conflict",
                        started.elapsed().as_secs_f64(),
                    );
                    tracing::warn!(%conversation_id, attempts = attempt, "append gave up after repeated conflicts");
                    return Err(AppError::Conflict {
                        conversation_id,
                        attempts: attempt,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        };

        self.index.on_append(&message).await?;
        self.notifier.message_appended(&message).await;
        metrics::record_append(
            message.message_type.as_str(),
            "ok",
            started.elapsed().as_secs_f64(),
        );
        tracing::info!(
            %conversation_id,
            message_id = %message.id,
            sequence_number = message.sequence_number,
            sender_id = %message.sender_id,
            receiver_id = %message.receiver_id,
            sos_id = message.sos_id.as_deref().unwrap_or(""),
            "message appended"
        );
        Ok(message)
    }

    /// Receiver-only, idempotent. Side effects fire on the first call only.
    ///
    /// Takes the conversation lane so the transition cannot land between an
    /// append's commit and its index update.
    pub async fn mark_read(
        &self,
        message_id: Uuid,
        reader: &ParticipantProfile,
    ) -> AppResult<ReadOutcome> {
        let message = self
            .store
            .message(message_id)
            .await?
            .ok_or(AppError::MessageNotFound(message_id))?;
        if message.receiver_id != reader.id {
            return Err(AppError::Forbidden(
                "only the receiver may mark a message read".into(),
            ));
        }

        let _lane = self.lanes.acquire(message.conversation_id).await;
        let outcome = self
            .store
            .mark_read(message_id, truncate_timestamp(Utc::now()))
            .await?;
        if outcome.changed {
            self.index.on_read(&outcome.message).await?;
            self.notifier
                .message_read(&outcome.message, &reader.id)
                .await;
            tracing::debug!(%message_id, reader_id = %reader.id, "message marked read");
        }
        Ok(outcome)
    }

    /// Ordered messages of the channel between the caller and `partner_id`.
    pub async fn conversation_with(
        &self,
        caller: &ParticipantProfile,
        partner_id: &str,
    ) -> AppResult<Vec<Message>> {
        if partner_id.trim().is_empty() || partner_id == caller.id {
            return Err(AppError::Validation("partnerId is invalid".into()));
        }
        let conversation_id = conversation_id_for(&caller.id, partner_id);
        Ok(self
            .store
            .conversation_messages(conversation_id, None)
            .await?)
    }

    pub async fn conversations(
        &self,
        caller: &ParticipantProfile,
    ) -> AppResult<Vec<ConversationSummary>> {
        self.index.conversations_for(&caller.id).await
    }

    pub async fn unread_count(&self, caller: &ParticipantProfile) -> AppResult<u64> {
        self.index.unread_count(&caller.id).await
    }

    /// Messages tagged with `sos_id`, ordered by time then conversation then
    /// sequence. Non-admins only see their own traffic.
    pub async fn sos_audit(
        &self,
        caller: &ParticipantProfile,
        sos_id: &str,
    ) -> AppResult<Vec<Message>> {
        if sos_id.trim().is_empty() {
            return Err(AppError::Validation("sosId is required".into()));
        }
        let mut messages: Vec<Message> = self
            .store
            .sos_messages(sos_id)
            .await?
            .into_iter()
            .filter(|m| caller.is_admin() || m.involves(&caller.id))
            .collect();
        messages.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.conversation_id.cmp(&b.conversation_id))
                .then_with(|| a.sequence_number.cmp(&b.sequence_number))
        });
        Ok(messages)
    }

    /// Verify a conversation against a snapshot bounded by its current tail.
    pub async fn verify(
        &self,
        caller: &ParticipantProfile,
        conversation_id: Uuid,
    ) -> AppResult<VerificationReport> {
        let tail = self
            .store
            .tail(conversation_id)
            .await?
            .ok_or(AppError::ConversationNotFound(conversation_id))?;
        if !caller.is_admin() && !tail.involves(&caller.id) {
            return Err(AppError::Forbidden(
                "not a participant of this conversation".into(),
            ));
        }
        self.verify_up_to(conversation_id, tail.sequence_number)
            .await
    }

    /// Verify every conversation; used by the background auditor.
    pub async fn audit_all(&self) -> AppResult<Vec<VerificationReport>> {
        let mut reports = Vec::new();
        for conversation_id in self.store.conversation_ids().await? {
            if let Some(tail) = self.store.tail(conversation_id).await? {
                reports.push(
                    self.verify_up_to(conversation_id, tail.sequence_number)
                        .await?,
                );
            }
        }
        Ok(reports)
    }

    async fn verify_up_to(
        &self,
        conversation_id: Uuid,
        bound: i64,
    ) -> AppResult<VerificationReport> {
        let messages = self
            .store
            .conversation_messages(conversation_id, Some(bound))
            .await?;
        let report = verify_chain(conversation_id, &messages);
        metrics::record_verification(report.is_valid);
        if report.is_valid {
            tracing::debug!(%conversation_id, message_count = report.message_count, "chain verified");
        } else {
            self.report_violation(&report).await;
        }
        Ok(report)
    }

    async fn report_violation(&self, report: &VerificationReport) {
        tracing::error!(
            conversation_id = %report.conversation_id,
            broken_at = ?report.broken_at,
            reason = ?report.reason,
            message_count = report.message_count,
            "ledger chain integrity violation"
        );
        self.notifier.integrity_violation(report).await;
    }
}
