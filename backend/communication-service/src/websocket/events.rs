//! Realtime events pushed to connected participants.
//!
//! Every frame is a flat JSON object named `object.action`:
//!
//! ```json
//! {
//!     "type": "message.appended",
//!     "conversationId": "uuid",
//!     "messageId": "uuid",
//!     "sequenceNumber": 3,
//!     "senderId": "bank-1",
//!     "receiverId": "hospital-9",
//!     "timestamp": "2024-05-01T08:30:00Z"
//! }
//! ```
//!
//! Delivery is best effort. Nothing is replayed; clients that miss an event
//! refetch over HTTP.

use crate::models::{Message, VerificationReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const MESSAGE_APPENDED: &str = "message.appended";
pub const MESSAGE_READ: &str = "message.read";
pub const INTEGRITY_VIOLATION: &str = "ledger.integrity_violation";
/// Emitted locally by the client SDK after a reconnect, never sent by the server.
pub const CONNECTION_RESTORED: &str = "connection.restored";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RealtimeEvent {
    #[serde(rename = "message.appended", rename_all = "camelCase")]
    MessageAppended {
        conversation_id: Uuid,
        message_id: Uuid,
        sequence_number: i64,
        sender_id: String,
        receiver_id: String,
    },

    #[serde(rename = "message.read", rename_all = "camelCase")]
    MessageRead {
        conversation_id: Uuid,
        message_id: Uuid,
        reader_id: String,
        read_at: DateTime<Utc>,
    },

    #[serde(rename = "ledger.integrity_violation", rename_all = "camelCase")]
    IntegrityViolation {
        conversation_id: Uuid,
        broken_at: Option<i64>,
        message_count: usize,
        reason: Option<String>,
    },
}

/// Wire frame: the event plus its emission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    #[serde(flatten)]
    pub event: RealtimeEvent,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RealtimeEvent {
    pub fn appended(message: &Message) -> Self {
        RealtimeEvent::MessageAppended {
            conversation_id: message.conversation_id,
            message_id: message.id,
            sequence_number: message.sequence_number,
            sender_id: message.sender_id.clone(),
            receiver_id: message.receiver_id.clone(),
        }
    }

    pub fn read(message: &Message, reader_id: &str) -> Self {
        RealtimeEvent::MessageRead {
            conversation_id: message.conversation_id,
            message_id: message.id,
            reader_id: reader_id.to_string(),
            read_at: message.read_at.unwrap_or_else(Utc::now),
        }
    }

    pub fn integrity_violation(report: &VerificationReport) -> Self {
        RealtimeEvent::IntegrityViolation {
            conversation_id: report.conversation_id,
            broken_at: report.broken_at,
            message_count: report.message_count,
            reason: report.reason.map(|r| r.as_str().to_string()),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            RealtimeEvent::MessageAppended { .. } => MESSAGE_APPENDED,
            RealtimeEvent::MessageRead { .. } => MESSAGE_READ,
            RealtimeEvent::IntegrityViolation { .. } => INTEGRITY_VIOLATION,
        }
    }

    pub fn to_payload(&self) -> Result<String, BroadcastError> {
        let frame = EventFrame {
            event: self.clone(),
            timestamp: Utc::now(),
        };
        Ok(serde_json::to_string(&frame)?)
    }
}
