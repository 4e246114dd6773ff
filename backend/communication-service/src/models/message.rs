use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Organisation kind of a ledger participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantType {
    Hospital,
    #[serde(alias = "blood_bank")]
    Bloodbank,
    Admin,
}

impl ParticipantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantType::Hospital => "hospital",
            ParticipantType::Bloodbank => "bloodbank",
            ParticipantType::Admin => "admin",
        }
    }
}

impl fmt::Display for ParticipantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParticipantType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hospital" => Ok(ParticipantType::Hospital),
            "bloodbank" | "blood_bank" => Ok(ParticipantType::Bloodbank),
            "admin" => Ok(ParticipantType::Admin),
            other => Err(format!("unknown participant type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Document,
    BloodRequest,
    BloodResponse,
    StatusUpdate,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Document => "document",
            MessageType::BloodRequest => "blood_request",
            MessageType::BloodResponse => "blood_response",
            MessageType::StatusUpdate => "status_update",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageType::Text),
            "document" => Ok(MessageType::Document),
            "blood_request" => Ok(MessageType::BloodRequest),
            "blood_response" => Ok(MessageType::BloodResponse),
            "status_update" => Ok(MessageType::StatusUpdate),
            other => Err(format!("unknown message type: {other}")),
        }
    }
}

/// File reference carried by a message. The blob itself is content addressed
/// by `content_hash` and never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: Uuid,
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    pub url: String,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_text: Option<String>,
}

/// One ledger entry.
///
/// Everything except `is_read`/`read_at` is fixed at append time and bound
/// into `current_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: String,
    pub sender_type: ParticipantType,
    pub sender_name: String,
    pub receiver_id: String,
    pub receiver_name: String,
    pub message_type: MessageType,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sos_id: Option<String>,
    pub is_read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    pub sequence_number: i64,
    pub previous_hash: String,
    pub current_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn involves(&self, participant_id: &str) -> bool {
        self.sender_id == participant_id || self.receiver_id == participant_id
    }

    /// The other side of the conversation, seen from `participant_id`.
    pub fn counterpart_of(&self, participant_id: &str) -> &str {
        if self.sender_id == participant_id {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }
}

/// Authenticated organisation acting on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantProfile {
    pub id: String,
    pub name: String,
    pub participant_type: ParticipantType,
}

impl ParticipantProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: ParticipantType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            participant_type: kind,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.participant_type == ParticipantType::Admin
    }
}

/// Caller-supplied part of an append; the ledger fills in the rest.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender: ParticipantProfile,
    pub receiver_id: String,
    pub receiver_name: Option<String>,
    pub message_type: MessageType,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub sos_id: Option<String>,
}
