use super::message::ParticipantType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for direct-channel ids.
const DIRECT_CHANNEL_NAMESPACE: Uuid = Uuid::from_u128(0x6c3f_0b5e_2d4a_4f1b_9e57_a8d2_c1b0_7e34);

/// Stable id of the two-party channel between `a` and `b`, independent of order.
pub fn conversation_id_for(a: &str, b: &str) -> Uuid {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let name = format!("direct:{}:{}:{}", lo.len(), lo, hi);
    Uuid::new_v5(&DIRECT_CHANNEL_NAMESPACE, name.as_bytes())
}

/// Per-participant view of a conversation. Derived, never authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: Uuid,
    pub partner_id: String,
    pub partner_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_type: Option<ParticipantType>,
    pub last_message: String,
    /// Sequence number of `last_message`
    pub last_sequence_number: i64,
    pub unread_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sos_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}
