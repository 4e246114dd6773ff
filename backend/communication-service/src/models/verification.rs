use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Why a chain walk stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakReason {
    /// sequence numbers are not exactly 0..n
    SequenceGap,
    /// first message does not link to the genesis hash
    GenesisMismatch,
    /// a message's previous hash differs from its predecessor's recomputed hash
    LinkMismatch,
    /// a stored current hash differs from the recomputed one
    HashMismatch,
    /// a message claims a different conversation
    ConversationMismatch,
}

impl BreakReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakReason::SequenceGap => "sequence_gap",
            BreakReason::GenesisMismatch => "genesis_mismatch",
            BreakReason::LinkMismatch => "link_mismatch",
            BreakReason::HashMismatch => "hash_mismatch",
            BreakReason::ConversationMismatch => "conversation_mismatch",
        }
    }
}

impl fmt::Display for BreakReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainBreak {
    pub sequence_number: i64,
    pub reason: BreakReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub conversation_id: Uuid,
    pub is_valid: bool,
    pub message_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broken_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<BreakReason>,
}

impl VerificationReport {
    pub fn from_walk(conversation_id: Uuid, message_count: usize, outcome: Option<ChainBreak>) -> Self {
        Self {
            conversation_id,
            is_valid: outcome.is_none(),
            message_count,
            broken_at: outcome.map(|b| b.sequence_number),
            reason: outcome.map(|b| b.reason),
        }
    }
}
