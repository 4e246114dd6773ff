//! Canonical message hashing.
//!
//! Every immutable field is fed to SHA-256 in a fixed order, each one length
//! prefixed so that no two distinct messages share an encoding. Read state is
//! excluded; it is the only part of a message allowed to change.

use crate::models::{Attachment, Message};
use chrono::{DateTime, SubsecRound, Utc};
use sha2::{Digest, Sha256};

/// `previousHash` of the first message in every conversation.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

const DOMAIN_TAG: &[u8] = b"blood-ledger/message/v1";

/// Timestamps are bound at microsecond precision so they survive a
/// round trip through `timestamptz`.
pub fn truncate_timestamp(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

pub fn canonical_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

struct CanonicalHasher(Sha256);

impl CanonicalHasher {
    fn new() -> Self {
        let mut h = Self(Sha256::new());
        h.bytes(DOMAIN_TAG);
        h
    }

    fn bytes(&mut self, value: &[u8]) {
        self.0.update((value.len() as u64).to_be_bytes());
        self.0.update(value);
    }

    fn str(&mut self, value: &str) {
        self.bytes(value.as_bytes());
    }

    fn opt_str(&mut self, value: Option<&str>) {
        match value {
            Some(v) => {
                self.0.update([1u8]);
                self.str(v);
            }
            None => self.0.update([0u8]),
        }
    }

    fn u64(&mut self, value: u64) {
        self.0.update(value.to_be_bytes());
    }

    fn i64(&mut self, value: i64) {
        self.0.update(value.to_be_bytes());
    }

    fn attachment(&mut self, a: &Attachment) {
        self.bytes(a.id.as_bytes());
        self.str(&a.file_name);
        self.str(&a.file_type);
        self.u64(a.file_size);
        self.str(&a.url);
        self.str(&a.content_hash);
        self.opt_str(a.ocr_text.as_deref());
    }

    fn finish(self) -> String {
        hex::encode(self.0.finalize())
    }
}

/// Recompute the hash a message should carry in `current_hash`.
pub fn compute_hash(m: &Message) -> String {
    let mut h = CanonicalHasher::new();
    h.bytes(m.id.as_bytes());
    h.bytes(m.conversation_id.as_bytes());
    h.i64(m.sequence_number);
    h.str(&m.sender_id);
    h.str(m.sender_type.as_str());
    h.str(&m.sender_name);
    h.str(&m.receiver_id);
    h.str(&m.receiver_name);
    h.str(m.message_type.as_str());
    h.str(&m.content);
    h.u64(m.attachments.len() as u64);
    for attachment in &m.attachments {
        h.attachment(attachment);
    }
    h.opt_str(m.sos_id.as_deref());
    h.str(&canonical_timestamp(&m.created_at));
    h.str(&m.previous_hash);
    h.finish()
}

/// True when the stored hash matches the recomputed one.
pub fn is_sealed(m: &Message) -> bool {
    compute_hash(m) == m.current_hash
}
