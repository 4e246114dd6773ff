use super::hashing::{compute_hash, GENESIS_HASH};
use crate::models::{BreakReason, ChainBreak, Message, VerificationReport};
use uuid::Uuid;

/// Walk an ordered conversation and return the earliest break, if any.
///
/// A message's successor attests it: when message `k` has been altered the
/// break is reported at `k + 1`, unless `k` is the last message or its own
/// link fields are what changed.
pub fn find_break(conversation_id: Uuid, messages: &[Message]) -> Option<ChainBreak> {
    let broken = |m: &Message, reason| {
        Some(ChainBreak {
            sequence_number: m.sequence_number,
            reason,
        })
    };

    let mut predecessor_hash: Option<String> = None;
    for (position, message) in messages.iter().enumerate() {
        if message.sequence_number != position as i64 {
            return broken(message, BreakReason::SequenceGap);
        }
        if message.conversation_id != conversation_id {
            return broken(message, BreakReason::ConversationMismatch);
        }

        match predecessor_hash.as_deref() {
            None => {
                if message.previous_hash != GENESIS_HASH {
                    return broken(message, BreakReason::GenesisMismatch);
                }
            }
            Some(expected) => {
                let prev = &messages[position - 1];
                if prev.current_hash != expected {
                    return broken(message, BreakReason::HashMismatch);
                }
                if message.previous_hash != expected {
                    return broken(message, BreakReason::LinkMismatch);
                }
            }
        }

        predecessor_hash = Some(compute_hash(message));
    }

    if let (Some(last), Some(expected)) = (messages.last(), predecessor_hash.as_deref()) {
        if last.current_hash != expected {
            return broken(last, BreakReason::HashMismatch);
        }
    }

    None
}

/// Pure verification over an already-loaded, ordered conversation.
pub fn verify_chain(conversation_id: Uuid, messages: &[Message]) -> VerificationReport {
    VerificationReport::from_walk(
        conversation_id,
        messages.len(),
        find_break(conversation_id, messages),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::hashing::compute_hash;
    use crate::models::{MessageType, ParticipantType};
    use chrono::Utc;

    fn chain(len: usize) -> (Uuid, Vec<Message>) {
        let conversation_id = Uuid::new_v4();
        let mut messages: Vec<Message> = Vec::with_capacity(len);
        for seq in 0..len {
            let previous_hash = messages
                .last()
                .map(|m| m.current_hash.clone())
                .unwrap_or_else(|| GENESIS_HASH.to_string());
            let mut m = Message {
                id: Uuid::new_v4(),
                conversation_id,
                sender_id: "bank-1".into(),
                sender_type: ParticipantType::Bloodbank,
                sender_name: "Bank".into(),
                receiver_id: "hospital-1".into(),
                receiver_name: "Hospital".into(),
                message_type: MessageType::Text,
                content: format!("message {seq}"),
                attachments: vec![],
                sos_id: None,
                is_read: false,
                read_at: None,
                sequence_number: seq as i64,
                previous_hash,
                current_hash: String::new(),
                created_at: crate::ledger::hashing::truncate_timestamp(Utc::now()),
            };
            m.current_hash = compute_hash(&m);
            messages.push(m);
        }
        (conversation_id, messages)
    }

    #[test]
    fn intact_chain_is_valid() {
        let (id, messages) = chain(4);
        let report = verify_chain(id, &messages);
        assert!(report.is_valid);
        assert_eq!(report.message_count, 4);
        assert_eq!(report.broken_at, None);
    }

    #[test]
    fn empty_chain_is_trivially_valid() {
        let report = verify_chain(Uuid::new_v4(), &[]);
        assert!(report.is_valid);
        assert_eq!(report.message_count, 0);
    }

    #[test]
    fn tampered_content_is_reported_at_successor() {
        let (id, mut messages) = chain(3);
        messages[0].content = "altered".into();

        let report = verify_chain(id, &messages);
        assert!(!report.is_valid);
        assert_eq!(report.broken_at, Some(1));
        assert_eq!(report.reason, Some(BreakReason::HashMismatch));
    }

    #[test]
    fn tampered_tail_is_reported_at_tail() {
        let (id, mut messages) = chain(3);
        messages[2].content = "altered".into();

        let report = verify_chain(id, &messages);
        assert_eq!(report.broken_at, Some(2));
    }

    #[test]
    fn resealed_tamper_is_caught_by_the_link() {
        let (id, mut messages) = chain(3);
        messages[1].content = "altered".into();
        messages[1].current_hash = compute_hash(&messages[1]);

        let report = verify_chain(id, &messages);
        assert_eq!(report.broken_at, Some(2));
        assert_eq!(report.reason, Some(BreakReason::LinkMismatch));
    }

    #[test]
    fn forged_genesis_link_is_reported_at_zero() {
        let (id, mut messages) = chain(2);
        messages[0].previous_hash = "1".repeat(64);

        let report = verify_chain(id, &messages);
        assert_eq!(report.broken_at, Some(0));
        assert_eq!(report.reason, Some(BreakReason::GenesisMismatch));
    }

    #[test]
    fn missing_message_is_a_sequence_gap() {
        let (id, mut messages) = chain(4);
        messages.remove(1);

        let report = verify_chain(id, &messages);
        assert_eq!(report.broken_at, Some(2));
        assert_eq!(report.reason, Some(BreakReason::SequenceGap));
    }

    #[test]
    fn earliest_break_wins() {
        let (id, mut messages) = chain(5);
        messages[3].content = "late".into();
        messages[1].content = "early".into();

        assert_eq!(verify_chain(id, &messages).broken_at, Some(2));
    }

    #[test]
    fn foreign_message_is_rejected() {
        let (id, mut messages) = chain(2);
        messages[1].conversation_id = Uuid::new_v4();

        let report = verify_chain(id, &messages);
        assert_eq!(report.reason, Some(BreakReason::ConversationMismatch));
    }
}
