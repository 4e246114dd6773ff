pub mod conversation;
pub mod message;
pub mod verification;

pub use conversation::{conversation_id_for, ConversationSummary};
pub use message::{Attachment, Message, MessageType, NewMessage, ParticipantProfile, ParticipantType};
pub use verification::{BreakReason, ChainBreak, VerificationReport};
