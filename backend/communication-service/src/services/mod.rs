pub mod attachments;
pub mod audit;
pub mod conversation_index;
pub mod message_service;
pub mod notifier;

pub use attachments::{AttachmentService, BlobStore, FsBlobStore, MemoryBlobStore, UploadedFile};
pub use conversation_index::{ConversationIndex, ConversationView};
pub use message_service::{LedgerService, RetryPolicy};
pub use notifier::RealtimeNotifier;
