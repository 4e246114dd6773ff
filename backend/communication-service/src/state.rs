use crate::{
    config::Config,
    ledger::LedgerStore,
    middleware::JwtAuth,
    services::{
        AttachmentService, BlobStore, ConversationIndex, ConversationView, LedgerService,
        RealtimeNotifier, RetryPolicy,
    },
    websocket::ConnectionRegistry,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ledger: Arc<LedgerService>,
    pub attachments: Arc<AttachmentService>,
    pub registry: ConnectionRegistry,
    pub jwt: Arc<JwtAuth>,
}

impl AppState {
    /// Wire the services over the given store and blob backend, with an
    /// in-process conversation index. The index starts empty; call
    /// [`AppState::rebuild_index`] when the store already holds messages.
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn LedgerStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self::with_conversation_view(config, store, Arc::new(ConversationIndex::new()), blobs)
    }

    pub fn with_conversation_view(
        config: Arc<Config>,
        store: Arc<dyn LedgerStore>,
        conversations: Arc<dyn ConversationView>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let registry = ConnectionRegistry::new();
        let ledger = LedgerService::new(
            store,
            conversations,
            RealtimeNotifier::new(registry.clone()),
            RetryPolicy {
                max_attempts: config.append_max_attempts,
                backoff: Duration::from_millis(config.append_retry_backoff_ms),
            },
        );

        Self {
            attachments: Arc::new(AttachmentService::new(&config.attachments, blobs)),
            jwt: Arc::new(JwtAuth::new(&config.jwt_secret)),
            ledger: Arc::new(ledger),
            registry,
            config,
        }
    }

    pub async fn rebuild_index(&self) -> Result<(), crate::error::AppError> {
        self.ledger
            .index()
            .rebuild(self.ledger.store().as_ref())
            .await
    }
}
