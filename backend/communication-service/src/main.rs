use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use communication_service::{
    config::{Config, StorageBackend},
    db, error, logging,
    ledger::{LedgerStore, MemoryLedgerStore, PostgresLedgerStore},
    middleware::RequestIdMiddleware,
    routes,
    services::{
        audit::spawn_chain_auditor, BlobStore, ConversationIndex, ConversationView, FsBlobStore,
    },
    state::AppState,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing_actix_web::TracingLogger;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(Config::from_env()?);

    // Shared storage answers conversation queries itself so every instance
    // sees the same summaries; the memory store keeps an in-process index.
    let (store, conversations): (Arc<dyn LedgerStore>, Arc<dyn ConversationView>) = match cfg
        .storage_backend
    {
        StorageBackend::Postgres => {
            let url = cfg
                .database_url
                .as_deref()
                .ok_or_else(|| error::AppError::Config("DATABASE_URL missing".into()))?;
            let pool = db::init_pool(url, cfg.db_max_connections).await?;
            db::run_migrations(&pool).await?;
            let store = Arc::new(PostgresLedgerStore::new(pool));
            (
                store.clone() as Arc<dyn LedgerStore>,
                store as Arc<dyn ConversationView>,
            )
        }
        StorageBackend::Memory => {
            tracing::warn!("using the in-memory ledger store; messages will not survive a restart");
            (
                Arc::new(MemoryLedgerStore::new()) as Arc<dyn LedgerStore>,
                Arc::new(ConversationIndex::new()) as Arc<dyn ConversationView>,
            )
        }
    };

    tokio::fs::create_dir_all(&cfg.attachments.dir)
        .await
        .map_err(|e| error::AppError::StartServer(format!("attachment dir: {e}")))?;
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(cfg.attachments.dir.clone()));

    let state = AppState::with_conversation_view(cfg.clone(), store, conversations, blobs);
    state.rebuild_index().await?;

    let auditor: Option<JoinHandle<()>> = (cfg.chain_audit_interval_secs > 0).then(|| {
        tracing::info!(
            interval_secs = cfg.chain_audit_interval_secs,
            "chain auditor enabled"
        );
        spawn_chain_auditor(
            state.ledger.clone(),
            Duration::from_secs(cfg.chain_audit_interval_secs),
        )
    });

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, backend = ?cfg.storage_backend, "starting communication-service");

    let server_state = state.clone();
    let result = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(RequestIdMiddleware)
            .app_data(web::Data::new(server_state.clone()))
            .configure(routes::configure)
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("server: {e}")));

    if let Some(handle) = auditor {
        handle.abort();
    }
    tracing::info!("communication-service stopped");
    result
}
