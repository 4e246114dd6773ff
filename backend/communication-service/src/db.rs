use crate::error::AppError;
use deadpool_postgres::tokio_postgres::{Config as PgConfig, NoTls};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use std::time::Duration;
use tracing::info;

const MIGRATIONS: &[(&str, &str)] = &[("0001_ledger", include_str!("../migrations/0001_ledger.sql"))];

/// Build and verify a deadpool-postgres pool.
pub async fn init_pool(database_url: &str, max_connections: usize) -> Result<Pool, AppError> {
    let pg_config: PgConfig = database_url
        .parse()
        .map_err(|e: tokio_postgres::Error| AppError::Config(format!("DATABASE_URL: {e}")))?;

    let manager = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    let pool = Pool::builder(manager)
        .max_size(max_connections)
        .build()
        .map_err(|e| AppError::StartServer(format!("build db pool: {e}")))?;

    let client = tokio::time::timeout(Duration::from_secs(10), pool.get())
        .await
        .map_err(|_| AppError::StartServer("database connection timed out".into()))??;
    client.simple_query("SELECT 1").await?;

    info!(max_connections, "database pool created and verified");
    Ok(pool)
}

/// Apply the bundled schema. Every statement is idempotent.
pub async fn run_migrations(pool: &Pool) -> Result<(), AppError> {
    let client = pool.get().await?;
    for (name, sql) in MIGRATIONS {
        client
            .batch_execute(sql)
            .await
            .map_err(|e| AppError::StartServer(format!("migration {name}: {e}")))?;
        info!(migration = %name, "migration applied");
    }
    Ok(())
}
