use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Postgres,
}

impl FromStr for StorageBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            other => Err(AppError::Config(format!(
                "STORAGE_BACKEND must be memory or postgres, got {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttachmentConfig {
    pub dir: PathBuf,
    /// Prefix of the public url; the blob hash is appended
    pub public_base_url: String,
    pub max_bytes: usize,
    pub max_count: usize,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub storage_backend: StorageBackend,
    pub database_url: Option<String>,
    pub db_max_connections: usize,
    pub jwt_secret: String,
    pub attachments: AttachmentConfig,
    /// Total attempts per append, first try included
    pub append_max_attempts: u32,
    pub append_retry_backoff_ms: u64,
    /// 0 disables the background chain auditor
    pub chain_audit_interval_secs: u64,
    pub ws_heartbeat_interval_secs: u64,
    pub ws_client_timeout_secs: u64,
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{name} has an invalid value: {raw}"))),
        _ => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());
        let storage_backend = match env::var("STORAGE_BACKEND") {
            Ok(raw) if !raw.is_empty() => raw.parse()?,
            _ if database_url.is_some() => StorageBackend::Postgres,
            _ => StorageBackend::Memory,
        };
        if storage_backend == StorageBackend::Postgres && database_url.is_none() {
            return Err(AppError::Config(
                "DATABASE_URL missing (required for the postgres backend)".into(),
            ));
        }

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| AppError::Config("JWT_SECRET missing".into()))?;
        if jwt_secret.len() < 32 {
            return Err(AppError::Config(
                "JWT_SECRET must be at least 32 bytes".into(),
            ));
        }

        let attachments = AttachmentConfig {
            dir: PathBuf::from(
                env::var("ATTACHMENT_DIR").unwrap_or_else(|_| "./data/attachments".to_string()),
            ),
            public_base_url: env::var("ATTACHMENT_PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "/attachments".to_string())
                .trim_end_matches('/')
                .to_string(),
            max_bytes: parse_var("ATTACHMENT_MAX_BYTES", 10 * 1024 * 1024)?,
            max_count: parse_var("ATTACHMENT_MAX_COUNT", 5)?,
        };

        let append_max_attempts: u32 = parse_var("APPEND_MAX_ATTEMPTS", 2)?;
        if append_max_attempts == 0 {
            return Err(AppError::Config(
                "APPEND_MAX_ATTEMPTS must be at least 1".into(),
            ));
        }

        Ok(Self {
            port: parse_var("PORT", 8080)?,
            storage_backend,
            database_url,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 16)?,
            jwt_secret,
            attachments,
            append_max_attempts,
            append_retry_backoff_ms: parse_var("APPEND_RETRY_BACKOFF_MS", 25)?,
            chain_audit_interval_secs: parse_var("CHAIN_AUDIT_INTERVAL_SECS", 0)?,
            ws_heartbeat_interval_secs: parse_var("WS_HEARTBEAT_INTERVAL_SECS", 5)?,
            ws_client_timeout_secs: parse_var("WS_CLIENT_TIMEOUT_SECS", 30)?,
        })
    }

    /// In-memory configuration for tests and local drills.
    pub fn test_defaults() -> Self {
        Self {
            port: 0,
            storage_backend: StorageBackend::Memory,
            database_url: None,
            db_max_connections: 4,
            jwt_secret: "test-secret-key-that-is-at-least-32-bytes".to_string(),
            attachments: AttachmentConfig {
                dir: std::env::temp_dir().join("communication-service-attachments"),
                public_base_url: "/attachments".to_string(),
                max_bytes: 10 * 1024 * 1024,
                max_count: 5,
            },
            append_max_attempts: 2,
            append_retry_backoff_ms: 1,
            chain_audit_interval_secs: 0,
            ws_heartbeat_interval_secs: 5,
            ws_client_timeout_secs: 30,
        }
    }
}
