use crate::middleware::error_handling;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;
use uuid::Uuid;

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        error_handling::into_response(self)
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("attachment rejected: {0}")]
    AttachmentRejected(String),

    #[error("attachment too large: {0}")]
    PayloadTooLarge(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conversation {0} not found")]
    ConversationNotFound(Uuid),

    #[error("message {0} not found")]
    MessageNotFound(Uuid),

    #[error("append to conversation {conversation_id} lost the tail race {attempts} times")]
    Conflict { conversation_id: Uuid, attempts: u32 },

    #[error("chain integrity violation in conversation {conversation_id} at sequence {broken_at}: {reason}")]
    ChainIntegrity {
        conversation_id: Uuid,
        broken_at: i64,
        reason: String,
    },

    #[error("database error: {0}")]
    Database(String),

    #[error("attachment storage error: {0}")]
    Storage(String),

    #[error("internal server error")]
    Internal,
}

impl From<tokio_postgres::Error> for AppError {
    fn from(e: tokio_postgres::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for AppError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Storage(e.to_string())
    }
}

impl AppError {
    /// Conflicts and pool exhaustion go away on their own; everything else does not.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Conflict { .. } => true,
            AppError::Database(msg) => {
                msg.contains("Timeout") || msg.contains("Closed") || msg.contains("Io")
            }
            _ => false,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) | AppError::AttachmentRejected(_) => 400,
            AppError::Unauthorized(_) => 401,
            AppError::Forbidden(_) => 403,
            AppError::ConversationNotFound(_) | AppError::MessageNotFound(_) => 404,
            AppError::Conflict { .. } => 409,
            AppError::PayloadTooLarge(_) => 413,
            AppError::ChainIntegrity { .. }
            | AppError::Database(_)
            | AppError::Storage(_)
            | AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Internal => 500,
        }
    }
}
