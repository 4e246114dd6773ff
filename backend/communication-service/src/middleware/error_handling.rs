use crate::error::AppError;
use actix_web::{http::StatusCode, HttpResponse};
use error_types::{error_codes, error_types as kinds, ErrorResponse};

/// Map domain errors to the shared wire envelope
pub fn map_error(err: &AppError) -> (StatusCode, ErrorResponse) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let (error_type, code) = match err {
        AppError::Validation(_) => (kinds::VALIDATION_ERROR, error_codes::MESSAGE_INVALID),
        AppError::AttachmentRejected(_) => {
            (kinds::VALIDATION_ERROR, error_codes::ATTACHMENT_REJECTED)
        }
        AppError::PayloadTooLarge(_) => (kinds::VALIDATION_ERROR, error_codes::UPLOAD_TOO_LARGE),
        AppError::Unauthorized(reason) if reason.contains("expired") => {
            (kinds::AUTHENTICATION_ERROR, error_codes::TOKEN_EXPIRED)
        }
        AppError::Unauthorized(reason) if reason.contains("missing") => {
            (kinds::AUTHENTICATION_ERROR, error_codes::TOKEN_MISSING)
        }
        AppError::Unauthorized(_) => (kinds::AUTHENTICATION_ERROR, error_codes::TOKEN_INVALID),
        AppError::Forbidden(reason) if reason.contains("role") => {
            (kinds::AUTHORIZATION_ERROR, error_codes::ROLE_NOT_ALLOWED)
        }
        AppError::Forbidden(reason) if reason.contains("receiver") => {
            (kinds::AUTHORIZATION_ERROR, error_codes::NOT_MESSAGE_RECEIVER)
        }
        AppError::Forbidden(_) => (
            kinds::AUTHORIZATION_ERROR,
            error_codes::NOT_CONVERSATION_MEMBER,
        ),
        AppError::ConversationNotFound(_) => {
            (kinds::NOT_FOUND_ERROR, error_codes::CONVERSATION_NOT_FOUND)
        }
        AppError::MessageNotFound(_) => (kinds::NOT_FOUND_ERROR, error_codes::MESSAGE_NOT_FOUND),
        AppError::Conflict { .. } => (kinds::CONFLICT_ERROR, error_codes::APPEND_CONFLICT),
        AppError::ChainIntegrity { .. } => (
            kinds::INTEGRITY_ERROR,
            error_codes::CHAIN_INTEGRITY_VIOLATION,
        ),
        AppError::Database(_) => (kinds::SERVER_ERROR, error_codes::DATABASE_ERROR),
        AppError::Storage(_) => (kinds::SERVER_ERROR, error_codes::STORAGE_ERROR),
        AppError::Config(_) | AppError::StartServer(_) | AppError::Internal => {
            (kinds::SERVER_ERROR, error_codes::INTERNAL_SERVER_ERROR)
        }
    };

    // Backend details stay in the logs.
    let message = match err {
        AppError::Database(_) | AppError::Storage(_) => "storage backend failure".to_string(),
        other => other.to_string(),
    };

    let response = ErrorResponse::new(
        status.canonical_reason().unwrap_or("Error"),
        &message,
        status.as_u16(),
        error_type,
        code,
    );

    (status, response)
}

pub fn into_response(err: &AppError) -> HttpResponse {
    let (status, response) = map_error(err);
    if status.is_server_error() {
        tracing::error!(error = %err, code = %response.code, "request failed");
    } else {
        tracing::debug!(error = %err, code = %response.code, "request rejected");
    }
    HttpResponse::build(status).json(response)
}
