use serde::{Deserialize, Serialize};

/// Wire envelope shared by every HTTP error the ledger returns.
///
/// ```ignore
/// let body = ErrorResponse::new(
///     "Conflict",
///     "conversation tail moved",
///     409,
///     error_types::CONFLICT_ERROR,
///     error_codes::APPEND_CONFLICT,
/// );
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short reason phrase ("Not Found", "Conflict", ...)
    pub error: String,

    /// Human readable explanation
    pub message: String,

    /// HTTP status code
    pub status: u16,

    /// Error family the client routes on, see [`error_types`]
    pub error_type: String,

    /// Stable machine code, see [`error_codes`]
    pub code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    /// Request id, when the request passed through the request-id middleware
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// RFC 3339
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, status: u16, error_type: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            status,
            error_type: error_type.to_string(),
            code: code.to_string(),
            details: None,
            trace_id: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_trace_id(mut self, trace_id: String) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Conflicts are the only family a client should retry verbatim.
    pub fn is_retryable(&self) -> bool {
        self.error_type == error_types::CONFLICT_ERROR
            || self.error_type == error_types::SERVICE_UNAVAILABLE_ERROR
    }
}

/// Stable error codes
pub mod error_codes {
    // Authentication
    pub const TOKEN_EXPIRED: &str = "TOKEN_EXPIRED";
    pub const TOKEN_INVALID: &str = "TOKEN_INVALID";
    pub const TOKEN_MISSING: &str = "TOKEN_MISSING";

    // Authorization
    pub const ROLE_NOT_ALLOWED: &str = "ROLE_NOT_ALLOWED";
    pub const NOT_CONVERSATION_MEMBER: &str = "NOT_CONVERSATION_MEMBER";
    pub const NOT_MESSAGE_RECEIVER: &str = "NOT_MESSAGE_RECEIVER";

    // Ledger
    pub const MESSAGE_INVALID: &str = "MESSAGE_INVALID";
    pub const ATTACHMENT_REJECTED: &str = "ATTACHMENT_REJECTED";
    pub const UPLOAD_TOO_LARGE: &str = "UPLOAD_TOO_LARGE";
    pub const CONVERSATION_NOT_FOUND: &str = "CONVERSATION_NOT_FOUND";
    pub const MESSAGE_NOT_FOUND: &str = "MESSAGE_NOT_FOUND";
    pub const APPEND_CONFLICT: &str = "APPEND_CONFLICT";
    pub const CHAIN_INTEGRITY_VIOLATION: &str = "CHAIN_INTEGRITY_VIOLATION";

    // Database/System
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
    pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
}

/// Error families
pub mod error_types {
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const AUTHENTICATION_ERROR: &str = "authentication_error";
    pub const AUTHORIZATION_ERROR: &str = "authorization_error";
    pub const NOT_FOUND_ERROR: &str = "not_found_error";
    pub const CONFLICT_ERROR: &str = "conflict_error";
    pub const INTEGRITY_ERROR: &str = "integrity_error";
    pub const SERVER_ERROR: &str = "server_error";
    pub const SERVICE_UNAVAILABLE_ERROR: &str = "service_unavailable_error";
}
