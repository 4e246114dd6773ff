//! Client SDK for the communication ledger.
//!
//! * [`CommunicationClient`] talks to the HTTP endpoints and can re-walk a
//!   fetched conversation chain locally.
//! * [`RealtimeClient`] owns the single realtime connection of an
//!   application. The application root constructs it and passes it down.
//! * [`Reconciler`] turns realtime events and poll ticks into cache
//!   invalidations, so a missed push is only ever a delay.

pub mod api;
pub mod realtime;
pub mod sync;

pub use api::{CommunicationClient, MarkReadResult, OutgoingAttachment, OutgoingMessage};
pub use realtime::{ClientEvent, Listener, ListenerId, RealtimeClient, ReconnectPolicy};
pub use sync::{Invalidation, Reconciler};

use error_types::ErrorResponse;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{} ({}): {}", .0.status, .0.code, .0.message)]
    Api(ErrorResponse),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ClientError {
    /// The server's error envelope, when the failure came from the API.
    pub fn response(&self) -> Option<&ErrorResponse> {
        match self {
            ClientError::Api(body) => Some(body),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Api(body) => body.is_retryable(),
            ClientError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::WebSocket(err.to_string())
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
