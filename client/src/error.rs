//! Error types for the marksync client.

use std::time::Duration;

/// Errors that abort a sync pass or a local operation.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The request could not be sent or the connection dropped
    #[error("network error: {0}")]
    Network(String),

    /// The remote answered with a non-2xx status
    #[error("remote returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("websocket error: {0}")]
    WebSocket(String),

    /// The remote answered with a body that could not be decoded
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The local store could not be read or written
    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Engine(#[from] marksync_engine::Error),
}

impl SyncError {
    /// Whether a later attempt may succeed without intervention.
    ///
    /// Engine errors are never retryable: a snapshot from a newer schema or
    /// an invalid bookmark stays that way.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network(_)
            | SyncError::Timeout(_)
            | SyncError::WebSocket(_)
            | SyncError::Malformed(_)
            | SyncError::Storage(_) => true,
            SyncError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            SyncError::Engine(_) => false,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not report the configured duration
            SyncError::Timeout(Duration::ZERO)
        } else if err.is_decode() {
            SyncError::Malformed(err.to_string())
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SyncError::WebSocket(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Storage(err.to_string())
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, SyncError>;
