//! Error types for clipwire.

use std::sync::Arc;

use thiserror::Error;

/// Main error type for all clipwire operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (malformed body, wrong field type, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Encoded body does not fit the 16-bit length header.
    #[error("Frame body of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// A sync-response announced more trailing bytes than the reader accepts.
    #[error("Sync payload of {size} bytes exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// Body carried a `message_id` outside the message vocabulary.
    #[error("Unknown message type: {0}")]
    UnknownMessageType(i64),

    /// A required body field was absent or had the wrong type.
    #[error("Missing or invalid field: {0}")]
    MissingField(&'static str),

    /// Connection closed (locally or by the peer).
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation needs a live connection.
    #[error("Not connected")]
    NotConnected,

    /// The authenticate rendezvous passed its deadline.
    #[error("Authentication timed out")]
    AuthTimeout,

    /// Task was cancelled before it ran.
    #[error("Task cancelled")]
    Cancelled,

    /// A reactor stage stopped its chain.
    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        stage: String,
        #[source]
        source: Arc<Error>,
    },

    /// The task's work returned an error.
    #[error("Task failed: {0}")]
    TaskFailed(Arc<Error>),

    /// Invalid configuration.
    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error came from the transport rather than from protocol content.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::ConnectionClosed | Error::NotConnected
        )
    }

    /// Whether the inbound stream cannot be read past this error, because
    /// bytes belonging to the failed frame are still unread.
    pub fn desyncs_stream(&self) -> bool {
        self.is_transport() || matches!(self, Error::PayloadTooLarge { .. })
    }
}

/// Result type alias using clipwire's Error.
pub type Result<T> = std::result::Result<T, Error>;
