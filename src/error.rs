//! Error types for the streaming client library.

use thiserror::Error;
use tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue;

/// Error type for streaming client operations.
#[derive(Error, Debug)]
pub enum Error {
    /// WebSocket connection error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The endpoint URL could not be built.
    #[error("invalid endpoint: {0}")]
    Url(#[from] url::ParseError),

    /// The API key or another header could not be encoded as a header value.
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),

    /// No socket is open and none could be obtained.
    #[error("no valid connection")]
    NoConnection,

    /// Connection timeout.
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// Every dial attempt allowed by the retry policy failed.
    #[error("connection failed after {attempts} attempts")]
    RetriesExhausted {
        /// Number of dial attempts made.
        attempts: usize,
    },

    /// Transport failure known only by its description.
    #[error("transport error: {0}")]
    Transport(String),

    /// The platform violated the stream protocol.
    #[error("protocol error: {0}")]
    Protocol(String),
}
