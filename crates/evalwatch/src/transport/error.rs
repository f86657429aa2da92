//! Push-channel error types.

use thiserror::Error;

/// Errors raised while opening or reading a push channel.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid channel endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("Failed to connect to '{url}': {message}")]
    ConnectFailed { url: String, message: String },

    #[error("Channel protocol error: {0}")]
    Protocol(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::Protocol(err.to_string())
    }
}

/// A channel payload that could not be decoded into an event.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Payload is not a JSON object")]
    NotAnObject,

    #[error("Invalid '{kind}' event: {message}")]
    InvalidEvent { kind: String, message: String },
}
