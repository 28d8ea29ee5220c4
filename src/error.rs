//! Error types for the Hakkero client.

use thiserror::Error;

use crate::validate::ValidationError;

/// Errors that can occur when using the Hakkero client.
#[derive(Debug, Error)]
pub enum HakkeroError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a JSON payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The server sent an envelope that does not match the wire contract.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Attempted an operation that requires a live channel, but none is connected.
    #[error("not connected to server")]
    NotConnected,

    /// Attempted to open a channel for a stage that already has one live.
    #[error("a {0} channel is already live")]
    ChannelBusy(&'static str),

    /// A one-shot HTTP request failed.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// An intent was issued outside the state in which it is valid.
    #[error("precondition violated: {0}")]
    Precondition(&'static str),

    /// A user-supplied identity field failed validation.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// An endpoint URL could not be built.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for HakkeroError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Fetch(err.to_string())
        }
    }
}

/// A specialized [`Result`] type for Hakkero client operations.
pub type Result<T> = std::result::Result<T, HakkeroError>;
