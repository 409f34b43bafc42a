//! Error types for the ChatWire client.

use thiserror::Error;

/// Errors that can occur when using the ChatWire client.
///
/// Connection failures and abnormal closes are *not* represented here — they
/// drive the reconnect policy and surface as `Disconnected` events on the
/// affected channel. This enum covers the conditions that are returned
/// synchronously to the caller.
#[derive(Debug, Error)]
pub enum ChatWireError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a wire payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an outbound send while the channel is not Open.
    #[error("channel is not open")]
    NotOpen,

    /// Outbound message was empty after trimming whitespace.
    #[error("message is empty after trimming")]
    EmptyMessage,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An HTTP request to the REST API failed.
    #[cfg(feature = "rest-api")]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The REST API returned a non-success status.
    #[cfg(feature = "rest-api")]
    #[error("api error ({status}): {message}")]
    Api {
        /// HTTP status code of the failed response.
        status: u16,
        /// Error message decoded from the response body.
        message: String,
    },
}

/// A specialized [`Result`] type for ChatWire client operations.
pub type Result<T> = std::result::Result<T, ChatWireError>;
