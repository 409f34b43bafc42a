//! Transport abstraction for the ChatWire realtime channels.
//!
//! The [`Transport`] trait defines one bidirectional text message connection.
//! The backend speaks text frames over WebSocket, but nothing in the core
//! depends on WebSocket specifics — implement the trait for any framed
//! bidirectional byte stream.
//!
//! Unlike a plain text pipe, close information matters here: the reconnect
//! policy distinguishes normal closes (codes 1000/1001) from abnormal ones,
//! so [`Transport::recv`] surfaces remote closes as [`Frame::Closed`] with
//! the close code and reason attached.
//!
//! Connection *setup* is the job of a [`Connector`]: the socket wrapper
//! re-establishes the transport after an abnormal close, so it owns a
//! connector rather than a one-shot connected transport.
//!
//! # Implementing a custom transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use chatwire_client::error::ChatWireError;
//! use chatwire_client::transport::{Frame, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), ChatWireError> {
//!         // Send one complete text message
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<Frame, ChatWireError>> {
//!         // Return the next text frame, a close frame, or None when the
//!         // stream ends without a close handshake
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), ChatWireError> {
//!         // Gracefully shut down the connection
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::ChatWireError;

/// Normal closure close code.
pub const NORMAL_CLOSE: u16 = 1000;
/// Going-away close code (tab closed, server restarting).
pub const GOING_AWAY: u16 = 1001;
/// Abnormal closure close code; also used when the stream ends with no close
/// frame at all.
pub const ABNORMAL_CLOSE: u16 = 1006;

/// Close code and reason attached to a connection termination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// WebSocket-style close code.
    pub code: u16,
    /// Human-readable close reason; may be empty.
    pub reason: String,
}

impl CloseInfo {
    /// A normal (code 1000) close with the given reason.
    pub fn normal(reason: impl Into<String>) -> Self {
        Self {
            code: NORMAL_CLOSE,
            reason: reason.into(),
        }
    }

    /// An abnormal (code 1006) close with the given reason.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: ABNORMAL_CLOSE,
            reason: reason.into(),
        }
    }

    /// Whether this close belongs to the normal/going-away set that must not
    /// trigger a reconnect.
    pub fn is_normal(&self) -> bool {
        matches!(self.code, NORMAL_CLOSE | GOING_AWAY)
    }
}

/// One inbound event from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete text message.
    Text(String),
    /// The remote side closed the connection.
    Closed(CloseInfo),
}

/// A bidirectional text message transport.
///
/// # Object safety
///
/// The trait is object-safe; connectors hand out `Box<dyn Transport>`.
///
/// # Cancel safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because the socket loop
/// polls it inside `tokio::select!`. If `recv` is cancelled before
/// completion, calling it again must not lose data.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one complete text message.
    ///
    /// # Errors
    ///
    /// Returns [`ChatWireError::TransportSend`] if the message could not be
    /// sent (connection broken, write buffer full).
    async fn send(&mut self, message: String) -> Result<(), ChatWireError>;

    /// Receive the next inbound event.
    ///
    /// Returns:
    /// - `Some(Ok(Frame::Text(..)))` — a complete message arrived
    /// - `Some(Ok(Frame::Closed(..)))` — the remote side closed, with code/reason
    /// - `Some(Err(e))` — a transport error occurred
    /// - `None` — the stream ended without a close handshake (treated as an
    ///   abnormal close by the socket wrapper)
    ///
    /// # Cancel safety
    ///
    /// This method **MUST** be cancel-safe (see [trait documentation](Transport)).
    async fn recv(&mut self) -> Option<Result<Frame, ChatWireError>>;

    /// Close the transport gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Implementations should
    /// still release resources when it does.
    async fn close(&mut self) -> Result<(), ChatWireError>;
}

/// Establishes transports for a socket wrapper.
///
/// The socket wrapper calls [`connect`](Connector::connect) on first open and
/// again for each reconnect attempt, always with the same URL. Implementors
/// should be cheap to call repeatedly and must not cache broken connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a new transport to `url`.
    ///
    /// # Errors
    ///
    /// Any error is treated as a connect failure by the socket wrapper, which
    /// reports it as a connectivity signal and applies the reconnect policy.
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, ChatWireError>;
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn normal_and_going_away_codes_are_normal() {
        assert!(CloseInfo { code: NORMAL_CLOSE, reason: String::new() }.is_normal());
        assert!(CloseInfo { code: GOING_AWAY, reason: String::new() }.is_normal());
    }

    #[test]
    fn other_codes_are_abnormal() {
        for code in [1002, 1006, 1011, 4000] {
            assert!(!CloseInfo { code, reason: String::new() }.is_normal());
        }
    }

    #[test]
    fn constructors_set_expected_codes() {
        assert_eq!(CloseInfo::normal("bye").code, NORMAL_CLOSE);
        assert_eq!(CloseInfo::abnormal("lost").code, ABNORMAL_CLOSE);
    }
}
