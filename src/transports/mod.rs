//! Built-in [`Transport`](crate::transport::Transport) implementations.
//!
//! Currently only a WebSocket transport is provided, behind the
//! `transport-websocket` feature (enabled by default). Custom transports can
//! be plugged in by implementing [`Transport`](crate::transport::Transport)
//! and [`Connector`](crate::transport::Connector) directly.

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketTransport, WsConnector};
