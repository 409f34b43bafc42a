//! # Chatwire Client
//!
//! Transport-agnostic Rust client for a realtime chat service speaking JSON
//! text frames over WebSockets.
//!
//! The service exposes two sockets per logged-in user: a per-room socket
//! carrying chat traffic for the room currently on screen, and an app-wide
//! presence socket carrying message notifications and online-status updates.
//! This crate manages both, including the reconnect policy for dropped
//! connections.
//!
//! ## Features
//!
//! - **Transport-agnostic** — implement the [`Transport`] trait for any backend
//! - **WebSocket built-in** — default `transport-websocket` feature provides
//!   [`WebSocketTransport`] and [`WsConnector`]
//! - **Event-driven** — typed [`RoomEvent`]s and [`PresenceUpdate`]s via
//!   bounded channels
//! - **Auto-reconnect** — abnormal disconnects retry once after a fixed delay
//!   while the session token is valid
//! - **REST client** — default `rest-api` feature provides [`ApiClient`] for
//!   login, conversations, and message history
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), chatwire_client::ChatWireError> {
//! use std::sync::Arc;
//! use chatwire_client::{
//!     Identity, MemorySession, PresenceChannel, RoomChannel, RoomEvent,
//!     SocketConfig, WsConnector,
//! };
//!
//! let identity = Identity::new("1", "alice");
//! let session = Arc::new(MemorySession::new(identity, "jwt-token"));
//! let connector = Arc::new(WsConnector::new());
//!
//! let (mut presence, _updates) = PresenceChannel::new(
//!     "ws://localhost:8080",
//!     session.clone(),
//!     connector.clone(),
//!     SocketConfig::new(),
//! );
//! presence.start("1").await;
//!
//! let (mut room, mut events) = RoomChannel::new(
//!     "ws://localhost:8080",
//!     session,
//!     connector,
//!     SocketConfig::new(),
//! );
//! room.join("42").await;
//! room.send_message("hello")?;
//!
//! while let Some(event) = events.recv().await {
//!     if let RoomEvent::Message(chat) = event {
//!         println!("[{}] {}", chat.message.username, chat.message.content);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod presence;
pub mod protocol;
pub mod room;
pub mod session;
pub mod socket;
pub mod transport;
pub mod transports;

#[cfg(feature = "rest-api")]
pub mod rest;

// Re-export primary types for ergonomic imports.
pub use error::ChatWireError;
pub use presence::{Notification, PresenceChannel, PresenceUpdate};
pub use protocol::{ChatEvent, ChatMessage, OnlineStatus};
pub use room::{RoomChannel, RoomEvent};
pub use session::{
    Identity, KvStore, MemoryKvStore, MemorySession, RoomInfo, RoomRegistry, SessionDirectory,
};
pub use socket::{ConnectionState, Socket, SocketConfig, SocketEvent};
pub use transport::{CloseInfo, Connector, Frame, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketTransport, WsConnector};

#[cfg(feature = "rest-api")]
pub use rest::ApiClient;
