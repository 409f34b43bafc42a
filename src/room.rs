//! The per-conversation chat channel.
//!
//! [`RoomChannel`] binds one [`Socket`](crate::socket::Socket) to one
//! conversation room at a time. Inbound frames are decoded into
//! [`ChatEvent`]s with ownership attributed against the session identity;
//! outbound messages are trimmed and sent as raw text (the backend wraps
//! them into JSON server-side).

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{ChatWireError, Result};
use crate::protocol::{self, ChatEvent, ChatMessage};
use crate::session::SessionDirectory;
use crate::socket::{ConnectionState, Socket, SocketConfig, SocketEvent};
use crate::transport::Connector;

/// Events delivered to the consumer of a [`RoomChannel`].
///
/// Messages are an ordered, append-only stream per connection; connectivity
/// changes interleave as status signals.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    /// The room socket reached Open.
    Connected,
    /// One inbound chat message.
    Message(ChatEvent),
    /// The room socket disconnected; `will_retry` is `true` when a reconnect
    /// is scheduled.
    Disconnected {
        /// Close code.
        code: u16,
        /// Close reason; may be empty.
        reason: String,
        /// Whether a reconnect attempt is scheduled.
        will_retry: bool,
    },
}

struct ActiveRoom {
    room_id: String,
    socket: Socket,
    forwarder: tokio::task::JoinHandle<()>,
}

/// A chat channel bound to at most one room at a time.
///
/// Created via [`RoomChannel::new`], which returns the channel together with
/// the [`RoomEvent`] receiver. The receiver outlives individual rooms:
/// leaving one room and joining another keeps delivering on the same stream.
pub struct RoomChannel {
    endpoint: String,
    session: Arc<dyn SessionDirectory>,
    connector: Arc<dyn Connector>,
    config: SocketConfig,
    event_tx: mpsc::Sender<RoomEvent>,
    current: Option<ActiveRoom>,
}

impl RoomChannel {
    /// Create a room channel against `endpoint` (e.g. `ws://localhost:8080`).
    #[must_use = "the event receiver must be consumed to observe the room"]
    pub fn new(
        endpoint: impl Into<String>,
        session: Arc<dyn SessionDirectory>,
        connector: Arc<dyn Connector>,
        config: SocketConfig,
    ) -> (Self, mpsc::Receiver<RoomEvent>) {
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<RoomEvent>(capacity);
        let channel = Self {
            endpoint: endpoint.into(),
            session,
            connector,
            config,
            event_tx,
            current: None,
        };
        (channel, event_rx)
    }

    /// Join `room_id`.
    ///
    /// Idempotent: joining the room that is already live is a no-op. Joining
    /// a different room first closes the previous socket manually (no
    /// reconnect), then opens a new one.
    pub async fn join(&mut self, room_id: &str) {
        if let Some(active) = &self.current {
            if active.room_id == room_id && active.socket.is_alive() {
                debug!(room_id, "already joined, ignoring");
                return;
            }
        }
        self.leave().await;

        let identity = self.session.identity();
        let url = protocol::room_url(&self.endpoint, room_id, &identity);
        debug!(room_id, %url, "joining room");

        let (socket, socket_rx) = Socket::open(
            Arc::clone(&self.connector),
            url,
            Arc::clone(&self.session),
            self.config.clone(),
        );
        let forwarder = tokio::spawn(forward_room_events(
            socket_rx,
            self.event_tx.clone(),
            identity.id,
        ));
        self.current = Some(ActiveRoom {
            room_id: room_id.to_owned(),
            socket,
            forwarder,
        });
    }

    /// Send a chat message to the joined room.
    ///
    /// The text is trimmed; the trimmed raw text is the payload — not JSON,
    /// per the backend contract.
    ///
    /// # Errors
    ///
    /// Returns [`ChatWireError::EmptyMessage`] when the text is empty after
    /// trimming (nothing touches the network), or [`ChatWireError::NotOpen`]
    /// when no room is joined or the socket is not Open.
    pub fn send_message(&self, text: &str) -> Result<()> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ChatWireError::EmptyMessage);
        }
        let active = self.current.as_ref().ok_or(ChatWireError::NotOpen)?;
        active.socket.send(trimmed.to_owned())
    }

    /// Leave the current room: manual close, no reconnect. No-op when no
    /// room is joined.
    pub async fn leave(&mut self) {
        if let Some(mut active) = self.current.take() {
            debug!(room_id = %active.room_id, "leaving room");
            active.socket.close().await;
            // Drain the forwarder so this room's final Disconnected lands
            // on the stream before any event from a later join.
            let timeout = self.config.shutdown_timeout;
            if tokio::time::timeout(timeout, &mut active.forwarder)
                .await
                .is_err()
            {
                warn!("room event forwarder did not drain in time; aborting");
                active.forwarder.abort();
            }
        }
    }

    /// The currently joined room id, if any.
    pub fn room_id(&self) -> Option<&str> {
        self.current.as_ref().map(|active| active.room_id.as_str())
    }

    /// Connection state of the room socket; `Idle` when no room is joined.
    pub fn state(&self) -> ConnectionState {
        self.current
            .as_ref()
            .map_or(ConnectionState::Idle, |active| active.socket.state())
    }
}

impl std::fmt::Debug for RoomChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomChannel")
            .field("endpoint", &self.endpoint)
            .field("room_id", &self.room_id())
            .field("state", &self.state())
            .finish()
    }
}

/// Decode socket events into room events. Malformed frames are dropped and
/// logged; the stream itself never fails.
async fn forward_room_events(
    mut socket_rx: mpsc::Receiver<SocketEvent>,
    event_tx: mpsc::Sender<RoomEvent>,
    self_id: String,
) {
    while let Some(event) = socket_rx.recv().await {
        let forwarded = match event {
            SocketEvent::Connected => RoomEvent::Connected,
            SocketEvent::Disconnected {
                code,
                reason,
                will_retry,
            } => RoomEvent::Disconnected {
                code,
                reason,
                will_retry,
            },
            SocketEvent::Frame(text) => match serde_json::from_str::<ChatMessage>(&text) {
                Ok(message) => RoomEvent::Message(ChatEvent::tag(message, &self_id)),
                Err(e) => {
                    warn!(error = %e, raw = %text, "dropping malformed chat frame");
                    continue;
                }
            },
        };
        if event_tx.send(forwarded).await.is_err() {
            debug!("room event receiver dropped");
            break;
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

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
    use crate::session::Identity;
    use crate::transport::{Frame, Transport};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    type ScriptedFrame = Option<std::result::Result<Frame, ChatWireError>>;

    struct MockTransport {
        incoming: VecDeque<ScriptedFrame>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> std::result::Result<(), ChatWireError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<Frame, ChatWireError>> {
            if let Some(item) = self.incoming.pop_front() {
                item
            } else {
                std::future::pending().await
            }
        }

        async fn close(&mut self) -> std::result::Result<(), ChatWireError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Replays one frame script per connect; records URLs and sends.
    struct MockConnector {
        scripts: StdMutex<VecDeque<Vec<ScriptedFrame>>>,
        attempts: Arc<AtomicUsize>,
        urls: Arc<StdMutex<Vec<String>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicUsize>,
    }

    impl MockConnector {
        fn new(scripts: Vec<Vec<ScriptedFrame>>) -> Arc<Self> {
            Arc::new(Self {
                scripts: StdMutex::new(VecDeque::from(scripts)),
                attempts: Arc::new(AtomicUsize::new(0)),
                urls: Arc::new(StdMutex::new(Vec::new())),
                sent: Arc::new(StdMutex::new(Vec::new())),
                closed: Arc::new(AtomicUsize::new(0)),
            })
        }

        fn endless() -> Arc<Self> {
            Self::new(vec![vec![], vec![], vec![], vec![]])
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self, url: &str) -> std::result::Result<Box<dyn Transport>, ChatWireError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().unwrap().push(url.to_owned());
            let frames = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
            Ok(Box::new(MockTransport {
                incoming: VecDeque::from(frames),
                sent: Arc::clone(&self.sent),
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    struct TestSession;

    impl SessionDirectory for TestSession {
        fn identity(&self) -> Identity {
            Identity::new("1", "alice")
        }

        fn token_valid(&self) -> bool {
            true
        }
    }

    fn new_channel(connector: Arc<MockConnector>) -> (RoomChannel, mpsc::Receiver<RoomEvent>) {
        RoomChannel::new(
            "ws://localhost:8080",
            Arc::new(TestSession),
            connector,
            SocketConfig::new(),
        )
    }

    fn echo_frame(user_id: &str, content: &str) -> ScriptedFrame {
        Some(Ok(Frame::Text(format!(
            r#"{{"_id":"m1","room_id":"42","user_id":"{user_id}","username":"alice","content":"{content}","created_at":"2024-01-01T00:00:00Z"}}"#
        ))))
    }

    async fn expect_connected(events: &mut mpsc::Receiver<RoomEvent>) {
        let event = events.recv().await.unwrap();
        assert!(matches!(event, RoomEvent::Connected), "got {event:?}");
    }

    #[tokio::test]
    async fn join_builds_the_room_url_from_identity() {
        let connector = MockConnector::endless();
        let (mut channel, mut events) = new_channel(Arc::clone(&connector));

        channel.join("42").await;
        expect_connected(&mut events).await;

        assert_eq!(
            connector.urls.lock().unwrap().as_slice(),
            ["ws://localhost:8080/join_room/42?user_id=1&username=alice"]
        );
        channel.leave().await;
    }

    #[tokio::test]
    async fn join_same_room_is_a_no_op() {
        let connector = MockConnector::endless();
        let (mut channel, mut events) = new_channel(Arc::clone(&connector));

        channel.join("42").await;
        expect_connected(&mut events).await;
        channel.join("42").await;
        channel.join("42").await;

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        channel.leave().await;
    }

    #[tokio::test]
    async fn join_other_room_closes_previous_socket_first() {
        let connector = MockConnector::endless();
        let (mut channel, mut events) = new_channel(Arc::clone(&connector));

        channel.join("42").await;
        expect_connected(&mut events).await;
        channel.join("43").await;

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(connector.closed.load(Ordering::SeqCst), 1);
        assert_eq!(channel.room_id(), Some("43"));

        let urls = connector.urls.lock().unwrap();
        assert!(urls[1].contains("/join_room/43?"));
        drop(urls);

        channel.leave().await;
    }

    #[tokio::test]
    async fn switching_rooms_delivers_old_disconnect_before_new_connect() {
        let connector = MockConnector::endless();
        let (mut channel, mut events) = new_channel(Arc::clone(&connector));

        channel.join("42").await;
        expect_connected(&mut events).await;
        channel.join("43").await;

        // The old room's stream must finish before the new one starts.
        let event = events.recv().await.unwrap();
        assert!(
            matches!(
                event,
                RoomEvent::Disconnected { code: 1000, will_retry: false, .. }
            ),
            "got {event:?}"
        );
        expect_connected(&mut events).await;

        channel.leave().await;
    }

    #[tokio::test]
    async fn own_message_is_tagged_is_own() {
        let connector = MockConnector::new(vec![vec![echo_frame("1", "hi")]]);
        let (mut channel, mut events) = new_channel(connector);

        channel.join("42").await;
        expect_connected(&mut events).await;

        let event = events.recv().await.unwrap();
        let RoomEvent::Message(chat) = event else {
            panic!("expected message, got {event:?}");
        };
        assert!(chat.is_own);
        assert_eq!(chat.message.content, "hi");

        channel.leave().await;
    }

    #[tokio::test]
    async fn other_sender_is_not_own() {
        let connector = MockConnector::new(vec![vec![echo_frame("9", "yo")]]);
        let (mut channel, mut events) = new_channel(connector);

        channel.join("42").await;
        expect_connected(&mut events).await;

        let event = events.recv().await.unwrap();
        let RoomEvent::Message(chat) = event else {
            panic!("expected message, got {event:?}");
        };
        assert!(!chat.is_own);

        channel.leave().await;
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_and_stream_continues() {
        let connector = MockConnector::new(vec![vec![
            Some(Ok(Frame::Text("{not json".into()))),
            echo_frame("9", "still here"),
        ]]);
        let (mut channel, mut events) = new_channel(connector);

        channel.join("42").await;
        expect_connected(&mut events).await;

        // The malformed frame is skipped entirely; the next event is the
        // well-formed message.
        let event = events.recv().await.unwrap();
        let RoomEvent::Message(chat) = event else {
            panic!("expected message, got {event:?}");
        };
        assert_eq!(chat.message.content, "still here");

        channel.leave().await;
    }

    #[tokio::test]
    async fn send_message_trims_and_sends_raw_text() {
        let connector = MockConnector::endless();
        let (mut channel, mut events) = new_channel(Arc::clone(&connector));

        channel.join("42").await;
        expect_connected(&mut events).await;
        channel.send_message("  hello there  ").unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(connector.sent.lock().unwrap().as_slice(), ["hello there"]);

        channel.leave().await;
    }

    #[tokio::test]
    async fn whitespace_only_message_is_rejected_without_sending() {
        let connector = MockConnector::endless();
        let (mut channel, mut events) = new_channel(Arc::clone(&connector));

        channel.join("42").await;
        expect_connected(&mut events).await;

        let result = channel.send_message("   ");
        assert!(matches!(result, Err(ChatWireError::EmptyMessage)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(connector.sent.lock().unwrap().is_empty());

        channel.leave().await;
    }

    #[tokio::test]
    async fn send_without_join_fails() {
        let connector = MockConnector::endless();
        let (channel, _events) = new_channel(connector);

        assert!(matches!(
            channel.send_message("hello"),
            Err(ChatWireError::NotOpen)
        ));
    }

    #[tokio::test]
    async fn leave_emits_normal_disconnect() {
        let connector = MockConnector::endless();
        let (mut channel, mut events) = new_channel(connector);

        channel.join("42").await;
        expect_connected(&mut events).await;
        channel.leave().await;

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            RoomEvent::Disconnected { code: 1000, will_retry: false, .. }
        ));
        assert_eq!(channel.room_id(), None);
        assert_eq!(channel.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn rejoin_after_leave_opens_again() {
        let connector = MockConnector::endless();
        let (mut channel, mut events) = new_channel(Arc::clone(&connector));

        channel.join("42").await;
        expect_connected(&mut events).await;
        channel.leave().await;
        channel.join("42").await;

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
        channel.leave().await;
    }
}
