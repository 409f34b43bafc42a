//! The app-wide presence/notification channel.
//!
//! [`PresenceChannel`] holds the session-lifetime socket: started once after
//! login, stopped on logout or teardown. Frames tagged `"notification"`
//! become typed [`Notification`]s; everything else (online roster updates,
//! pings, future control frames) is forwarded as a raw update at full
//! fidelity so callers can interpret what they need.
//!
//! Dropping the channel aborts the socket task, so the connection is
//! released on every exit path even without an explicit
//! [`stop`](PresenceChannel::stop).

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::protocol::{self, NotificationPayload, PresenceFrame};
use crate::session::SessionDirectory;
use crate::socket::{ConnectionState, Socket, SocketConfig, SocketEvent};
use crate::transport::Connector;

/// An out-of-band message notification, unrelated to the currently open
/// room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// User id of the sender.
    pub sender_id: String,
    /// Display name of the sender.
    pub sender_name: String,
    /// Message body.
    pub body: String,
}

impl From<NotificationPayload> for Notification {
    fn from(payload: NotificationPayload) -> Self {
        Self {
            sender_id: payload.user_id,
            sender_name: payload.username,
            body: payload.content,
        }
    }
}

/// Updates delivered to subscribers of the presence channel.
///
/// Unordered, fire-and-forget: no ordering guarantee relative to room
/// traffic for the same logical event.
#[derive(Debug, Clone)]
pub enum PresenceUpdate {
    /// The presence socket reached Open.
    Connected,
    /// A `"notification"` frame.
    Notification(Notification),
    /// Any other frame, forwarded without interpretation (e.g. online
    /// roster updates — see [`OnlineStatus`](crate::protocol::OnlineStatus)).
    Raw(serde_json::Value),
    /// The presence socket disconnected; `will_retry` is `true` when a
    /// reconnect is scheduled.
    Disconnected {
        /// Close code.
        code: u16,
        /// Close reason; may be empty.
        reason: String,
        /// Whether a reconnect attempt is scheduled.
        will_retry: bool,
    },
}

struct ActivePresence {
    user_id: String,
    socket: Socket,
    forwarder: tokio::task::JoinHandle<()>,
}

/// The session-lifetime presence/notification channel.
pub struct PresenceChannel {
    endpoint: String,
    session: Arc<dyn SessionDirectory>,
    connector: Arc<dyn Connector>,
    config: SocketConfig,
    event_tx: mpsc::Sender<PresenceUpdate>,
    current: Option<ActivePresence>,
}

impl PresenceChannel {
    /// Create a presence channel against `endpoint`.
    #[must_use = "the update receiver must be consumed to observe presence"]
    pub fn new(
        endpoint: impl Into<String>,
        session: Arc<dyn SessionDirectory>,
        connector: Arc<dyn Connector>,
        config: SocketConfig,
    ) -> (Self, mpsc::Receiver<PresenceUpdate>) {
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<PresenceUpdate>(capacity);
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

    /// Start the presence socket for `user_id`.
    ///
    /// Idempotent per user id while the socket is live. Starting for a
    /// different user id first closes the old connection manually.
    pub async fn start(&mut self, user_id: &str) {
        if let Some(active) = &self.current {
            if active.user_id == user_id && active.socket.is_alive() {
                debug!(user_id, "presence already started, ignoring");
                return;
            }
        }
        self.stop().await;

        let url = protocol::presence_url(&self.endpoint, user_id);
        debug!(user_id, %url, "starting presence socket");

        let (socket, socket_rx) = Socket::open(
            Arc::clone(&self.connector),
            url,
            Arc::clone(&self.session),
            self.config.clone(),
        );
        let forwarder = tokio::spawn(forward_presence_events(socket_rx, self.event_tx.clone()));
        self.current = Some(ActivePresence {
            user_id: user_id.to_owned(),
            socket,
            forwarder,
        });
    }

    /// Stop the presence socket: manual close, no reconnect, bound user id
    /// cleared. No-op when not started.
    pub async fn stop(&mut self) {
        if let Some(mut active) = self.current.take() {
            debug!(user_id = %active.user_id, "stopping presence socket");
            active.socket.close().await;
            // Drain the forwarder so the final Disconnected lands on the
            // stream before any update from a later start.
            let timeout = self.config.shutdown_timeout;
            if tokio::time::timeout(timeout, &mut active.forwarder)
                .await
                .is_err()
            {
                warn!("presence update forwarder did not drain in time; aborting");
                active.forwarder.abort();
            }
        }
    }

    /// The user id the channel is currently bound to, if started.
    pub fn user_id(&self) -> Option<&str> {
        self.current.as_ref().map(|active| active.user_id.as_str())
    }

    /// Connection state of the presence socket; `Idle` when not started.
    pub fn state(&self) -> ConnectionState {
        self.current
            .as_ref()
            .map_or(ConnectionState::Idle, |active| active.socket.state())
    }
}

impl std::fmt::Debug for PresenceChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceChannel")
            .field("endpoint", &self.endpoint)
            .field("user_id", &self.user_id())
            .field("state", &self.state())
            .finish()
    }
}

/// Decode socket events into presence updates. Malformed frames are dropped
/// and logged.
async fn forward_presence_events(
    mut socket_rx: mpsc::Receiver<SocketEvent>,
    event_tx: mpsc::Sender<PresenceUpdate>,
) {
    while let Some(event) = socket_rx.recv().await {
        let forwarded = match event {
            SocketEvent::Connected => PresenceUpdate::Connected,
            SocketEvent::Disconnected {
                code,
                reason,
                will_retry,
            } => PresenceUpdate::Disconnected {
                code,
                reason,
                will_retry,
            },
            SocketEvent::Frame(text) => match protocol::decode_presence_frame(&text) {
                Ok(PresenceFrame::Notification(payload)) => {
                    PresenceUpdate::Notification(payload.into())
                }
                Ok(PresenceFrame::Other(value)) => PresenceUpdate::Raw(value),
                Err(e) => {
                    warn!(error = %e, raw = %text, "dropping malformed presence frame");
                    continue;
                }
            },
        };
        if event_tx.send(forwarded).await.is_err() {
            debug!("presence update receiver dropped");
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
    use crate::error::ChatWireError;
    use crate::session::Identity;
    use crate::transport::{Frame, Transport};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    type ScriptedFrame = Option<std::result::Result<Frame, ChatWireError>>;

    struct MockTransport {
        incoming: VecDeque<ScriptedFrame>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, _message: String) -> std::result::Result<(), ChatWireError> {
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

    struct MockConnector {
        scripts: StdMutex<VecDeque<Vec<ScriptedFrame>>>,
        attempts: Arc<AtomicUsize>,
        urls: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicUsize>,
    }

    impl MockConnector {
        fn new(scripts: Vec<Vec<ScriptedFrame>>) -> Arc<Self> {
            Arc::new(Self {
                scripts: StdMutex::new(VecDeque::from(scripts)),
                attempts: Arc::new(AtomicUsize::new(0)),
                urls: Arc::new(StdMutex::new(Vec::new())),
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

    fn new_channel(
        connector: Arc<MockConnector>,
    ) -> (PresenceChannel, mpsc::Receiver<PresenceUpdate>) {
        PresenceChannel::new(
            "ws://localhost:8080",
            Arc::new(TestSession),
            connector,
            SocketConfig::new(),
        )
    }

    async fn expect_connected(events: &mut mpsc::Receiver<PresenceUpdate>) {
        let update = events.recv().await.unwrap();
        assert!(matches!(update, PresenceUpdate::Connected), "got {update:?}");
    }

    #[tokio::test]
    async fn start_builds_the_presence_url() {
        let connector = MockConnector::endless();
        let (mut channel, mut events) = new_channel(Arc::clone(&connector));

        channel.start("1").await;
        expect_connected(&mut events).await;

        assert_eq!(
            connector.urls.lock().unwrap().as_slice(),
            ["ws://localhost:8080/ws/join_app?user_id=1"]
        );
        channel.stop().await;
    }

    #[tokio::test]
    async fn start_is_idempotent_per_user() {
        let connector = MockConnector::endless();
        let (mut channel, mut events) = new_channel(Arc::clone(&connector));

        channel.start("1").await;
        expect_connected(&mut events).await;
        channel.start("1").await;
        channel.start("1").await;

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        channel.stop().await;
    }

    #[tokio::test]
    async fn start_for_other_user_closes_old_connection() {
        let connector = MockConnector::endless();
        let (mut channel, mut events) = new_channel(Arc::clone(&connector));

        channel.start("1").await;
        expect_connected(&mut events).await;
        channel.start("2").await;

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(connector.closed.load(Ordering::SeqCst), 1);
        assert_eq!(channel.user_id(), Some("2"));

        channel.stop().await;
    }

    #[tokio::test]
    async fn restart_delivers_old_disconnect_before_new_connect() {
        let connector = MockConnector::endless();
        let (mut channel, mut events) = new_channel(Arc::clone(&connector));

        channel.start("1").await;
        expect_connected(&mut events).await;
        channel.start("2").await;

        let update = events.recv().await.unwrap();
        assert!(
            matches!(
                update,
                PresenceUpdate::Disconnected { code: 1000, will_retry: false, .. }
            ),
            "got {update:?}"
        );
        expect_connected(&mut events).await;

        channel.stop().await;
    }

    #[tokio::test]
    async fn notification_frame_becomes_typed_update() {
        let connector = MockConnector::new(vec![vec![Some(Ok(Frame::Text(
            r#"{"type":"notification","UserId":"9","Username":"bob","Content":"hey"}"#.into(),
        )))]]);
        let (mut channel, mut events) = new_channel(connector);

        channel.start("1").await;
        expect_connected(&mut events).await;

        let update = events.recv().await.unwrap();
        let PresenceUpdate::Notification(n) = update else {
            panic!("expected notification, got {update:?}");
        };
        assert_eq!(n.sender_id, "9");
        assert_eq!(n.sender_name, "bob");
        assert_eq!(n.body, "hey");

        channel.stop().await;
    }

    #[tokio::test]
    async fn ping_frame_is_a_raw_update_not_a_notification() {
        let connector = MockConnector::new(vec![vec![Some(Ok(Frame::Text(
            r#"{"type":"ping"}"#.into(),
        )))]]);
        let (mut channel, mut events) = new_channel(connector);

        channel.start("1").await;
        expect_connected(&mut events).await;

        let update = events.recv().await.unwrap();
        let PresenceUpdate::Raw(value) = update else {
            panic!("expected raw update, got {update:?}");
        };
        assert_eq!(value["type"], "ping");

        channel.stop().await;
    }

    #[tokio::test]
    async fn roster_update_is_forwarded_raw() {
        let connector = MockConnector::new(vec![vec![Some(Ok(Frame::Text(
            r#"{"user_id":"7","online":true}"#.into(),
        )))]]);
        let (mut channel, mut events) = new_channel(connector);

        channel.start("1").await;
        expect_connected(&mut events).await;

        let update = events.recv().await.unwrap();
        let PresenceUpdate::Raw(value) = update else {
            panic!("expected raw update, got {update:?}");
        };
        let status = crate::protocol::OnlineStatus::from_value(&value).unwrap();
        assert_eq!(status.user_id, "7");
        assert!(status.online);

        channel.stop().await;
    }

    #[tokio::test]
    async fn malformed_presence_frame_is_dropped() {
        let connector = MockConnector::new(vec![vec![
            Some(Ok(Frame::Text("garbage".into()))),
            Some(Ok(Frame::Text(r#"{"type":"ping"}"#.into()))),
        ]]);
        let (mut channel, mut events) = new_channel(connector);

        channel.start("1").await;
        expect_connected(&mut events).await;

        let update = events.recv().await.unwrap();
        assert!(matches!(update, PresenceUpdate::Raw(_)));

        channel.stop().await;
    }

    #[tokio::test]
    async fn stop_clears_the_bound_user_id() {
        let connector = MockConnector::endless();
        let (mut channel, mut events) = new_channel(connector);

        channel.start("1").await;
        expect_connected(&mut events).await;
        channel.stop().await;

        assert_eq!(channel.user_id(), None);
        assert_eq!(channel.state(), ConnectionState::Idle);

        let update = events.recv().await.unwrap();
        assert!(matches!(
            update,
            PresenceUpdate::Disconnected { code: 1000, will_retry: false, .. }
        ));
    }

    #[tokio::test]
    async fn drop_releases_the_socket() {
        let connector = MockConnector::endless();
        let (mut channel, mut events) = new_channel(connector);

        channel.start("1").await;
        expect_connected(&mut events).await;
        drop(channel);

        // The socket task is aborted on drop; the update stream closes.
        while events.recv().await.is_some() {}
    }
}
