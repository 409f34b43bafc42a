//! The transport socket wrapper shared by both realtime channels.
//!
//! [`Socket`] is a thin handle over a background loop task that owns the
//! transport, the [`ConnectionState`] machine, and the single reconnect
//! timer. Inbound frames and connectivity changes are emitted as
//! [`SocketEvent`]s on a bounded channel returned from [`Socket::open`].
//!
//! State machine:
//!
//! ```text
//! Idle -> Connecting -> Open -> {Closing -> Closed}
//!                            |   Closed(abnormal) -> [after delay] -> Connecting
//! ```
//!
//! Terminal only when explicitly closed, the handle is dropped, or the
//! session token becomes invalid. The reconnect delay is the only deferred
//! work in the crate; it lives inside the loop task and is cancelled by
//! `close()` or drop, so there is never more than one outstanding timer per
//! wrapper.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::error::{ChatWireError, Result};
use crate::session::SessionDirectory;
use crate::transport::{CloseInfo, Connector, Frame, Transport, NORMAL_CLOSE};

/// Default delay before the single reconnect attempt.
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful close.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Close reason reported for client-initiated closes.
const CLIENT_CLOSE_REASON: &str = "closed by client";

// ── Connection state ────────────────────────────────────────────────

/// Lifecycle state of one socket wrapper. Owned exclusively by the wrapper;
/// handles read an atomic snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Not yet connecting.
    Idle = 0,
    /// Connection attempt in flight.
    Connecting = 1,
    /// Connected; outbound sends are valid.
    Open = 2,
    /// Graceful close in progress.
    Closing = 3,
    /// Connection gone. May still reconnect if the close was abnormal.
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Connecting,
            2 => Self::Open,
            3 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`Socket`].
///
/// # Example
///
/// ```
/// use chatwire_client::socket::SocketConfig;
/// use std::time::Duration;
///
/// let config = SocketConfig::new()
///     .with_reconnect_delay(Duration::from_secs(5))
///     .with_event_channel_capacity(512);
/// assert_eq!(config.reconnect_delay, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Delay before the reconnect attempt after an abnormal close.
    ///
    /// Defaults to **3 seconds**.
    pub reconnect_delay: Duration,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up, frames are dropped (with a warning
    /// logged) to avoid blocking the loop. `Disconnected` is always
    /// delivered regardless of capacity.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Timeout for the graceful close.
    ///
    /// When [`Socket::close`] is called, the loop task is given this much
    /// time to close the transport and emit a final `Disconnected` event
    /// before being aborted. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl SocketConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Set the reconnect delay.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the event channel capacity. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the graceful close timeout.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ── Events ──────────────────────────────────────────────────────────

/// Events emitted by a [`Socket`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// The transport reached Open.
    Connected,
    /// One inbound text frame, delivered unmodified.
    Frame(String),
    /// The connection ended. `will_retry` is `true` when a reconnect attempt
    /// has been scheduled.
    Disconnected {
        /// Close code (1006 when the stream died without a close frame).
        code: u16,
        /// Close reason; may be empty.
        reason: String,
        /// Whether a reconnect attempt is scheduled.
        will_retry: bool,
    },
}

// ── Shared state ────────────────────────────────────────────────────

struct SocketShared {
    state: AtomicU8,
}

impl SocketShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Idle as u8),
        }
    }

    fn set(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }
}

enum Command {
    Send(String),
}

// ── Socket handle ───────────────────────────────────────────────────

/// Handle to one transport socket wrapper.
///
/// Created via [`Socket::open`], which spawns the background loop and
/// returns this handle together with the event receiver. The handle is the
/// only way to reach the connection: no ambient globals, one wrapper per
/// channel.
pub struct Socket {
    cmd_tx: mpsc::UnboundedSender<Command>,
    shared: Arc<SocketShared>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl Socket {
    /// Begin connecting to `url` and return a handle plus event receiver.
    ///
    /// The loop task transitions Idle→Connecting immediately; `Connected` is
    /// emitted when the transport opens, `Disconnected` on failure or close.
    /// The `connector` is reused for reconnect attempts; `session` is
    /// consulted (`token_valid`) before each one.
    #[must_use = "the event receiver must be consumed to observe the connection"]
    pub fn open(
        connector: Arc<dyn Connector>,
        url: String,
        session: Arc<dyn SessionDirectory>,
        config: SocketConfig,
    ) -> (Self, mpsc::Receiver<SocketEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<SocketEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let shared = Arc::new(SocketShared::new());
        let loop_shared = Arc::clone(&shared);

        let task = tokio::spawn(socket_loop(
            connector,
            url,
            session,
            config.reconnect_delay,
            cmd_rx,
            event_tx,
            loop_shared,
            shutdown_rx,
        ));

        let socket = Self {
            cmd_tx,
            shared,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };

        (socket, event_rx)
    }

    /// Queue `payload` for delivery, unmodified.
    ///
    /// # Errors
    ///
    /// Returns [`ChatWireError::NotOpen`] synchronously when the state is not
    /// Open. Never blocks.
    pub fn send(&self, payload: String) -> Result<()> {
        if self.shared.get() != ConnectionState::Open {
            return Err(ChatWireError::NotOpen);
        }
        self.cmd_tx
            .send(Command::Send(payload))
            .map_err(|_| ChatWireError::NotOpen)
    }

    /// Current connection state snapshot.
    pub fn state(&self) -> ConnectionState {
        self.shared.get()
    }

    /// Whether the loop task is still running. `true` also covers the
    /// Closed-awaiting-reconnect window.
    pub fn is_alive(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Manually close the connection (normal close, code 1000).
    ///
    /// Cancels a pending reconnect if one is scheduled. The loop task is
    /// given `shutdown_timeout` to close the transport and emit the final
    /// `Disconnected` event, then aborted.
    pub async fn close(&mut self) {
        debug!("socket close requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("socket loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("socket loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("socket loop aborted: {join_err}");
                    }
                }
            }
        }

        self.shared.set(ConnectionState::Closed);
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("state", &self.state())
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        // `Drop` is synchronous so we cannot await a graceful close. Abort
        // the loop task so the transport future is dropped immediately; this
        // also cancels any pending reconnect timer.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Socket loop ─────────────────────────────────────────────────────

enum SessionEnd {
    /// `close()` was called or the handle was dropped.
    Manual,
    /// The remote side closed, the stream died, or the transport errored.
    Remote(CloseInfo),
}

#[allow(clippy::too_many_arguments)]
async fn socket_loop(
    connector: Arc<dyn Connector>,
    url: String,
    session: Arc<dyn SessionDirectory>,
    reconnect_delay: Duration,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::Sender<SocketEvent>,
    shared: Arc<SocketShared>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!(%url, "socket loop started");

    loop {
        shared.set(ConnectionState::Connecting);

        let connected = tokio::select! {
            result = connector.connect(&url) => result,
            _ = &mut shutdown_rx => {
                debug!("close requested while connecting");
                shared.set(ConnectionState::Closed);
                emit_disconnected(&event_tx, NORMAL_CLOSE, CLIENT_CLOSE_REASON.into(), false).await;
                return;
            }
        };

        let mut transport = match connected {
            Ok(transport) => transport,
            Err(e) => {
                warn!(%url, error = %e, "connect attempt failed");
                shared.set(ConnectionState::Closed);
                let will_retry = session.token_valid();
                emit_disconnected(&event_tx, CloseInfo::abnormal("").code, e.to_string(), will_retry)
                    .await;
                if !will_retry {
                    debug!("session token invalid, giving up");
                    return;
                }
                if !wait_for_retry(reconnect_delay, &mut cmd_rx, &mut shutdown_rx).await {
                    emit_disconnected(&event_tx, NORMAL_CLOSE, CLIENT_CLOSE_REASON.into(), false)
                        .await;
                    return;
                }
                continue;
            }
        };

        shared.set(ConnectionState::Open);
        emit_event(&event_tx, SocketEvent::Connected).await;

        let end = run_session(transport.as_mut(), &mut cmd_rx, &event_tx, &mut shutdown_rx).await;

        match end {
            SessionEnd::Manual => {
                shared.set(ConnectionState::Closing);
                let _ = transport.close().await;
                shared.set(ConnectionState::Closed);
                emit_disconnected(&event_tx, NORMAL_CLOSE, CLIENT_CLOSE_REASON.into(), false).await;
                debug!("socket loop exited after manual close");
                return;
            }
            SessionEnd::Remote(info) => {
                shared.set(ConnectionState::Closed);
                let will_retry = !info.is_normal() && session.token_valid();
                emit_disconnected(&event_tx, info.code, info.reason, will_retry).await;
                if !will_retry {
                    debug!("socket loop exited after remote close");
                    return;
                }
                if !wait_for_retry(reconnect_delay, &mut cmd_rx, &mut shutdown_rx).await {
                    emit_disconnected(&event_tx, NORMAL_CLOSE, CLIENT_CLOSE_REASON.into(), false)
                        .await;
                    return;
                }
            }
        }
    }
}

/// One connected session: multiplex outbound commands, the close signal, and
/// inbound frames until something ends the connection.
async fn run_session(
    transport: &mut dyn Transport,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    event_tx: &mpsc::Sender<SocketEvent>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> SessionEnd {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send(payload)) => {
                        if let Err(e) = transport.send(payload).await {
                            error!("transport send error: {e}");
                            return SessionEnd::Remote(CloseInfo::abnormal(e.to_string()));
                        }
                    }
                    // Command channel closed — handle dropped.
                    None => {
                        debug!("socket handle dropped");
                        return SessionEnd::Manual;
                    }
                }
            }

            _ = &mut *shutdown_rx => {
                debug!("close signal received");
                return SessionEnd::Manual;
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(Frame::Text(text))) => {
                        emit_event(event_tx, SocketEvent::Frame(text)).await;
                    }
                    Some(Ok(Frame::Closed(info))) => {
                        debug!(code = info.code, reason = %info.reason, "remote close frame");
                        return SessionEnd::Remote(info);
                    }
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        return SessionEnd::Remote(CloseInfo::abnormal(e.to_string()));
                    }
                    // Stream ended without a close handshake.
                    None => {
                        debug!("transport stream ended");
                        return SessionEnd::Remote(CloseInfo::abnormal("connection dropped"));
                    }
                }
            }
        }
    }
}

/// Wait out the reconnect delay. Returns `false` when the window was
/// cancelled by a manual close or the handle being dropped.
async fn wait_for_retry(
    delay: Duration,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> bool {
    debug!(?delay, "reconnect attempt scheduled");
    let timer = tokio::time::sleep(delay);
    tokio::pin!(timer);
    loop {
        tokio::select! {
            _ = &mut timer => return true,
            _ = &mut *shutdown_rx => {
                debug!("reconnect cancelled by close");
                return false;
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    // Stale sends from the last Open window; the connection
                    // is gone, so drop them rather than replay on reconnect.
                    Some(Command::Send(_)) => {
                        warn!("dropping payload queued before disconnect");
                    }
                    None => {
                        debug!("reconnect cancelled, handle dropped");
                        return false;
                    }
                }
            }
        }
    }
}

/// Emit an event to the event channel. If the channel is full, log a warning
/// and drop the event to avoid blocking the loop.
async fn emit_event(event_tx: &mpsc::Sender<SocketEvent>, event: SocketEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(
                "event channel full, dropping event: {:?}",
                std::mem::discriminant(&dropped)
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Emit a `Disconnected` event.
///
/// Uses `send().await` instead of `try_send` because `Disconnected` is a
/// connectivity-status signal that must never be silently dropped.
async fn emit_disconnected(
    event_tx: &mpsc::Sender<SocketEvent>,
    code: u16,
    reason: String,
    will_retry: bool,
) {
    let event = SocketEvent::Disconnected {
        code,
        reason,
        will_retry,
    };
    if event_tx.send(event).await.is_err() {
        debug!("event channel closed, receiver dropped");
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
    use crate::transport::ABNORMAL_CLOSE;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Mutex as StdMutex;

    // ── Mocks ───────────────────────────────────────────────────────

    type ScriptedFrame = Option<std::result::Result<Frame, ChatWireError>>;

    /// A mock transport that records sent payloads and replays a script.
    struct MockTransport {
        incoming: VecDeque<ScriptedFrame>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
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
                // Script exhausted — hang so the session stays alive until
                // the test closes the socket.
                std::future::pending().await
            }
        }

        async fn close(&mut self) -> std::result::Result<(), ChatWireError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    enum Script {
        Session(Vec<ScriptedFrame>),
        Fail(String),
    }

    /// Connector replaying one [`Script`] per connect attempt. Counts
    /// attempts; all produced transports share one sent-log and close flag.
    struct MockConnector {
        scripts: StdMutex<VecDeque<Script>>,
        pub attempts: Arc<AtomicUsize>,
        pub sent: Arc<StdMutex<Vec<String>>>,
        pub closed: Arc<AtomicBool>,
    }

    impl MockConnector {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: StdMutex::new(VecDeque::from(scripts)),
                attempts: Arc::new(AtomicUsize::new(0)),
                sent: Arc::new(StdMutex::new(Vec::new())),
                closed: Arc::new(AtomicBool::new(false)),
            })
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self, _url: &str) -> std::result::Result<Box<dyn Transport>, ChatWireError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let script = self.scripts.lock().unwrap().pop_front();
            match script {
                Some(Script::Session(frames)) => Ok(Box::new(MockTransport {
                    incoming: VecDeque::from(frames),
                    sent: Arc::clone(&self.sent),
                    closed: Arc::clone(&self.closed),
                })),
                Some(Script::Fail(reason)) => Err(ChatWireError::TransportReceive(reason)),
                // No more scripted sessions — hang in Connecting.
                None => std::future::pending().await,
            }
        }
    }

    struct TestSession {
        valid: AtomicBool,
    }

    impl TestSession {
        fn new(valid: bool) -> Arc<Self> {
            Arc::new(Self {
                valid: AtomicBool::new(valid),
            })
        }
    }

    impl SessionDirectory for TestSession {
        fn identity(&self) -> Identity {
            Identity::new("1", "alice")
        }

        fn token_valid(&self) -> bool {
            self.valid.load(Ordering::SeqCst)
        }
    }

    fn text(s: &str) -> ScriptedFrame {
        Some(Ok(Frame::Text(s.to_owned())))
    }

    fn remote_close(code: u16) -> ScriptedFrame {
        Some(Ok(Frame::Closed(CloseInfo {
            code,
            reason: String::new(),
        })))
    }

    fn open_socket(
        connector: Arc<MockConnector>,
        session: Arc<TestSession>,
    ) -> (Socket, mpsc::Receiver<SocketEvent>) {
        Socket::open(
            connector,
            "ws://test/join_room/42?user_id=1&username=alice".into(),
            session,
            SocketConfig::new(),
        )
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn connected_then_frames_are_emitted() {
        let connector = MockConnector::new(vec![Script::Session(vec![text("one"), text("two")])]);
        let (mut socket, mut events) = open_socket(Arc::clone(&connector), TestSession::new(true));

        assert_eq!(events.recv().await.unwrap(), SocketEvent::Connected);
        assert_eq!(events.recv().await.unwrap(), SocketEvent::Frame("one".into()));
        assert_eq!(events.recv().await.unwrap(), SocketEvent::Frame("two".into()));
        assert_eq!(socket.state(), ConnectionState::Open);

        socket.close().await;
    }

    #[tokio::test]
    async fn send_before_open_fails_synchronously() {
        // No scripts: the connector hangs, so the socket stays Connecting.
        let connector = MockConnector::new(vec![]);
        let (mut socket, _events) = open_socket(connector, TestSession::new(true));

        let result = socket.send("hello".into());
        assert!(matches!(result, Err(ChatWireError::NotOpen)));

        socket.close().await;
    }

    #[tokio::test]
    async fn send_while_open_delivers_payload_unmodified() {
        let connector = MockConnector::new(vec![Script::Session(vec![])]);
        let (mut socket, mut events) = open_socket(Arc::clone(&connector), TestSession::new(true));

        assert_eq!(events.recv().await.unwrap(), SocketEvent::Connected);
        socket.send("  raw payload  ".into()).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(connector.sent.lock().unwrap().as_slice(), ["  raw payload  "]);

        socket.close().await;
    }

    #[tokio::test]
    async fn manual_close_emits_normal_disconnect_and_closes_transport() {
        let connector = MockConnector::new(vec![Script::Session(vec![])]);
        let (mut socket, mut events) = open_socket(Arc::clone(&connector), TestSession::new(true));

        assert_eq!(events.recv().await.unwrap(), SocketEvent::Connected);
        socket.close().await;

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            SocketEvent::Disconnected {
                code: NORMAL_CLOSE,
                reason: CLIENT_CLOSE_REASON.into(),
                will_retry: false,
            }
        );
        assert!(connector.closed.load(Ordering::Relaxed));
        assert_eq!(socket.state(), ConnectionState::Closed);
        assert!(!socket.is_alive());
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let connector = MockConnector::new(vec![Script::Session(vec![])]);
        let (mut socket, mut events) = open_socket(connector, TestSession::new(true));

        assert_eq!(events.recv().await.unwrap(), SocketEvent::Connected);
        socket.close().await;

        assert!(matches!(socket.send("late".into()), Err(ChatWireError::NotOpen)));
    }

    #[tokio::test(start_paused = true)]
    async fn abnormal_close_schedules_exactly_one_reconnect() {
        let connector = MockConnector::new(vec![
            Script::Session(vec![remote_close(ABNORMAL_CLOSE)]),
            Script::Session(vec![]),
        ]);
        let (mut socket, mut events) = open_socket(Arc::clone(&connector), TestSession::new(true));

        assert_eq!(events.recv().await.unwrap(), SocketEvent::Connected);
        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            SocketEvent::Disconnected { code: 1006, will_retry: true, .. }
        ));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);

        // The retry must not fire before the 3 s delay elapses.
        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(events.recv().await.unwrap(), SocketEvent::Connected);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);

        socket.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn manual_close_within_retry_window_cancels_reconnect() {
        let connector = MockConnector::new(vec![
            Script::Session(vec![remote_close(ABNORMAL_CLOSE)]),
            Script::Session(vec![]),
        ]);
        let (mut socket, mut events) = open_socket(Arc::clone(&connector), TestSession::new(true));

        assert_eq!(events.recv().await.unwrap(), SocketEvent::Connected);
        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            SocketEvent::Disconnected { will_retry: true, .. }
        ));

        socket.close().await;

        // Let more than the retry delay pass; no second attempt may happen.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn normal_remote_close_does_not_reconnect() {
        let connector = MockConnector::new(vec![
            Script::Session(vec![remote_close(NORMAL_CLOSE)]),
            Script::Session(vec![]),
        ]);
        let (_socket, mut events) = open_socket(Arc::clone(&connector), TestSession::new(true));

        assert_eq!(events.recv().await.unwrap(), SocketEvent::Connected);
        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            SocketEvent::Disconnected { code: 1000, will_retry: false, .. }
        ));

        // The loop must have exited; the event channel closes.
        assert!(events.recv().await.is_none());
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_token_suppresses_reconnect() {
        let connector = MockConnector::new(vec![Script::Session(vec![remote_close(
            ABNORMAL_CLOSE,
        )])]);
        let (_socket, mut events) = open_socket(Arc::clone(&connector), TestSession::new(false));

        assert_eq!(events.recv().await.unwrap(), SocketEvent::Connected);
        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            SocketEvent::Disconnected { will_retry: false, .. }
        ));
        assert!(events.recv().await.is_none());
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_retries_after_delay() {
        let connector = MockConnector::new(vec![
            Script::Fail("connection refused".into()),
            Script::Session(vec![]),
        ]);
        let (mut socket, mut events) = open_socket(Arc::clone(&connector), TestSession::new(true));

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            SocketEvent::Disconnected { code: 1006, will_retry: true, .. }
        ));

        tokio::time::sleep(Duration::from_millis(3100)).await;
        assert_eq!(events.recv().await.unwrap(), SocketEvent::Connected);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);

        socket.close().await;
    }

    #[tokio::test]
    async fn transport_error_is_an_abnormal_close() {
        let connector = MockConnector::new(vec![Script::Session(vec![Some(Err(
            ChatWireError::TransportReceive("boom".into()),
        ))])]);
        let session = TestSession::new(false);
        let (_socket, mut events) = open_socket(connector, session);

        assert_eq!(events.recv().await.unwrap(), SocketEvent::Connected);
        let event = events.recv().await.unwrap();
        let SocketEvent::Disconnected { code, reason, .. } = event else {
            panic!("expected Disconnected");
        };
        assert_eq!(code, 1006);
        assert!(reason.contains("boom"));
    }

    #[tokio::test]
    async fn stream_end_without_close_frame_is_abnormal() {
        let connector = MockConnector::new(vec![Script::Session(vec![None])]);
        let session = TestSession::new(false);
        let (_socket, mut events) = open_socket(connector, session);

        assert_eq!(events.recv().await.unwrap(), SocketEvent::Connected);
        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            SocketEvent::Disconnected { code: 1006, .. }
        ));
    }

    #[tokio::test]
    async fn event_channel_overflow_drops_frames_not_disconnected() {
        let mut frames: Vec<ScriptedFrame> = Vec::new();
        for i in 0..20 {
            frames.push(text(&format!("m{i}")));
        }
        frames.push(remote_close(NORMAL_CLOSE));

        let connector = MockConnector::new(vec![Script::Session(frames)]);
        let (_socket, mut events) = Socket::open(
            connector,
            "ws://test".into(),
            TestSession::new(true),
            SocketConfig::new().with_event_channel_capacity(1),
        );

        // Don't read until the loop has finished; the single-slot channel
        // forces frame drops, but Disconnected must still arrive.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut saw_disconnected = false;
        let mut total = 0;
        while let Some(event) = events.recv().await {
            total += 1;
            if matches!(event, SocketEvent::Disconnected { .. }) {
                saw_disconnected = true;
            }
        }
        assert!(saw_disconnected);
        assert!(total < 22, "expected overflow to drop frames, got {total}");
    }

    #[tokio::test]
    async fn double_close_does_not_panic() {
        let connector = MockConnector::new(vec![Script::Session(vec![])]);
        let (mut socket, mut events) = open_socket(connector, TestSession::new(true));

        assert_eq!(events.recv().await.unwrap(), SocketEvent::Connected);
        socket.close().await;
        socket.close().await;
    }

    #[tokio::test]
    async fn drop_without_close_stops_the_loop() {
        let connector = MockConnector::new(vec![Script::Session(vec![])]);
        let (socket, mut events) = open_socket(connector, TestSession::new(true));

        assert_eq!(events.recv().await.unwrap(), SocketEvent::Connected);
        drop(socket);

        // The loop task is aborted; the event channel closes without hanging.
        while events.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn config_defaults_and_builders() {
        let config = SocketConfig::new();
        assert_eq!(config.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));

        let config = SocketConfig::new()
            .with_reconnect_delay(Duration::from_secs(10))
            .with_event_channel_capacity(0)
            .with_shutdown_timeout(Duration::from_millis(50));
        assert_eq!(config.reconnect_delay, Duration::from_secs(10));
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.shutdown_timeout, Duration::from_millis(50));
    }
}
