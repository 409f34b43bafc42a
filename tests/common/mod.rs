#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
#![allow(dead_code)]
//! Shared test utilities for Chatwire Client integration tests.
//!
//! Provides a scripted [`MockTransport`], a [`MockConnector`] that replays
//! one script per connect attempt, a mutable [`TestSession`], and helpers
//! for building server frame JSON.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chatwire_client::{
    ChatWireError, CloseInfo, Connector, Frame, Identity, SessionDirectory, Transport,
};

pub type ScriptedFrame = Option<Result<Frame, ChatWireError>>;

// ── MockTransport ───────────────────────────────────────────────────

/// A scripted mock transport.
///
/// Incoming frames are consumed in order by `recv()`; when the script runs
/// out, `recv()` pends forever so the connection stays open until the test
/// closes it. All payloads sent by the client are recorded.
pub struct MockTransport {
    incoming: VecDeque<ScriptedFrame>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), ChatWireError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Frame, ChatWireError>> {
        if let Some(item) = self.incoming.pop_front() {
            item
        } else {
            std::future::pending().await
        }
    }

    async fn close(&mut self) -> Result<(), ChatWireError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// One scripted connect attempt.
pub enum Script {
    /// The attempt succeeds, delivering these frames.
    Session(Vec<ScriptedFrame>),
    /// The attempt fails with this reason.
    Fail(String),
}

/// A connector that replays one [`Script`] per connect attempt.
///
/// Records every dialed URL and counts attempts. All produced transports
/// share one sent-payload log and a close counter.
pub struct MockConnector {
    scripts: StdMutex<VecDeque<Script>>,
    pub attempts: Arc<AtomicUsize>,
    pub urls: Arc<StdMutex<Vec<String>>>,
    pub sent: Arc<StdMutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
}

impl MockConnector {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: StdMutex::new(VecDeque::from(scripts)),
            attempts: Arc::new(AtomicUsize::new(0)),
            urls: Arc::new(StdMutex::new(Vec::new())),
            sent: Arc::new(StdMutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// A connector whose every attempt succeeds with an empty script.
    pub fn endless() -> Arc<Self> {
        Self::new(vec![
            Script::Session(vec![]),
            Script::Session(vec![]),
            Script::Session(vec![]),
            Script::Session(vec![]),
        ])
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, ChatWireError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_owned());
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Session(frames)) => Ok(Box::new(MockTransport {
                incoming: VecDeque::from(frames),
                sent: Arc::clone(&self.sent),
                closed: Arc::clone(&self.closed),
            })),
            Some(Script::Fail(reason)) => Err(ChatWireError::TransportReceive(reason)),
            None => std::future::pending().await,
        }
    }
}

// ── TestSession ─────────────────────────────────────────────────────

/// A session whose token validity can be flipped mid-test.
pub struct TestSession {
    identity: Identity,
    valid: AtomicBool,
}

impl TestSession {
    pub fn new(id: &str, username: &str) -> Arc<Self> {
        Arc::new(Self {
            identity: Identity::new(id, username),
            valid: AtomicBool::new(true),
        })
    }

    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }
}

impl SessionDirectory for TestSession {
    fn identity(&self) -> Identity {
        self.identity.clone()
    }

    fn token_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }
}

// ── Frame builders ──────────────────────────────────────────────────

pub fn text_frame(s: &str) -> ScriptedFrame {
    Some(Ok(Frame::Text(s.to_owned())))
}

pub fn close_frame(code: u16) -> ScriptedFrame {
    Some(Ok(Frame::Closed(CloseInfo {
        code,
        reason: String::new(),
    })))
}

/// JSON for a chat message frame as the server emits it.
pub fn chat_frame(id: &str, room_id: &str, user_id: &str, username: &str, content: &str) -> String {
    format!(
        r#"{{"_id":"{id}","room_id":"{room_id}","username":"{username}","content":"{content}","user_id":"{user_id}","created_at":"2024-01-01T00:00:00Z"}}"#
    )
}

/// JSON for a notification frame as the server emits it.
pub fn notification_frame(user_id: &str, username: &str, content: &str) -> String {
    format!(
        r#"{{"type":"notification","UserId":"{user_id}","Username":"{username}","Content":"{content}"}}"#
    )
}

/// JSON for an online-status roster update.
pub fn roster_frame(user_id: &str, online: bool) -> String {
    format!(r#"{{"user_id":"{user_id}","online":{online}}}"#)
}
