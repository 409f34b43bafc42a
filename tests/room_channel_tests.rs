//! Integration tests for [`RoomChannel`]: joining, switching, sending, and
//! the reconnect behavior of the underlying socket.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chatwire_client::{ChatWireError, RoomChannel, RoomEvent, SocketConfig};

use common::{chat_frame, close_frame, text_frame, MockConnector, Script, TestSession};

fn new_channel(
    connector: Arc<MockConnector>,
    session: Arc<TestSession>,
) -> (RoomChannel, tokio::sync::mpsc::Receiver<RoomEvent>) {
    RoomChannel::new("ws://chat.test", session, connector, SocketConfig::new())
}

async fn expect_connected(events: &mut tokio::sync::mpsc::Receiver<RoomEvent>) {
    let event = events.recv().await.unwrap();
    assert!(matches!(event, RoomEvent::Connected), "got {event:?}");
}

#[tokio::test]
async fn join_dials_the_room_url_with_identity() {
    let connector = MockConnector::endless();
    let session = TestSession::new("1", "alice");
    let (mut channel, mut events) = new_channel(Arc::clone(&connector), session);

    channel.join("42").await;
    expect_connected(&mut events).await;

    assert_eq!(
        connector.urls.lock().unwrap().as_slice(),
        ["ws://chat.test/join_room/42?user_id=1&username=alice"]
    );
    channel.leave().await;
}

#[tokio::test]
async fn own_and_foreign_messages_are_tagged() {
    let connector = MockConnector::new(vec![Script::Session(vec![
        text_frame(&chat_frame("m1", "42", "1", "alice", "hi there")),
        text_frame(&chat_frame("m2", "42", "2", "bob", "hello back")),
    ])]);
    let session = TestSession::new("1", "alice");
    let (mut channel, mut events) = new_channel(connector, session);

    channel.join("42").await;
    expect_connected(&mut events).await;

    let RoomEvent::Message(first) = events.recv().await.unwrap() else {
        panic!("expected message");
    };
    assert!(first.is_own);
    assert_eq!(first.message.content, "hi there");

    let RoomEvent::Message(second) = events.recv().await.unwrap() else {
        panic!("expected message");
    };
    assert!(!second.is_own);
    assert_eq!(second.message.username, "bob");

    channel.leave().await;
}

#[tokio::test]
async fn send_message_trims_and_sends_raw_text() {
    let connector = MockConnector::endless();
    let session = TestSession::new("1", "alice");
    let (mut channel, mut events) = new_channel(Arc::clone(&connector), session);

    channel.join("42").await;
    expect_connected(&mut events).await;

    channel.send_message("  hello world  ").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(connector.sent.lock().unwrap().as_slice(), ["hello world"]);
    channel.leave().await;
}

#[tokio::test]
async fn whitespace_only_message_is_rejected_before_sending() {
    let connector = MockConnector::endless();
    let session = TestSession::new("1", "alice");
    let (mut channel, mut events) = new_channel(Arc::clone(&connector), session);

    channel.join("42").await;
    expect_connected(&mut events).await;

    let err = channel.send_message("   \n\t ").unwrap_err();
    assert!(matches!(err, ChatWireError::EmptyMessage));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(connector.sent.lock().unwrap().is_empty());

    channel.leave().await;
}

#[tokio::test]
async fn send_without_joined_room_fails() {
    let connector = MockConnector::endless();
    let session = TestSession::new("1", "alice");
    let (channel, _events) = new_channel(connector, session);

    let err = channel.send_message("hello").unwrap_err();
    assert!(matches!(err, ChatWireError::NotOpen));
}

#[tokio::test]
async fn joining_the_same_room_twice_is_a_no_op() {
    let connector = MockConnector::endless();
    let session = TestSession::new("1", "alice");
    let (mut channel, mut events) = new_channel(Arc::clone(&connector), session);

    channel.join("42").await;
    expect_connected(&mut events).await;
    channel.join("42").await;
    channel.join("42").await;

    assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    channel.leave().await;
}

#[tokio::test]
async fn joining_another_room_closes_the_previous_socket() {
    let connector = MockConnector::endless();
    let session = TestSession::new("1", "alice");
    let (mut channel, mut events) = new_channel(Arc::clone(&connector), session);

    channel.join("42").await;
    expect_connected(&mut events).await;
    channel.join("43").await;

    assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    assert!(connector.closed.load(Ordering::Relaxed));
    assert_eq!(channel.room_id(), Some("43"));
    let urls = connector.urls.lock().unwrap();
    assert!(urls[1].contains("/join_room/43?"));
    drop(urls);

    channel.leave().await;
}

#[tokio::test]
async fn leave_emits_a_normal_disconnect() {
    let connector = MockConnector::endless();
    let session = TestSession::new("1", "alice");
    let (mut channel, mut events) = new_channel(connector, session);

    channel.join("42").await;
    expect_connected(&mut events).await;
    channel.leave().await;

    assert_eq!(channel.room_id(), None);
    let event = events.recv().await.unwrap();
    assert!(matches!(
        event,
        RoomEvent::Disconnected {
            code: 1000,
            will_retry: false,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn dropped_connection_reconnects_after_the_delay() {
    let connector = MockConnector::new(vec![
        Script::Session(vec![close_frame(1006)]),
        Script::Session(vec![]),
    ]);
    let session = TestSession::new("1", "alice");
    let (mut channel, mut events) = new_channel(Arc::clone(&connector), session);

    channel.join("42").await;
    expect_connected(&mut events).await;

    let event = events.recv().await.unwrap();
    assert!(matches!(
        event,
        RoomEvent::Disconnected {
            code: 1006,
            will_retry: true,
            ..
        }
    ));
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(3100)).await;
    expect_connected(&mut events).await;
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);

    channel.leave().await;
}

#[tokio::test(start_paused = true)]
async fn leave_during_the_retry_window_cancels_the_reconnect() {
    let connector = MockConnector::new(vec![
        Script::Session(vec![close_frame(1006)]),
        Script::Session(vec![]),
    ]);
    let session = TestSession::new("1", "alice");
    let (mut channel, mut events) = new_channel(Arc::clone(&connector), session);

    channel.join("42").await;
    expect_connected(&mut events).await;
    let event = events.recv().await.unwrap();
    assert!(matches!(event, RoomEvent::Disconnected { will_retry: true, .. }));

    channel.leave().await;

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn expired_session_does_not_reconnect() {
    let connector = MockConnector::new(vec![
        Script::Session(vec![close_frame(1006)]),
        Script::Session(vec![]),
    ]);
    let session = TestSession::new("1", "alice");
    let (mut channel, mut events) = new_channel(Arc::clone(&connector), Arc::clone(&session));

    // Token expires before the connection drops; the abnormal close must
    // not schedule a reconnect.
    session.invalidate();
    channel.join("42").await;
    expect_connected(&mut events).await;

    let event = events.recv().await.unwrap();
    assert!(matches!(event, RoomEvent::Disconnected { will_retry: false, .. }));
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn malformed_chat_frame_is_skipped() {
    let connector = MockConnector::new(vec![Script::Session(vec![
        text_frame("not json at all"),
        text_frame(&chat_frame("m1", "42", "2", "bob", "still here")),
    ])]);
    let session = TestSession::new("1", "alice");
    let (mut channel, mut events) = new_channel(connector, session);

    channel.join("42").await;
    expect_connected(&mut events).await;

    // The malformed frame is dropped; the next one still arrives.
    let RoomEvent::Message(event) = events.recv().await.unwrap() else {
        panic!("expected message");
    };
    assert_eq!(event.message.content, "still here");

    channel.leave().await;
}

#[tokio::test]
async fn rejoin_after_leave_dials_again() {
    let connector = MockConnector::endless();
    let session = TestSession::new("1", "alice");
    let (mut channel, mut events) = new_channel(Arc::clone(&connector), session);

    channel.join("42").await;
    expect_connected(&mut events).await;
    channel.leave().await;

    channel.join("42").await;
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);

    channel.leave().await;
}
