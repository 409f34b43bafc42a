//! Integration tests for [`PresenceChannel`]: notification decoding, raw
//! frame pass-through, and lifecycle.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chatwire_client::{OnlineStatus, PresenceChannel, PresenceUpdate, SocketConfig};

use common::{
    close_frame, notification_frame, roster_frame, text_frame, MockConnector, Script, TestSession,
};

fn new_channel(
    connector: Arc<MockConnector>,
    session: Arc<TestSession>,
) -> (PresenceChannel, tokio::sync::mpsc::Receiver<PresenceUpdate>) {
    PresenceChannel::new("ws://chat.test", session, connector, SocketConfig::new())
}

async fn expect_connected(updates: &mut tokio::sync::mpsc::Receiver<PresenceUpdate>) {
    let update = updates.recv().await.unwrap();
    assert!(matches!(update, PresenceUpdate::Connected), "got {update:?}");
}

#[tokio::test]
async fn start_dials_the_app_wide_url() {
    let connector = MockConnector::endless();
    let session = TestSession::new("1", "alice");
    let (mut channel, mut updates) = new_channel(Arc::clone(&connector), session);

    channel.start("1").await;
    expect_connected(&mut updates).await;

    assert_eq!(
        connector.urls.lock().unwrap().as_slice(),
        ["ws://chat.test/ws/join_app?user_id=1"]
    );
    channel.stop().await;
}

#[tokio::test]
async fn notification_from_another_user_is_decoded() {
    let connector = MockConnector::new(vec![Script::Session(vec![text_frame(
        &notification_frame("2", "bob", "you there?"),
    )])]);
    let session = TestSession::new("1", "alice");
    let (mut channel, mut updates) = new_channel(connector, session);

    channel.start("1").await;
    expect_connected(&mut updates).await;

    let PresenceUpdate::Notification(n) = updates.recv().await.unwrap() else {
        panic!("expected notification");
    };
    assert_eq!(n.sender_id, "2");
    assert_eq!(n.sender_name, "bob");
    assert_eq!(n.body, "you there?");

    channel.stop().await;
}

#[tokio::test]
async fn roster_update_passes_through_raw() {
    let connector = MockConnector::new(vec![Script::Session(vec![text_frame(&roster_frame(
        "7", true,
    ))])]);
    let session = TestSession::new("1", "alice");
    let (mut channel, mut updates) = new_channel(connector, session);

    channel.start("1").await;
    expect_connected(&mut updates).await;

    let PresenceUpdate::Raw(value) = updates.recv().await.unwrap() else {
        panic!("expected raw update");
    };
    let status = OnlineStatus::from_value(&value).unwrap();
    assert_eq!(status.user_id, "7");
    assert!(status.online);

    channel.stop().await;
}

#[tokio::test]
async fn unknown_typed_frame_is_raw_not_notification() {
    let connector = MockConnector::new(vec![Script::Session(vec![text_frame(
        r#"{"type":"ping"}"#,
    )])]);
    let session = TestSession::new("1", "alice");
    let (mut channel, mut updates) = new_channel(connector, session);

    channel.start("1").await;
    expect_connected(&mut updates).await;

    let update = updates.recv().await.unwrap();
    assert!(matches!(update, PresenceUpdate::Raw(_)), "got {update:?}");

    channel.stop().await;
}

#[tokio::test]
async fn start_is_idempotent_while_connected() {
    let connector = MockConnector::endless();
    let session = TestSession::new("1", "alice");
    let (mut channel, mut updates) = new_channel(Arc::clone(&connector), session);

    channel.start("1").await;
    expect_connected(&mut updates).await;
    channel.start("1").await;

    assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    channel.stop().await;
}

#[tokio::test]
async fn stop_closes_and_clears_the_user() {
    let connector = MockConnector::endless();
    let session = TestSession::new("1", "alice");
    let (mut channel, mut updates) = new_channel(Arc::clone(&connector), session);

    channel.start("1").await;
    expect_connected(&mut updates).await;
    channel.stop().await;

    assert_eq!(channel.user_id(), None);
    assert!(connector.closed.load(Ordering::Relaxed));

    let update = updates.recv().await.unwrap();
    assert!(matches!(
        update,
        PresenceUpdate::Disconnected {
            code: 1000,
            will_retry: false,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn presence_socket_reconnects_after_abnormal_close() {
    let connector = MockConnector::new(vec![
        Script::Session(vec![close_frame(1006)]),
        Script::Session(vec![]),
    ]);
    let session = TestSession::new("1", "alice");
    let (mut channel, mut updates) = new_channel(Arc::clone(&connector), session);

    channel.start("1").await;
    expect_connected(&mut updates).await;

    let update = updates.recv().await.unwrap();
    assert!(matches!(
        update,
        PresenceUpdate::Disconnected { will_retry: true, .. }
    ));

    tokio::time::sleep(Duration::from_millis(3100)).await;
    expect_connected(&mut updates).await;
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);

    channel.stop().await;
}
