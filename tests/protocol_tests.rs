//! Wire-format tests against captured server JSON.

mod common;

use chatwire_client::protocol::{decode_presence_frame, room_url, presence_url, PresenceFrame};
use chatwire_client::{ChatEvent, ChatMessage, Identity, OnlineStatus};

#[test]
fn chat_frame_decodes_mongo_style_fields() {
    let raw = common::chat_frame("6611f0", "42", "2", "bob", "hello");
    let message: ChatMessage = serde_json::from_str(&raw).unwrap();
    assert_eq!(message.id, "6611f0");
    assert_eq!(message.room_id, "42");
    assert_eq!(message.user_id, "2");
    assert_eq!(message.username, "bob");
    assert_eq!(message.content, "hello");
    assert_eq!(message.created_at, "2024-01-01T00:00:00Z");
}

#[test]
fn chat_frame_round_trips_the_id_rename() {
    let message = ChatMessage {
        id: "abc".into(),
        room_id: "42".into(),
        username: "alice".into(),
        content: "hi".into(),
        user_id: "1".into(),
        created_at: "2024-01-01T00:00:00Z".into(),
    };
    let value = serde_json::to_value(&message).unwrap();
    assert_eq!(value["_id"], "abc");
    assert!(value.get("id").is_none());
}

#[test]
fn ownership_is_tagged_against_the_authenticated_user() {
    let raw = common::chat_frame("m1", "42", "1", "alice", "mine");
    let message: ChatMessage = serde_json::from_str(&raw).unwrap();
    assert!(ChatEvent::tag(message.clone(), "1").is_own);
    assert!(!ChatEvent::tag(message, "2").is_own);
}

#[test]
fn notification_frame_uses_pascal_case_fields() {
    let raw = common::notification_frame("2", "bob", "hey");
    let frame = decode_presence_frame(&raw).unwrap();
    let PresenceFrame::Notification(payload) = frame else {
        panic!("expected notification, got {frame:?}");
    };
    assert_eq!(payload.user_id, "2");
    assert_eq!(payload.username, "bob");
    assert_eq!(payload.content, "hey");
}

#[test]
fn untagged_roster_frame_is_other() {
    let raw = common::roster_frame("7", false);
    let frame = decode_presence_frame(&raw).unwrap();
    let PresenceFrame::Other(value) = frame else {
        panic!("expected other, got {frame:?}");
    };
    let status = OnlineStatus::from_value(&value).unwrap();
    assert_eq!(status.user_id, "7");
    assert!(!status.online);
}

#[test]
fn unknown_tag_falls_through_to_other() {
    let frame = decode_presence_frame(r#"{"type":"typing","UserId":"2"}"#).unwrap();
    assert!(matches!(frame, PresenceFrame::Other(_)));
}

#[test]
fn invalid_json_is_an_error() {
    assert!(decode_presence_frame("{{nope").is_err());
}

#[test]
fn notification_missing_fields_is_an_error() {
    assert!(decode_presence_frame(r#"{"type":"notification","UserId":"2"}"#).is_err());
}

#[test]
fn urls_match_the_server_routes() {
    let identity = Identity::new("1", "alice");
    assert_eq!(
        room_url("ws://chat.test/", "42", &identity),
        "ws://chat.test/join_room/42?user_id=1&username=alice"
    );
    assert_eq!(
        presence_url("ws://chat.test", "1"),
        "ws://chat.test/ws/join_app?user_id=1"
    );
}
