//! Wire types matching the ChatWire backend JSON exactly.
//!
//! The backend has two frame families:
//!
//! - Room sockets carry [`ChatMessage`] objects (Mongo-style `_id`, snake_case
//!   fields, RFC 3339 `created_at`).
//! - The presence socket mixes tagged frames (`{"type": "notification", ...}`
//!   with PascalCase fields) and untagged roster updates
//!   (`{"user_id": ..., "online": ...}`). [`decode_presence_frame`] sorts them
//!   with an explicit unknown-kind fallback — never a silent failure.
//!
//! Outbound room messages are raw trimmed text, *not* JSON-wrapped: the
//! backend wraps them server-side before echoing. That asymmetry is part of
//! the wire contract and is preserved here.

use serde::{Deserialize, Serialize};

use crate::session::Identity;

// ── Chat frames ─────────────────────────────────────────────────────

/// A chat message as carried on the room socket and in REST history
/// responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Backend-assigned message id.
    #[serde(rename = "_id")]
    pub id: String,
    /// Room the message belongs to.
    pub room_id: String,
    /// Display name of the sender.
    pub username: String,
    /// Message body.
    pub content: String,
    /// Sender's user id.
    pub user_id: String,
    /// Creation time, RFC 3339.
    pub created_at: String,
}

/// A decoded inbound chat message with ownership attributed against the
/// authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    /// The wire message.
    pub message: ChatMessage,
    /// `true` when the sender is the authenticated user.
    pub is_own: bool,
}

impl ChatEvent {
    /// Tag a wire message with ownership relative to `self_id`.
    pub fn tag(message: ChatMessage, self_id: &str) -> Self {
        let is_own = message.user_id == self_id;
        Self { message, is_own }
    }
}

// ── Presence frames ─────────────────────────────────────────────────

/// Payload of a `{"type": "notification"}` presence frame.
///
/// Field names are PascalCase on the wire; `type` itself is matched before
/// deserialization and not carried here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Sender's user id.
    #[serde(rename = "UserId")]
    pub user_id: String,
    /// Sender's display name.
    #[serde(rename = "Username")]
    pub username: String,
    /// Message body that triggered the notification.
    #[serde(rename = "Content")]
    pub content: String,
}

/// Untagged roster update sent when a conversation partner goes on/offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineStatus {
    /// The user whose status changed.
    pub user_id: String,
    /// Whether they are now online.
    pub online: bool,
}

impl OnlineStatus {
    /// Try to read a raw presence update as a roster change.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// A decoded presence frame.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceFrame {
    /// A `"notification"` frame.
    Notification(NotificationPayload),
    /// Any other kind (roster updates, pings, future control frames).
    /// Forwarded at full fidelity without interpretation.
    Other(serde_json::Value),
}

/// Decode one inbound presence frame.
///
/// Frames tagged `"notification"` become [`PresenceFrame::Notification`];
/// every other valid JSON object — tagged or not — falls through to
/// [`PresenceFrame::Other`].
///
/// # Errors
///
/// Returns the underlying `serde_json` error when the frame is not valid
/// JSON or a notification frame is missing its fields. Callers drop and log
/// such frames.
pub fn decode_presence_frame(text: &str) -> Result<PresenceFrame, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("type").and_then(serde_json::Value::as_str) == Some("notification") {
        serde_json::from_value(value).map(PresenceFrame::Notification)
    } else {
        Ok(PresenceFrame::Other(value))
    }
}

// ── Connection URLs ─────────────────────────────────────────────────

/// Room socket URL: `{endpoint}/join_room/{roomId}?user_id={id}&username={name}`.
pub fn room_url(endpoint: &str, room_id: &str, identity: &Identity) -> String {
    format!(
        "{}/join_room/{}?user_id={}&username={}",
        endpoint.trim_end_matches('/'),
        room_id,
        identity.id,
        identity.username
    )
}

/// Presence socket URL: `{endpoint}/ws/join_app?user_id={id}`.
pub fn presence_url(endpoint: &str, user_id: &str) -> String {
    format!(
        "{}/ws/join_app?user_id={}",
        endpoint.trim_end_matches('/'),
        user_id
    )
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

    #[test]
    fn chat_message_decodes_backend_fixture() {
        let json = r#"{"_id":"m1","room_id":"42","user_id":"1","username":"alice","content":"hi","created_at":"2024-01-01T00:00:00Z"}"#;
        let msg: ChatMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id, "m1");
        assert_eq!(msg.room_id, "42");
        assert_eq!(msg.user_id, "1");
        assert_eq!(msg.username, "alice");
        assert_eq!(msg.content, "hi");
        assert_eq!(msg.created_at, "2024-01-01T00:00:00Z");
    }

    #[test]
    fn chat_message_serializes_id_as_underscore_id() {
        let msg = ChatMessage {
            id: "m1".into(),
            room_id: "42".into(),
            username: "alice".into(),
            content: "hi".into(),
            user_id: "1".into(),
            created_at: "2024-01-01T00:00:00Z".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["_id"], "m1");
        assert!(json.get("id").is_none());
    }

    #[test]
    fn chat_event_ownership_tagging() {
        let msg: ChatMessage = serde_json::from_str(
            r#"{"_id":"m1","room_id":"42","user_id":"1","username":"alice","content":"hi","created_at":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        assert!(ChatEvent::tag(msg.clone(), "1").is_own);
        assert!(!ChatEvent::tag(msg, "9").is_own);
    }

    #[test]
    fn notification_frame_decodes_pascal_case_fields() {
        let frame =
            decode_presence_frame(r#"{"type":"notification","UserId":"9","Username":"bob","Content":"hey"}"#)
                .unwrap();
        match frame {
            PresenceFrame::Notification(n) => {
                assert_eq!(n.user_id, "9");
                assert_eq!(n.username, "bob");
                assert_eq!(n.content, "hey");
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_falls_through_to_other() {
        let frame = decode_presence_frame(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(frame, PresenceFrame::Other(_)));
    }

    #[test]
    fn untagged_roster_update_is_other() {
        let frame = decode_presence_frame(r#"{"user_id":"7","online":true}"#).unwrap();
        let PresenceFrame::Other(value) = frame else {
            panic!("expected raw update");
        };
        let status = OnlineStatus::from_value(&value).unwrap();
        assert_eq!(status.user_id, "7");
        assert!(status.online);
    }

    #[test]
    fn malformed_frame_is_an_error_not_a_panic() {
        assert!(decode_presence_frame("not json").is_err());
        assert!(decode_presence_frame(r#"{"type":"notification"}"#).is_err());
    }

    #[test]
    fn online_status_rejects_unrelated_values() {
        let value = serde_json::json!({"type": "ping"});
        assert!(OnlineStatus::from_value(&value).is_none());
    }

    #[test]
    fn room_url_shape() {
        let identity = Identity::new("1", "alice");
        assert_eq!(
            room_url("ws://localhost:8080", "42", &identity),
            "ws://localhost:8080/join_room/42?user_id=1&username=alice"
        );
    }

    #[test]
    fn room_url_tolerates_trailing_slash() {
        let identity = Identity::new("1", "alice");
        assert_eq!(
            room_url("ws://localhost:8080/", "42", &identity),
            "ws://localhost:8080/join_room/42?user_id=1&username=alice"
        );
    }

    #[test]
    fn presence_url_shape() {
        assert_eq!(
            presence_url("ws://localhost:8080", "1"),
            "ws://localhost:8080/ws/join_app?user_id=1"
        );
    }
}
