//! REST API client for the chat backend.
//!
//! Covers the HTTP side of the service: authentication, user search,
//! conversation listing, room creation, and message history. The realtime
//! side lives in [`RoomChannel`](crate::room::RoomChannel) and
//! [`PresenceChannel`](crate::presence::PresenceChannel); a typical flow is
//! to [`login`](ApiClient::login), store the returned token in a
//! [`MemorySession`](crate::session::MemorySession), then open the sockets.
//!
//! Only available with the `rest-api` feature (enabled by default).

use std::sync::{PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ChatWireError, Result};
use crate::protocol::ChatMessage;
use crate::session::RoomInfo;

/// Credentials for [`ApiClient::login`].
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    /// Account email.
    pub email: String,
    /// Account password.
    pub password: String,
}

/// The authenticated user returned by [`ApiClient::login`].
#[derive(Debug, Clone, Deserialize)]
pub struct AuthenticatedUser {
    /// User id.
    pub id: String,
    /// Display name.
    pub username: String,
    /// Account email.
    pub email: String,
    /// Bearer token for subsequent requests.
    pub token: String,
    /// Avatar URL, when one is set.
    #[serde(default)]
    pub image: Option<String>,
}

/// Response body of [`ApiClient::login`].
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    /// Human-readable status message.
    pub message: String,
    /// The authenticated user and token.
    pub user: AuthenticatedUser,
}

/// Payload for [`ApiClient::register`].
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    /// Desired display name.
    pub username: String,
    /// Account email.
    pub email: String,
    /// Account password.
    pub password: String,
}

/// Registered-but-unverified user returned by [`ApiClient::register`].
#[derive(Debug, Clone, Deserialize)]
pub struct RegisteredUser {
    /// User id.
    pub id: String,
    /// Display name.
    pub username: String,
    /// Account email.
    pub email: String,
}

/// Response body of [`ApiClient::register`].
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterResponse {
    /// Human-readable status message.
    pub message: String,
    /// The newly registered user; no token until the OTP is verified.
    pub user: RegisteredUser,
}

/// Payload for [`ApiClient::verify_otp`].
#[derive(Debug, Clone, Serialize)]
pub struct VerifyOtpRequest {
    /// Account email.
    pub email: String,
    /// One-time passcode from the verification email.
    pub otp: String,
}

/// Response body of [`ApiClient::verify_otp`].
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyOtpResponse {
    /// Human-readable status message.
    pub message: String,
}

/// Response body of [`ApiClient::upload_image`].
#[derive(Debug, Clone, Deserialize)]
pub struct UploadImageResponse {
    /// Human-readable status message.
    pub message: String,
    /// Public URL of the stored image; feed it into
    /// [`Identity::with_avatar_url`](crate::session::Identity::with_avatar_url).
    pub image_url: String,
}

/// A user found via [`ApiClient::search_user`].
#[derive(Debug, Clone, Deserialize)]
pub struct SearchUserResponse {
    /// User id.
    pub id: String,
    /// Display name.
    pub username: String,
    /// Account email.
    pub email: String,
    /// Avatar URL, when one is set.
    #[serde(default)]
    pub image: Option<String>,
}

/// A member of a conversation.
#[derive(Debug, Clone, Deserialize)]
pub struct Participant {
    /// User id.
    pub id: String,
    /// Display name.
    pub username: String,
    /// Account email.
    pub email: String,
    /// Avatar URL, when one is set.
    #[serde(default)]
    pub image: Option<String>,
}

/// A conversation summary from [`ApiClient::conversations`].
#[derive(Debug, Clone, Deserialize)]
pub struct Conversation {
    /// Conversation id.
    #[serde(rename = "_id")]
    pub id: String,
    /// Members of the conversation.
    pub participants: Vec<Participant>,
    /// Most recent message, if any.
    #[serde(default)]
    pub last_message: Option<ChatMessage>,
    /// Creation timestamp, RFC 3339.
    pub created_at: String,
    /// Last-activity timestamp, RFC 3339.
    pub updated_at: String,
    /// Room id to pass to [`RoomChannel::join`](crate::room::RoomChannel::join).
    pub room_id: String,
}

/// Response body of [`ApiClient::conversations`].
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationsResponse {
    /// Human-readable status message.
    pub message: String,
    /// The caller's conversations.
    pub data: Vec<Conversation>,
}

/// Response body of [`ApiClient::room_messages`].
#[derive(Debug, Clone, Deserialize)]
pub struct RoomMessagesResponse {
    /// Message history, oldest first. Absent when the room is empty.
    #[serde(default)]
    pub data: Vec<ChatMessage>,
    /// Peer display info for the room header, when the server provides it.
    #[serde(default)]
    pub room_info: Option<RoomInfo>,
}

/// Error body the server returns on non-2xx responses.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
}

/// HTTP client for the chat backend.
///
/// Holds an optional bearer token applied to every request. The token is
/// usually obtained from [`login`](Self::login) and shared with the session
/// layer; [`set_token`](Self::set_token) takes `&self` so one client can be
/// shared across tasks.
#[derive(Debug)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    token: RwLock<Option<String>>,
}

impl ApiClient {
    /// Create a client against `base_url` (e.g. `http://localhost:8080`).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            http: reqwest::Client::new(),
            token: RwLock::new(None),
        }
    }

    /// Set or clear the bearer token used on subsequent requests.
    pub fn set_token(&self, token: Option<String>) {
        *self
            .token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = token;
    }

    fn current_token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Execute a prepared request and decode the JSON response, mapping
    /// non-2xx statuses to [`ChatWireError::Api`].
    async fn execute<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let request = match self.current_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ApiErrorBody>().await {
                Ok(body) if !body.message.is_empty() => body.message,
                Ok(body) if !body.error.is_empty() => body.error,
                _ => "request failed".to_owned(),
            };
            return Err(ChatWireError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }

    /// Authenticate with email and password.
    ///
    /// On success the returned token is stored on the client, so follow-up
    /// calls are already authenticated.
    ///
    /// # Errors
    ///
    /// [`ChatWireError::Api`] with the server's message on bad credentials,
    /// [`ChatWireError::Http`] on transport failure.
    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse> {
        let response: LoginResponse = self
            .execute(self.http.post(self.url("/login")).json(request))
            .await?;
        self.set_token(Some(response.user.token.clone()));
        Ok(response)
    }

    /// Create a new account. The account must be verified via
    /// [`verify_otp`](Self::verify_otp) before it can log in.
    pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse> {
        self.execute(self.http.post(self.url("/register")).json(request))
            .await
    }

    /// Verify a freshly registered account with the emailed passcode.
    pub async fn verify_otp(&self, request: &VerifyOtpRequest) -> Result<VerifyOtpResponse> {
        self.execute(self.http.post(self.url("/verify_otp")).json(request))
            .await
    }

    /// Upload a profile image as multipart form data.
    ///
    /// The returned URL is what the backend serves the avatar from; it also
    /// appears as `image` on subsequent logins.
    pub async fn upload_image(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadImageResponse> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_owned());
        let form = reqwest::multipart::Form::new().part("file", part);
        self.execute(self.http.post(self.url("/upload_image")).multipart(form))
            .await
    }

    /// The URL to send the browser to for OAuth sign-in with `provider`
    /// (e.g. `google`). The backend completes the flow and redirects back
    /// with a token.
    #[must_use]
    pub fn oauth_url(&self, provider: &str) -> String {
        self.url(&format!("/auth/{provider}"))
    }

    /// Look up a user by exact email address.
    pub async fn search_user(&self, email: &str) -> Result<SearchUserResponse> {
        self.execute(
            self.http
                .get(self.url("/users/search"))
                .query(&[("email", email)]),
        )
        .await
    }

    /// List the caller's conversations, most recently active first.
    pub async fn conversations(&self) -> Result<ConversationsResponse> {
        self.execute(self.http.get(self.url("/conversation"))).await
    }

    /// Create (or fetch the existing) direct room with `user_id`.
    ///
    /// The response shape varies between server versions, so the raw JSON is
    /// returned; the `room_id` field is what
    /// [`RoomChannel::join`](crate::room::RoomChannel::join) needs.
    pub async fn create_room(&self, user_id: &str) -> Result<serde_json::Value> {
        self.execute(
            self.http
                .post(self.url(&format!("/create_room/{user_id}"))),
        )
        .await
    }

    /// Fetch the message history of a room, oldest first.
    pub async fn room_messages(&self, room_id: &str) -> Result<RoomMessagesResponse> {
        self.execute(
            self.http
                .get(self.url(&format!("/get_room_messages/{room_id}"))),
        )
        .await
    }
}

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
    fn base_url_trailing_slash_is_trimmed() {
        let client = ApiClient::new("http://localhost:8080/");
        assert_eq!(client.url("/login"), "http://localhost:8080/login");
    }

    #[test]
    fn set_token_replaces_and_clears() {
        let client = ApiClient::new("http://localhost:8080");
        assert_eq!(client.current_token(), None);
        client.set_token(Some("t1".to_owned()));
        assert_eq!(client.current_token().as_deref(), Some("t1"));
        client.set_token(None);
        assert_eq!(client.current_token(), None);
    }

    #[test]
    fn login_response_decodes() {
        let raw = r#"{
            "message": "login successful",
            "user": {
                "id": "1",
                "username": "alice",
                "email": "alice@example.com",
                "token": "jwt-token"
            }
        }"#;
        let response: LoginResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.user.id, "1");
        assert_eq!(response.user.username, "alice");
        assert_eq!(response.user.token, "jwt-token");
        assert_eq!(response.user.image, None);
    }

    #[test]
    fn conversation_decodes_with_mongo_style_id() {
        let raw = r#"{
            "message": "ok",
            "data": [{
                "_id": "conv-1",
                "participants": [
                    {"id": "1", "username": "alice", "email": "alice@example.com"},
                    {"id": "2", "username": "bob", "email": "bob@example.com", "image": "http://img"}
                ],
                "last_message": {
                    "_id": "m1",
                    "room_id": "42",
                    "username": "bob",
                    "content": "hello",
                    "user_id": "2",
                    "created_at": "2024-01-01T00:00:00Z"
                },
                "created_at": "2024-01-01T00:00:00Z",
                "updated_at": "2024-01-02T00:00:00Z",
                "room_id": "42"
            }]
        }"#;
        let response: ConversationsResponse = serde_json::from_str(raw).unwrap();
        let conv = &response.data[0];
        assert_eq!(conv.id, "conv-1");
        assert_eq!(conv.room_id, "42");
        assert_eq!(conv.participants.len(), 2);
        assert_eq!(conv.last_message.as_ref().unwrap().content, "hello");
    }

    #[test]
    fn conversation_decodes_without_last_message() {
        let raw = r#"{
            "_id": "conv-2",
            "participants": [],
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z",
            "room_id": "43"
        }"#;
        let conv: Conversation = serde_json::from_str(raw).unwrap();
        assert!(conv.last_message.is_none());
    }

    #[test]
    fn room_messages_decodes_empty_history() {
        let raw = r#"{"room_info": {"name": "bob", "email": "bob@example.com"}}"#;
        let response: RoomMessagesResponse = serde_json::from_str(raw).unwrap();
        assert!(response.data.is_empty());
        assert_eq!(response.room_info.unwrap().name, "bob");
    }

    #[test]
    fn upload_image_response_decodes() {
        let raw = r#"{"message": "uploaded", "image_url": "http://cdn.test/a.png"}"#;
        let response: UploadImageResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.message, "uploaded");
        assert_eq!(response.image_url, "http://cdn.test/a.png");
    }

    #[test]
    fn oauth_url_points_at_the_provider_route() {
        let client = ApiClient::new("http://localhost:8080");
        assert_eq!(client.oauth_url("google"), "http://localhost:8080/auth/google");
    }

    #[test]
    fn login_request_serializes_expected_fields() {
        let request = LoginRequest {
            email: "alice@example.com".to_owned(),
            password: "secret".to_owned(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"email": "alice@example.com", "password": "secret"})
        );
    }
}
