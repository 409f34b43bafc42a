//! Authenticated identity and in-memory session registries.
//!
//! The realtime channels never own the user's identity — they read it from a
//! [`SessionDirectory`] to build connection URLs and to tag message
//! ownership. [`SessionDirectory::token_valid`] is consulted before every
//! reconnect attempt, so clearing the token on logout stops reconnects
//! without touching the sockets directly.
//!
//! [`RoomRegistry`] and [`MemoryKvStore`] are explicit in-memory replacements
//! for ad-hoc browser-storage keying: room metadata lives in a typed map and
//! anything else goes through the `{key, value, ttl}` [`KvStore`] schema.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

// ── Identity ────────────────────────────────────────────────────────

/// The authenticated user. Read-only to the realtime core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Backend user id (an opaque string).
    pub id: String,
    /// Display name, sent as the `username` query parameter on room joins.
    pub username: String,
    /// Avatar URL, if the user has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl Identity {
    /// Create an identity with no avatar.
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            avatar_url: None,
        }
    }

    /// Set the avatar URL.
    #[must_use]
    pub fn with_avatar_url(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }
}

// ── Session directory ───────────────────────────────────────────────

/// Source of the authenticated identity and token validity.
///
/// Both realtime channels hold an `Arc<dyn SessionDirectory>`. They call
/// [`identity`](SessionDirectory::identity) when building connection URLs and
/// [`token_valid`](SessionDirectory::token_valid) before scheduling a
/// reconnect; a `false` answer makes the channel stay Closed instead.
pub trait SessionDirectory: Send + Sync + 'static {
    /// The authenticated identity.
    fn identity(&self) -> Identity;

    /// Whether the session token is still considered valid.
    fn token_valid(&self) -> bool;
}

struct SessionInner {
    identity: Identity,
    token: Option<String>,
}

/// In-memory [`SessionDirectory`] holding one identity and its token.
pub struct MemorySession {
    inner: RwLock<SessionInner>,
}

impl MemorySession {
    /// Create a session for the given identity with a valid token.
    pub fn new(identity: Identity, token: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(SessionInner {
                identity,
                token: Some(token.into()),
            }),
        }
    }

    /// Replace the session token (e.g. after a refresh).
    pub fn set_token(&self, token: impl Into<String>) {
        self.write().token = Some(token.into());
    }

    /// Drop the token on logout. Reconnect attempts stop once this is called.
    pub fn clear_token(&self) {
        self.write().token = None;
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionDirectory for MemorySession {
    fn identity(&self) -> Identity {
        self.read().identity.clone()
    }

    fn token_valid(&self) -> bool {
        self.read().token.is_some()
    }
}

impl std::fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.read();
        f.debug_struct("MemorySession")
            .field("identity", &inner.identity)
            .field("token_valid", &inner.token.is_some())
            .finish()
    }
}

// ── Room registry ───────────────────────────────────────────────────

/// Display metadata for a conversation room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    /// Display name of the other participant.
    pub name: String,
    /// Email of the other participant.
    pub email: String,
}

/// Explicit in-memory map of `room_id` to [`RoomInfo`].
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, RoomInfo>>,
}

impl RoomRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace metadata for a room.
    pub fn insert(&self, room_id: impl Into<String>, info: RoomInfo) {
        self.rooms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(room_id.into(), info);
    }

    /// Look up metadata for a room.
    pub fn get(&self, room_id: &str) -> Option<RoomInfo> {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room_id)
            .cloned()
    }

    /// Remove metadata for a room.
    pub fn remove(&self, room_id: &str) -> Option<RoomInfo> {
        self.rooms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(room_id)
    }
}

// ── Key-value store ─────────────────────────────────────────────────

/// External key-value collaborator with an explicit `{key, value, ttl}`
/// schema. `ttl = None` means the entry never expires.
pub trait KvStore: Send + Sync {
    /// Store a value, optionally expiring after `ttl`.
    fn put(&self, key: &str, value: &str, ttl: Option<Duration>);

    /// Fetch a value. Expired entries behave as absent.
    fn get(&self, key: &str) -> Option<String>;

    /// Remove a value.
    fn remove(&self, key: &str);
}

struct KvEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory [`KvStore`] with lazy expiry on read.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, KvEntry>>,
}

impl MemoryKvStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn put(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let entry = KvEntry {
            value: value.to_owned(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), entry);
    }

    fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(entry) if entry.expired() => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    fn remove(&self, key: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
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

    #[test]
    fn identity_builder() {
        let identity = Identity::new("1", "alice").with_avatar_url("https://example.com/a.png");
        assert_eq!(identity.id, "1");
        assert_eq!(identity.username, "alice");
        assert_eq!(identity.avatar_url.as_deref(), Some("https://example.com/a.png"));
    }

    #[test]
    fn memory_session_token_lifecycle() {
        let session = MemorySession::new(Identity::new("1", "alice"), "tok");
        assert!(session.token_valid());
        assert_eq!(session.identity().username, "alice");

        session.clear_token();
        assert!(!session.token_valid());

        session.set_token("tok2");
        assert!(session.token_valid());
    }

    #[test]
    fn room_registry_round_trip() {
        let registry = RoomRegistry::new();
        assert!(registry.get("42").is_none());

        registry.insert(
            "42",
            RoomInfo {
                name: "Bob".into(),
                email: "bob@example.com".into(),
            },
        );
        let info = registry.get("42").unwrap();
        assert_eq!(info.name, "Bob");

        registry.remove("42");
        assert!(registry.get("42").is_none());
    }

    #[test]
    fn kv_store_without_ttl_persists() {
        let store = MemoryKvStore::new();
        store.put("k", "v", None);
        assert_eq!(store.get("k").as_deref(), Some("v"));
        store.remove("k");
        assert!(store.get("k").is_none());
    }

    #[test]
    fn kv_store_expired_entry_is_absent() {
        let store = MemoryKvStore::new();
        store.put("k", "v", Some(Duration::ZERO));
        assert!(store.get("k").is_none());
    }

    #[test]
    fn kv_store_overwrite_resets_ttl() {
        let store = MemoryKvStore::new();
        store.put("k", "v1", Some(Duration::ZERO));
        store.put("k", "v2", None);
        assert_eq!(store.get("k").as_deref(), Some("v2"));
    }
}
