//! Per-flow session state.
//!
//! A suspended authorization (waiting for a login, a registration form, a
//! namespace choice, or a consent decision) lives entirely in server-side
//! session state. The state is an explicit value with defined fields,
//! passed through each flow step and persisted behind a key-value store
//! interface so the transport (cookie-backed, external store) stays
//! pluggable. There is no server-side timer; an abandoned flow dies with
//! its session.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::AuthResult;
use crate::idp::AuthResponse;
use crate::oauth::AuthRequest;

/// Pending consent data persisted while the grant screen is shown.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantData {
    /// Scopes the user still has to approve.
    pub missing_grants: Vec<String>,
    /// Scopes already granted earlier.
    pub existing_grants: Vec<String>,
}

/// The per-flow session state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// The pending authorization attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_request: Option<AuthRequest>,

    /// The established authentication outcome for this auth method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_response: Option<AuthResponse>,

    /// Nonce bound to the pending registration/consent form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_nonce: Option<String>,

    /// Pending consent data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_data: Option<GrantData>,
}

impl SessionState {
    /// Returns `true` if an authentication outcome is established.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.auth_response.is_some()
    }
}

/// Generates a random form nonce (32 random bytes, base64url).
#[must_use]
pub fn generate_nonce() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.r#gen();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Key-value store for session state, keyed by auth method and session id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads the session state for `(auth_method_id, session_id)`.
    async fn get(
        &self,
        auth_method_id: &str,
        session_id: &str,
    ) -> AuthResult<Option<SessionState>>;

    /// Stores the session state for `(auth_method_id, session_id)`.
    async fn put(
        &self,
        auth_method_id: &str,
        session_id: &str,
        state: SessionState,
    ) -> AuthResult<()>;

    /// Deletes the session state for `(auth_method_id, session_id)`.
    async fn delete(&self, auth_method_id: &str, session_id: &str) -> AuthResult<()>;
}

/// In-memory session store for tests and single-node deployments.
pub struct MemorySessionStore {
    sessions: DashMap<String, (SessionState, OffsetDateTime)>,
    ttl: Duration,
}

impl MemorySessionStore {
    /// Creates a store whose entries expire after `ttl_secs` seconds.
    #[must_use]
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }

    fn key(auth_method_id: &str, session_id: &str) -> String {
        format!("{auth_method_id}:{session_id}")
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(
        &self,
        auth_method_id: &str,
        session_id: &str,
    ) -> AuthResult<Option<SessionState>> {
        let key = Self::key(auth_method_id, session_id);
        if let Some(entry) = self.sessions.get(&key) {
            let (state, expires) = entry.value();
            if OffsetDateTime::now_utc() < *expires {
                return Ok(Some(state.clone()));
            }
        }
        // Lazily drop expired entries
        self.sessions
            .remove_if(&key, |_, (_, expires)| OffsetDateTime::now_utc() >= *expires);
        Ok(None)
    }

    async fn put(
        &self,
        auth_method_id: &str,
        session_id: &str,
        state: SessionState,
    ) -> AuthResult<()> {
        let expires = OffsetDateTime::now_utc() + self.ttl;
        self.sessions
            .insert(Self::key(auth_method_id, session_id), (state, expires));
        Ok(())
    }

    async fn delete(&self, auth_method_id: &str, session_id: &str) -> AuthResult<()> {
        self.sessions.remove(&Self::key(auth_method_id, session_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemorySessionStore::new(3600);
        assert!(store.get("default", "s-1").await.unwrap().is_none());

        let mut state = SessionState::default();
        state.registration_nonce = Some("nonce".to_string());
        store.put("default", "s-1", state).await.unwrap();

        let loaded = store.get("default", "s-1").await.unwrap().unwrap();
        assert_eq!(loaded.registration_nonce.as_deref(), Some("nonce"));

        // Sessions are scoped per auth method
        assert!(store.get("other", "s-1").await.unwrap().is_none());

        store.delete("default", "s-1").await.unwrap();
        assert!(store.get("default", "s-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_expiry() {
        let store = MemorySessionStore::new(0);
        store
            .put("default", "s-1", SessionState::default())
            .await
            .unwrap();
        assert!(store.get("default", "s-1").await.unwrap().is_none());
    }

    #[test]
    fn test_generate_nonce_unique() {
        assert_ne!(generate_nonce(), generate_nonce());
        assert_eq!(generate_nonce().len(), 43);
    }
}
