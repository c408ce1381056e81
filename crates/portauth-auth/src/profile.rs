//! The profile store.
//!
//! Ephemeral key-to-OIDC-profile mapping keyed by a SHA-256 hash of the
//! issued code or token, with per-API TTL. Backs the session data that
//! must survive from authorization to token exchange, and answers profile
//! lookups for issued tokens. Keys are hashes so the store never holds
//! raw codes or tokens.

use async_trait::async_trait;
use dashmap::DashMap;
use portauth_core::OidcProfile;
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

use crate::AuthResult;

/// Hashes a code or token into its store key (SHA-256, hex).
#[must_use]
pub fn token_hash(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Extracts the authorization code or implicit access token from an issued
/// redirect URI: `code` from the query string, `access_token` from the
/// fragment.
#[must_use]
pub fn extract_token_or_code(redirect_uri: &str) -> Option<String> {
    let url = url::Url::parse(redirect_uri).ok()?;

    if let Some(code) = url
        .query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
    {
        return Some(code);
    }

    let fragment = url.fragment()?;
    url::form_urlencoded::parse(fragment.as_bytes())
        .find(|(k, _)| k == "access_token")
        .map(|(_, v)| v.into_owned())
}

/// Keyed profile store.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Associates a profile with a code or token for `ttl_secs` seconds.
    async fn store(&self, token: &str, profile: &OidcProfile, ttl_secs: u64) -> AuthResult<()>;

    /// Retrieves the profile for a code or token.
    async fn retrieve(&self, token: &str) -> AuthResult<Option<OidcProfile>>;

    /// Deletes the association for a code or token.
    async fn delete(&self, token: &str) -> AuthResult<()>;
}

/// In-memory profile store.
#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: DashMap<String, (OidcProfile, OffsetDateTime)>,
}

impl MemoryProfileStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn store(&self, token: &str, profile: &OidcProfile, ttl_secs: u64) -> AuthResult<()> {
        let expires = OffsetDateTime::now_utc() + Duration::seconds(ttl_secs as i64);
        self.profiles
            .insert(token_hash(token), (profile.clone(), expires));
        Ok(())
    }

    async fn retrieve(&self, token: &str) -> AuthResult<Option<OidcProfile>> {
        let key = token_hash(token);
        if let Some(entry) = self.profiles.get(&key) {
            let (profile, expires) = entry.value();
            if OffsetDateTime::now_utc() < *expires {
                return Ok(Some(profile.clone()));
            }
        }
        self.profiles
            .remove_if(&key, |_, (_, expires)| OffsetDateTime::now_utc() >= *expires);
        Ok(None)
    }

    async fn delete(&self, token: &str) -> AuthResult<()> {
        self.profiles.remove(&token_hash(token));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_hash_is_stable_hex() {
        let h = token_hash("abc");
        assert_eq!(h.len(), 64);
        assert_eq!(h, token_hash("abc"));
        assert_ne!(h, token_hash("abd"));
    }

    #[test]
    fn test_extract_code_from_query() {
        let uri = "https://app.example.com/cb?code=SplxlOBe&state=xyz";
        assert_eq!(extract_token_or_code(uri), Some("SplxlOBe".to_string()));
    }

    #[test]
    fn test_extract_token_from_fragment() {
        let uri = "https://app.example.com/cb#access_token=at-1&token_type=bearer";
        assert_eq!(extract_token_or_code(uri), Some("at-1".to_string()));
    }

    #[test]
    fn test_extract_nothing() {
        assert_eq!(extract_token_or_code("https://app.example.com/cb?state=xyz"), None);
        assert_eq!(extract_token_or_code("not a uri"), None);
    }

    #[tokio::test]
    async fn test_store_roundtrip_and_ttl() {
        let store = MemoryProfileStore::new();
        let profile = OidcProfile::new("u-1");

        store.store("code-1", &profile, 3600).await.unwrap();
        let loaded = store.retrieve("code-1").await.unwrap().unwrap();
        assert_eq!(loaded.sub, "u-1");

        store.delete("code-1").await.unwrap();
        assert!(store.retrieve("code-1").await.unwrap().is_none());

        // Zero TTL means immediately expired
        store.store("code-2", &profile, 0).await.unwrap();
        assert!(store.retrieve("code-2").await.unwrap().is_none());
    }
}
