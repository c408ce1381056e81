//! API descriptors.
//!
//! An API is the unit a client subscribes to. Its descriptor carries the
//! declared scope map, the list of auth methods allowed to front it, and
//! the token lifetimes the gateway should apply.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Default refresh token lifetime: 14 days.
pub const DEFAULT_REFRESH_TOKEN_TTL_SECS: u64 = 14 * 24 * 3600;

/// Default access token lifetime: 1 hour.
pub const DEFAULT_TOKEN_EXPIRATION_SECS: u64 = 3600;

/// Description of a single declared scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeDescription {
    /// Human-readable description, shown on consent screens.
    #[serde(default)]
    pub description: String,
}

/// Token-related settings of an API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSettings {
    /// Declared scopes, keyed by scope name. The source of truth for scope
    /// validation: a requested scope not present here is rejected.
    #[serde(default)]
    pub scopes: BTreeMap<String, ScopeDescription>,

    /// Access token lifetime in seconds.
    #[serde(default = "default_token_expiration")]
    pub token_expiration: u64,

    /// Refresh token lifetime in seconds.
    #[serde(default = "default_refresh_token_ttl")]
    pub refresh_token_ttl: u64,
}

fn default_token_expiration() -> u64 {
    DEFAULT_TOKEN_EXPIRATION_SECS
}

fn default_refresh_token_ttl() -> u64 {
    DEFAULT_REFRESH_TOKEN_TTL_SECS
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            scopes: BTreeMap::new(),
            token_expiration: DEFAULT_TOKEN_EXPIRATION_SECS,
            refresh_token_ttl: DEFAULT_REFRESH_TOKEN_TTL_SECS,
        }
    }
}

/// Descriptor of an API fronted by the authorization server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiInfo {
    /// API id, as used in `/api/{api_id}/authorize` paths.
    pub id: String,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Auth methods allowed for this API, as `<server-name>:<method-id>`
    /// references. A request arriving through an unlisted method is a
    /// configuration error on the caller's side.
    #[serde(default)]
    pub auth_methods: Vec<String>,

    /// Registration pool id, if the API requires per-user registration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_pool: Option<String>,

    /// Passthrough-users mode: no local user record is created, identity is
    /// managed entirely by the identity provider or the scope webhook.
    #[serde(default)]
    pub passthrough_users: bool,

    /// Passthrough-scope webhook URL; when set, granted scope is computed by
    /// this external endpoint instead of the local grant store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passthrough_scope_url: Option<String>,

    /// Token settings.
    #[serde(default)]
    pub settings: ApiSettings,
}

impl ApiInfo {
    /// Returns `true` if `auth_method_ref` (as `<server>:<method>`) is
    /// allowed for this API.
    #[must_use]
    pub fn allows_auth_method(&self, auth_method_ref: &str) -> bool {
        self.auth_methods.iter().any(|m| m == auth_method_ref)
    }

    /// All declared scope names, in deterministic order.
    #[must_use]
    pub fn declared_scopes(&self) -> Vec<String> {
        self.settings.scopes.keys().cloned().collect()
    }

    /// Returns `true` if `scope` is declared for this API.
    #[must_use]
    pub fn declares_scope(&self, scope: &str) -> bool {
        self.settings.scopes.contains_key(scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_api() -> ApiInfo {
        let mut scopes = BTreeMap::new();
        scopes.insert("read".to_string(), ScopeDescription::default());
        scopes.insert("write".to_string(), ScopeDescription::default());
        ApiInfo {
            id: "orders".to_string(),
            name: "Orders API".to_string(),
            auth_methods: vec!["portauth:default".to_string()],
            registration_pool: None,
            passthrough_users: false,
            passthrough_scope_url: None,
            settings: ApiSettings {
                scopes,
                ..ApiSettings::default()
            },
        }
    }

    #[test]
    fn test_allows_auth_method() {
        let api = sample_api();
        assert!(api.allows_auth_method("portauth:default"));
        assert!(!api.allows_auth_method("portauth:other"));
    }

    #[test]
    fn test_declared_scopes_sorted() {
        let api = sample_api();
        assert_eq!(api.declared_scopes(), vec!["read", "write"]);
        assert!(api.declares_scope("read"));
        assert!(!api.declares_scope("admin"));
    }

    #[test]
    fn test_settings_defaults() {
        let settings: ApiSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.token_expiration, DEFAULT_TOKEN_EXPIRATION_SECS);
        assert_eq!(settings.refresh_token_ttl, DEFAULT_REFRESH_TOKEN_TTL_SECS);
        assert!(settings.scopes.is_empty());
    }

    #[test]
    fn test_deserialization_camel_case() {
        let json = r#"{
            "id": "orders",
            "authMethods": ["portauth:default"],
            "passthroughUsers": true,
            "passthroughScopeUrl": "https://scopes.example.com/resolve"
        }"#;
        let api: ApiInfo = serde_json::from_str(json).unwrap();
        assert!(api.passthrough_users);
        assert_eq!(
            api.passthrough_scope_url.as_deref(),
            Some("https://scopes.example.com/resolve")
        );
    }
}
