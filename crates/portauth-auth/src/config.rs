//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Configuration of the protocol engine.
///
/// Retry and timeout figures apply to the external scope/redirect
/// validation webhooks only; registry and directory calls are attempted
/// once and rely on the transport default timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct AuthEngineConfig {
    /// Server name, used as the prefix of auth-method references
    /// (`<server-name>:<method-id>`).
    pub server_name: String,

    /// Attempts for external webhook calls.
    pub external_call_retries: u32,

    /// Interval between webhook attempts, in milliseconds.
    pub external_call_interval_ms: u64,

    /// Client-side timeout for webhook calls, in milliseconds.
    pub external_call_timeout_ms: u64,

    /// Delay before reporting a login failure, in milliseconds. Blunts
    /// timing side-channels on credential checks.
    pub login_failure_delay_ms: u64,

    /// Session lifetime in seconds.
    pub session_ttl_secs: u64,

    /// TTL for process-wide metadata caches, in seconds. `None` keeps
    /// entries for the process lifetime; staleness is acceptable for this
    /// metadata class.
    pub metadata_cache_ttl_secs: Option<u64>,
}

impl Default for AuthEngineConfig {
    fn default() -> Self {
        Self {
            server_name: "portauth".to_string(),
            external_call_retries: 10,
            external_call_interval_ms: 500,
            external_call_timeout_ms: 5000,
            login_failure_delay_ms: 500,
            session_ttl_secs: 3600,
            metadata_cache_ttl_secs: None,
        }
    }
}

impl AuthEngineConfig {
    /// The auth-method reference for a method id
    /// (`<server-name>:<method-id>`).
    #[must_use]
    pub fn auth_method_ref(&self, auth_method_id: &str) -> String {
        format!("{}:{auth_method_id}", self.server_name)
    }
}

/// Configuration of one auth method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthMethodConfig {
    /// Method id, used in URL base paths and auth-method references.
    pub id: String,

    /// Provider type; resolved through the identity provider registry.
    #[serde(rename = "type")]
    pub method_type: String,

    /// Disabled methods are configured but not mounted.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Provider-specific settings, passed through to the constructor.
    #[serde(default)]
    pub settings: serde_json::Value,
}

fn default_enabled() -> bool {
    true
}
