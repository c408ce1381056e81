//! The authorization flow engine.
//!
//! Drives an explicit state machine from an incoming authorize request
//! through authentication, registration, namespace selection and consent
//! to token issuance. Each step is a method taking the current
//! [`SessionState`](crate::session::SessionState) and returning a
//! [`UiAction`](crate::idp::UiAction); the HTTP layer persists the session
//! and translates actions into responses, so the engine itself never
//! touches a request or response object.
//!
//! The token endpoint lives in [`token`]; the interactive authorize flow
//! in [`authorize`].

pub(crate) mod authorize;
mod token;

use std::sync::Arc;

use dashmap::DashMap;
use portauth_core::{ApiInfo, OidcProfile};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::AuthResult;
use crate::config::AuthEngineConfig;
use crate::error::AuthError;
use crate::gateway::TokenGateway;
use crate::idp::IdentityProvider;
use crate::profile::ProfileStore;
use crate::session::SessionStore;
use crate::storage::{GrantStore, Registry, TokenRecordStore, UserDirectory, VerificationService};

/// The backing services the engine is wired with.
#[derive(Clone)]
pub struct EngineServices {
    /// API/subscription/application/pool registry.
    pub registry: Arc<dyn Registry>,
    /// User directory.
    pub users: Arc<dyn UserDirectory>,
    /// Consent records.
    pub grants: Arc<dyn GrantStore>,
    /// Issued-token bookkeeping.
    pub tokens: Arc<dyn TokenRecordStore>,
    /// Server-side session state.
    pub sessions: Arc<dyn SessionStore>,
    /// Code/token profile store.
    pub profiles: Arc<dyn ProfileStore>,
    /// The backend credential gateway.
    pub gateway: Arc<dyn TokenGateway>,
    /// Email verification delivery.
    pub verifications: Arc<dyn VerificationService>,
}

/// The flow engine. One instance per process, shared across auth methods.
pub struct FlowEngine {
    config: AuthEngineConfig,
    services: EngineServices,
    providers: DashMap<String, Arc<dyn IdentityProvider>>,
    webhook: reqwest::Client,
}

impl FlowEngine {
    /// Creates an engine over the given services.
    ///
    /// # Errors
    ///
    /// Fails when the webhook HTTP client cannot be constructed.
    pub fn new(config: AuthEngineConfig, services: EngineServices) -> AuthResult<Self> {
        let webhook = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(
                config.external_call_timeout_ms,
            ))
            .build()
            .map_err(|e| AuthError::server_error(format!("webhook client setup failed: {e}")))?;
        Ok(Self {
            config,
            services,
            providers: DashMap::new(),
            webhook,
        })
    }

    /// Mounts an identity provider under an auth method id.
    pub fn register_provider(
        &self,
        auth_method_id: impl Into<String>,
        provider: Arc<dyn IdentityProvider>,
    ) {
        self.providers.insert(auth_method_id.into(), provider);
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &AuthEngineConfig {
        &self.config
    }

    /// The backing services.
    #[must_use]
    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    /// The mounted auth method ids.
    #[must_use]
    pub fn auth_method_ids(&self) -> Vec<String> {
        self.providers.iter().map(|e| e.key().clone()).collect()
    }

    /// Resolves the provider for an auth method.
    ///
    /// # Errors
    ///
    /// Fails with a server error for unknown auth methods; routing should
    /// have rejected them earlier.
    pub fn provider(&self, auth_method_id: &str) -> AuthResult<Arc<dyn IdentityProvider>> {
        self.providers
            .get(auth_method_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| {
                AuthError::server_error(format!("unknown auth method '{auth_method_id}'"))
            })
    }

    /// Loads an API and verifies the calling auth method is on its
    /// allow-list.
    pub(crate) async fn load_api(
        &self,
        api_id: &str,
        auth_method_id: &str,
    ) -> AuthResult<ApiInfo> {
        let api = self
            .services
            .registry
            .get_api(api_id)
            .await?
            .ok_or_else(|| AuthError::invalid_request(format!("unknown API '{api_id}'")))?;
        let auth_method_ref = self.config.auth_method_ref(auth_method_id);
        if !api.allows_auth_method(&auth_method_ref) {
            // Routing misconfiguration, not a client mistake
            return Err(AuthError::server_error(format!(
                "auth method '{auth_method_ref}' is not allowed for API '{api_id}'"
            )));
        }
        check_api_configuration(&api)?;
        Ok(api)
    }
}

/// Rejects APIs whose passthrough settings cannot work together. These are
/// deployment mistakes; clients get a plain `server_error`.
pub fn check_api_configuration(api: &ApiInfo) -> Result<(), AuthError> {
    if api.passthrough_users && api.passthrough_scope_url.is_none() {
        return Err(AuthError::server_error(format!(
            "API '{}' uses passthrough users but defines no passthrough scope URL",
            api.id
        )));
    }
    if api.passthrough_scope_url.is_some()
        && !api.passthrough_users
        && api.registration_pool.is_some()
    {
        return Err(AuthError::server_error(format!(
            "API '{}' combines a passthrough scope URL with local registration",
            api.id
        )));
    }
    if api.passthrough_users && api.registration_pool.is_some() {
        return Err(AuthError::server_error(format!(
            "API '{}' combines passthrough users with a registration pool",
            api.id
        )));
    }
    Ok(())
}

// =============================================================================
// Passthrough scope webhook
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PassthroughScopeRequest<'a> {
    scope: &'a [String],
    auth_method: &'a str,
    profile: &'a OidcProfile,
}

/// Reply of the external scope validation webhook.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassthroughScopeReply {
    /// Whether authorization may proceed.
    pub allow: bool,
    /// The scope to issue; absent means the submitted scope stands.
    #[serde(default)]
    pub validated_scope: Option<Vec<String>>,
    /// Reason shown to the client on denial.
    #[serde(default)]
    pub error_message: Option<String>,
    /// Verbose authenticated user id to issue the token under, replacing
    /// the engine's locally computed one.
    #[serde(default)]
    pub authenticated_userid: Option<String>,
}

/// Accepted outcome of the scope validation webhook.
#[derive(Debug, Clone)]
pub(crate) struct PassthroughScopeOutcome {
    /// The scope to issue.
    pub scope: Vec<String>,
    /// Replacement verbose authenticated user id, if the webhook supplied
    /// one.
    pub authenticated_userid: Option<String>,
}

impl FlowEngine {
    /// Calls the external scope validation webhook with bounded retry.
    ///
    /// Each attempt has its own client-side timeout; attempts are spaced by
    /// the configured interval. A denial maps to `access_denied`; running
    /// out of attempts maps to `server_error`.
    pub(crate) async fn passthrough_scope(
        &self,
        url: &str,
        scope: &[String],
        auth_method: &str,
        profile: &OidcProfile,
    ) -> AuthResult<PassthroughScopeOutcome> {
        let body = PassthroughScopeRequest {
            scope,
            auth_method,
            profile,
        };

        let mut last_error = String::new();
        for attempt in 1..=self.config.external_call_retries {
            match self.webhook.post(url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    let reply: PassthroughScopeReply = response.json().await.map_err(|e| {
                        AuthError::server_error(format!("scope webhook reply unreadable: {e}"))
                    })?;
                    if !reply.allow {
                        let message = reply
                            .error_message
                            .unwrap_or_else(|| "scope was rejected".to_string());
                        return Err(AuthError::access_denied(message));
                    }
                    return Ok(PassthroughScopeOutcome {
                        scope: reply.validated_scope.unwrap_or_else(|| scope.to_vec()),
                        authenticated_userid: reply.authenticated_userid,
                    });
                }
                Ok(response) => {
                    last_error = format!("webhook returned {}", response.status());
                    warn!(attempt, url, %last_error, "Scope webhook attempt failed");
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(attempt, url, %last_error, "Scope webhook attempt failed");
                }
            }
            if attempt < self.config.external_call_retries {
                tokio::time::sleep(std::time::Duration::from_millis(
                    self.config.external_call_interval_ms,
                ))
                .await;
            }
        }
        Err(AuthError::server_error(format!(
            "scope webhook unreachable after {} attempts: {last_error}",
            self.config.external_call_retries
        )))
    }
}

#[cfg(test)]
mod tests {
    use portauth_core::ApiSettings;

    use super::*;

    fn api(passthrough_users: bool, scope_url: Option<&str>, pool: Option<&str>) -> ApiInfo {
        ApiInfo {
            id: "orders".to_string(),
            name: "Orders".to_string(),
            auth_methods: vec![],
            registration_pool: pool.map(str::to_string),
            passthrough_users,
            passthrough_scope_url: scope_url.map(str::to_string),
            settings: ApiSettings::default(),
        }
    }

    #[test]
    fn test_api_configuration_combinations() {
        assert!(check_api_configuration(&api(false, None, None)).is_ok());
        assert!(check_api_configuration(&api(false, None, Some("pool"))).is_ok());
        assert!(
            check_api_configuration(&api(true, Some("https://hook.example.com"), None)).is_ok()
        );

        // Passthrough users require a scope webhook
        let err = check_api_configuration(&api(true, None, None)).unwrap_err();
        assert!(err.is_server_error());

        // A scope webhook without passthrough users clashes with local
        // registration
        let err =
            check_api_configuration(&api(false, Some("https://hook.example.com"), Some("pool")))
                .unwrap_err();
        assert!(err.is_server_error());

        // Pools and passthrough users are mutually exclusive
        let err =
            check_api_configuration(&api(true, Some("https://hook.example.com"), Some("pool")))
                .unwrap_err();
        assert!(err.is_server_error());
    }
}
