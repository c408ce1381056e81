//! The identity provider contract.
//!
//! Every authentication backend (password, federated OAuth2, SAML,
//! directory lookup) implements [`IdentityProvider`]; the flow engine
//! never branches on a concrete provider type. Providers return
//! structured [`UiAction`] values instead of writing responses, so the
//! HTTP layer stays in one place.
//!
//! An [`IdpRegistry`] maps configured auth-method type strings to
//! constructors; new providers are added by implementing the trait and
//! registering a constructor, never by modifying the engine.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use portauth_core::{ApiInfo, OidcProfile, TokenRecord, UserInfo};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::AuthResult;
use crate::config::AuthMethodConfig;
use crate::error::AuthError;
use crate::oauth::AuthRequest;
use crate::storage::UserDirectory;

/// Outcome of successful authentication, produced by a provider and
/// consumed by the flow engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    /// Resolved internal user id; absent for passthrough APIs and for
    /// federated identities seen for the first time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Stable external identity key (`<provider-type>:<upstream-id>`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<String>,

    /// Group memberships carried by the identity.
    #[serde(default)]
    pub groups: Vec<String>,

    /// Groups the provider assigns to newly created users.
    #[serde(default)]
    pub default_groups: Vec<String>,

    /// The provider's default OIDC profile for this identity.
    pub default_profile: OidcProfile,

    /// The final profile after registration merge; set by the flow engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<OidcProfile>,
}

impl AuthResponse {
    /// Creates an auth response for an existing directory user.
    #[must_use]
    pub fn from_user(user: &UserInfo) -> Self {
        let mut profile = OidcProfile::new(user.id.clone());
        profile.email = user.email.clone();
        profile.email_verified = Some(user.email_verified);
        Self {
            user_id: Some(user.id.clone()),
            custom_id: user.custom_id.clone(),
            groups: user.groups.clone(),
            default_groups: Vec::new(),
            default_profile: profile,
            profile: None,
        }
    }
}

/// A UI directive returned by a provider or the flow engine. The HTTP
/// layer translates it into a response; templates are rendered elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "action")]
pub enum UiAction {
    /// Render a named template with a view model.
    Render {
        /// Template name (`login`, `register`, `select_namespace`, `grant`).
        template: String,
        /// JSON view model for the template.
        view: serde_json::Value,
    },
    /// Redirect the user agent.
    Redirect {
        /// Target location.
        location: String,
    },
    /// Authentication finished; continue the flow.
    Authenticated(Box<AuthResponse>),
}

/// Whether a refresh may proceed, as judged by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshDecision {
    /// The refresh is allowed.
    Allow,
    /// The refresh is denied with a reason.
    Deny(String),
}

/// An additional route a provider needs (e.g. a federated OAuth callback).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdpEndpoint {
    /// HTTP method.
    pub method: String,
    /// Path relative to the auth method's base path.
    pub path: String,
}

/// Links shown on provider error pages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLinks {
    /// Help/documentation URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_url: Option<String>,
    /// Contact URL or address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_url: Option<String>,
}

/// The capability set every identity provider implements.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The provider type tag (matches the auth-method configuration).
    fn provider_type(&self) -> &'static str;

    /// Whether the provider handles the OIDC `prompt` parameter itself.
    fn supports_prompt(&self) -> bool {
        false
    }

    /// Begins UI authentication: render a login form, or redirect to an
    /// upstream provider.
    async fn authorize_with_ui(&self, request: &AuthRequest) -> AuthResult<UiAction>;

    /// Authenticates a username/password pair (ROPC).
    ///
    /// # Errors
    ///
    /// Providers that cannot verify passwords (federated OAuth2, SAML)
    /// fail with `unsupported_grant_type`.
    async fn authorize_by_user_pass(
        &self,
        username: &str,
        password: &str,
    ) -> AuthResult<AuthResponse>;

    /// Judges whether a refresh for a previously issued token may proceed.
    async fn check_refresh_token(
        &self,
        record: &TokenRecord,
        api: &ApiInfo,
    ) -> AuthResult<RefreshDecision>;

    /// Additional routes the provider needs.
    fn endpoints(&self) -> Vec<IdpEndpoint> {
        Vec::new()
    }

    /// Optional logout takeover (e.g. SAML single-logout). `None` leaves
    /// the default logout response in place.
    fn logout_hook(&self) -> Option<UiAction> {
        None
    }

    /// Links shown on error pages.
    fn error_links(&self) -> Option<ErrorLinks> {
        None
    }
}

/// Parses a verbose authenticated user id
/// (`sub=<id>[;namespace=<ns>]`) into its parts.
#[must_use]
pub fn parse_authenticated_userid(value: &str) -> Option<(String, Option<String>)> {
    let mut sub = None;
    let mut namespace = None;
    for part in value.split(';') {
        if let Some(v) = part.strip_prefix("sub=") {
            sub = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix("namespace=") {
            namespace = Some(v.to_string());
        }
    }
    sub.map(|s| (s, namespace))
}

// =============================================================================
// Registry
// =============================================================================

/// Constructor for a provider, given its auth-method configuration.
pub type IdpConstructor =
    Box<dyn Fn(&AuthMethodConfig) -> AuthResult<Arc<dyn IdentityProvider>> + Send + Sync>;

/// Maps auth-method type strings to provider constructors.
#[derive(Default)]
pub struct IdpRegistry {
    constructors: HashMap<String, IdpConstructor>,
}

impl IdpRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor for a provider type.
    pub fn register(&mut self, provider_type: impl Into<String>, constructor: IdpConstructor) {
        self.constructors.insert(provider_type.into(), constructor);
    }

    /// Constructs a provider for an auth-method configuration.
    ///
    /// # Errors
    ///
    /// Fails with a server error when the type is not registered or the
    /// constructor rejects the configuration.
    pub fn construct(&self, config: &AuthMethodConfig) -> AuthResult<Arc<dyn IdentityProvider>> {
        let constructor = self.constructors.get(&config.method_type).ok_or_else(|| {
            AuthError::server_error(format!(
                "unknown auth method type '{}'",
                config.method_type
            ))
        })?;
        constructor(config)
    }

    /// The registered provider types.
    #[must_use]
    pub fn types(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }
}

// =============================================================================
// Credentials Provider
// =============================================================================

/// Built-in provider verifying credentials against the user directory.
pub struct CredentialsProvider {
    auth_method_id: String,
    users: Arc<dyn UserDirectory>,
}

impl CredentialsProvider {
    /// Creates a provider for the given auth method.
    #[must_use]
    pub fn new(auth_method_id: impl Into<String>, users: Arc<dyn UserDirectory>) -> Self {
        Self {
            auth_method_id: auth_method_id.into(),
            users,
        }
    }
}

#[async_trait]
impl IdentityProvider for CredentialsProvider {
    fn provider_type(&self) -> &'static str {
        "credentials"
    }

    async fn authorize_with_ui(&self, request: &AuthRequest) -> AuthResult<UiAction> {
        Ok(UiAction::Render {
            template: "login".to_string(),
            view: json!({
                "authMethodId": self.auth_method_id,
                "prefillUsername": request.prefill_username,
            }),
        })
    }

    async fn authorize_by_user_pass(
        &self,
        username: &str,
        password: &str,
    ) -> AuthResult<AuthResponse> {
        match self.users.verify_password(username, password).await? {
            Some(user) => Ok(AuthResponse::from_user(&user)),
            None => Err(AuthError::invalid_grant("invalid username or password")),
        }
    }

    async fn check_refresh_token(
        &self,
        record: &TokenRecord,
        _api: &ApiInfo,
    ) -> AuthResult<RefreshDecision> {
        // A refresh stays valid as long as the user still exists.
        let Some(authenticated_userid) = record.authenticated_userid.as_deref() else {
            return Ok(RefreshDecision::Allow);
        };
        let Some((user_id, _)) = parse_authenticated_userid(authenticated_userid) else {
            return Ok(RefreshDecision::Deny(
                "malformed authenticated user id".to_string(),
            ));
        };
        match self.users.get_user(&user_id).await? {
            Some(_) => Ok(RefreshDecision::Allow),
            None => Ok(RefreshDecision::Deny(format!(
                "user {user_id} no longer exists"
            ))),
        }
    }
}
