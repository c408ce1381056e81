//! Token endpoint wire types.
//!
//! Request parsing (form body plus HTTP Basic credentials), per-grant-type
//! required-field validation, and the grant-type-agnostic [`AccessToken`]
//! result.

use base64::{Engine, engine::general_purpose::STANDARD};
use portauth_core::OidcProfile;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::oauth::scope::parse_scope;

/// OAuth2 grant type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// Exchange an authorization code for tokens.
    AuthorizationCode,
    /// Machine-to-machine authentication.
    ClientCredentials,
    /// Resource owner password credentials.
    Password,
    /// Refresh an access token.
    RefreshToken,
}

impl GrantType {
    /// Parses a `grant_type` parameter.
    ///
    /// # Errors
    ///
    /// Returns `unsupported_grant_type` for unknown values.
    pub fn parse(value: &str) -> Result<Self, AuthError> {
        match value {
            "authorization_code" => Ok(Self::AuthorizationCode),
            "client_credentials" => Ok(Self::ClientCredentials),
            "password" => Ok(Self::Password),
            "refresh_token" => Ok(Self::RefreshToken),
            other => Err(AuthError::unsupported_grant_type(format!(
                "Unsupported grant_type '{other}'"
            ))),
        }
    }

    /// The wire representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::ClientCredentials => "client_credentials",
            Self::Password => "password",
            Self::RefreshToken => "refresh_token",
        }
    }
}

impl std::fmt::Display for GrantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raw form body of the token endpoint. All fields optional; which ones
/// are required depends on the grant type.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequestForm {
    /// OAuth 2.0 grant type.
    #[serde(default)]
    pub grant_type: Option<String>,
    /// Client id (public clients or client_secret_post).
    #[serde(default)]
    pub client_id: Option<String>,
    /// Client secret (client_secret_post).
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Authorization code.
    #[serde(default)]
    pub code: Option<String>,
    /// PKCE code verifier.
    #[serde(default)]
    pub code_verifier: Option<String>,
    /// Refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Requested scope.
    #[serde(default)]
    pub scope: Option<String>,
    /// Username (password grant).
    #[serde(default)]
    pub username: Option<String>,
    /// Password (password grant).
    #[serde(default)]
    pub password: Option<String>,
}

/// A validated token-endpoint request. Ephemeral, one per HTTP call.
#[derive(Debug, Clone)]
pub struct TokenRequest {
    /// The API the token is requested for.
    pub api_id: String,
    /// The auth method the request arrived through
    /// (`<server-name>:<method-id>`).
    pub auth_method: String,
    /// Grant type.
    pub grant_type: GrantType,
    /// Client id.
    pub client_id: String,
    /// Client secret, if presented.
    pub client_secret: Option<String>,
    /// Authorization code.
    pub code: Option<String>,
    /// PKCE code verifier.
    pub code_verifier: Option<String>,
    /// Refresh token.
    pub refresh_token: Option<String>,
    /// Requested scope.
    pub scope: Vec<String>,
    /// Username (password grant).
    pub username: Option<String>,
    /// Password (password grant).
    pub password: Option<String>,
    /// Verbose authenticated user id, derived during the flow.
    pub authenticated_userid: Option<String>,
    /// Accept a password-shaped request without real user credentials.
    /// Set only by the internal refresh rewrite for passthrough APIs.
    pub accept_password_grant: bool,
}

/// Decodes an HTTP Basic `Authorization` header value into
/// `(client_id, client_secret)`.
#[must_use]
pub fn decode_basic_auth(header_value: &str) -> Option<(String, String)> {
    let encoded = header_value.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    if id.is_empty() {
        return None;
    }
    Some((id.to_string(), secret.to_string()))
}

/// Builds a [`TokenRequest`] from the form body and optional HTTP Basic
/// credentials. Basic credentials take precedence over body credentials.
///
/// # Errors
///
/// Fails with `unsupported_grant_type` on unknown grant types and
/// `invalid_client` when no client id is presented at all.
pub fn make_token_request(
    api_id: impl Into<String>,
    auth_method: impl Into<String>,
    basic_auth: Option<(String, String)>,
    form: &TokenRequestForm,
) -> Result<TokenRequest, AuthError> {
    let grant_type = form
        .grant_type
        .as_deref()
        .ok_or_else(|| AuthError::invalid_request("grant_type is missing"))?;
    let grant_type = GrantType::parse(grant_type)?;

    let (client_id, client_secret) = match basic_auth {
        Some((id, secret)) => (Some(id), Some(secret)),
        None => (form.client_id.clone(), form.client_secret.clone()),
    };
    let client_id =
        client_id.ok_or_else(|| AuthError::invalid_client("client_id is missing"))?;

    Ok(TokenRequest {
        api_id: api_id.into(),
        auth_method: auth_method.into(),
        grant_type,
        client_id,
        client_secret,
        code: form.code.clone(),
        code_verifier: form.code_verifier.clone(),
        refresh_token: form.refresh_token.clone(),
        scope: form.scope.as_deref().map(parse_scope).unwrap_or_default(),
        username: form.username.clone(),
        password: form.password.clone(),
        authenticated_userid: None,
        accept_password_grant: false,
    })
}

/// Validates the per-grant-type required fields of a token request.
///
/// # Errors
///
/// Fails with `invalid_request` when a required field is missing.
pub fn validate_token_request(request: &TokenRequest) -> Result<(), AuthError> {
    let missing = |field: &str| {
        AuthError::invalid_request(format!(
            "{field} is required for grant_type {}",
            request.grant_type
        ))
    };

    match request.grant_type {
        GrantType::ClientCredentials => {
            if request.client_secret.is_none() {
                return Err(missing("client_secret"));
            }
        }
        GrantType::AuthorizationCode => {
            if request.code.is_none() {
                return Err(missing("code"));
            }
            if request.client_secret.is_none() && request.code_verifier.is_none() {
                return Err(missing("client_secret or code_verifier"));
            }
        }
        GrantType::Password => {
            if !request.accept_password_grant {
                if request.username.is_none() {
                    return Err(missing("username"));
                }
                if request.password.is_none() {
                    return Err(missing("password"));
                }
            }
        }
        GrantType::RefreshToken => {
            if request.refresh_token.is_none() {
                return Err(missing("refresh_token"));
            }
        }
    }
    Ok(())
}

/// Grant-type-agnostic token result.
///
/// The `session_data` field carries the profile to persist and is never
/// serialized, so it cannot reach the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessToken {
    /// The issued access token.
    pub access_token: String,

    /// The issued refresh token, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Token type, always "bearer".
    #[serde(default)]
    pub token_type: String,

    /// Access token lifetime in seconds.
    #[serde(default)]
    pub expires_in: u64,

    /// Issued scope, space-delimited, echoed when it differs from the
    /// requested scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// The profile to persist alongside the token. Internal only.
    #[serde(skip)]
    pub session_data: Option<OidcProfile>,
}

impl AccessToken {
    /// Creates a new bearer token result.
    #[must_use]
    pub fn new(access_token: impl Into<String>, expires_in: u64) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            token_type: "bearer".to_string(),
            expires_in,
            scope: None,
            session_data: None,
        }
    }

    /// Sets the refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    /// Sets the issued scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }
}
