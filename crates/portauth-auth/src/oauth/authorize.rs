//! Authorize-request parsing and validation.
//!
//! Turns the query parameters of `GET /api/{api_id}/authorize` into a
//! validated [`AuthRequest`], enforcing response type, subscription and
//! redirect-URI rules and the PKCE preconditions for public clients.

use portauth_core::{ApiInfo, SubscriptionInfo};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::oauth::pkce::PkceChallengeMethod;
use crate::oauth::scope::{parse_scope, validate_scopes};

/// OAuth2 response type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Authorization code grant.
    Code,
    /// Implicit grant.
    Token,
}

impl ResponseType {
    /// Parses a `response_type` parameter.
    ///
    /// # Errors
    ///
    /// Returns `unsupported_response_type` for anything other than `code`
    /// or `token`.
    pub fn parse(value: &str) -> Result<Self, AuthError> {
        match value {
            "code" => Ok(Self::Code),
            "token" => Ok(Self::Token),
            other => Err(AuthError::unsupported_response_type(format!(
                "Unsupported response_type '{other}'"
            ))),
        }
    }

    /// The wire representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Token => "token",
        }
    }
}

/// Query parameters of the authorize endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizeQuery {
    /// OAuth2 client id.
    #[serde(default)]
    pub client_id: Option<String>,
    /// `code` or `token`.
    #[serde(default)]
    pub response_type: Option<String>,
    /// Redirect URI; must match a registered URI when given.
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// Opaque client state, echoed back on the redirect.
    #[serde(default)]
    pub state: Option<String>,
    /// Requested scope.
    #[serde(default)]
    pub scope: Option<String>,
    /// OIDC prompt parameter (`none`, `login`).
    #[serde(default)]
    pub prompt: Option<String>,
    /// Registration namespace selector.
    #[serde(default)]
    pub namespace: Option<String>,
    /// PKCE code challenge.
    #[serde(default)]
    pub code_challenge: Option<String>,
    /// PKCE code challenge method, defaults to `plain`.
    #[serde(default)]
    pub code_challenge_method: Option<String>,
    /// Username to prefill on the login form.
    #[serde(default)]
    pub prefill_username: Option<String>,
}

/// One pending authorization attempt.
///
/// Created on `/authorize`, stored in the server-side session keyed by
/// auth method, mutated through the flow, discarded after token issuance
/// or on error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    /// The API being authorized for.
    pub api_id: String,
    /// OAuth2 client id.
    pub client_id: String,
    /// Response type.
    pub response_type: ResponseType,
    /// The resolved redirect URI.
    pub redirect_uri: String,
    /// Opaque client state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Requested scope, as parsed from the request.
    #[serde(default)]
    pub requested_scope: Vec<String>,
    /// Validated scope, after declared-scope and policy checks.
    #[serde(default)]
    pub validated_scope: Vec<String>,
    /// Whether the validated scope differs from the requested one.
    #[serde(default)]
    pub scope_differs: bool,
    /// Registration namespace selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// OIDC prompt parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// PKCE code challenge for public `code` clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    /// PKCE code challenge method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,
    /// Whether the subscription is trusted.
    #[serde(default)]
    pub trusted: bool,
    /// Plain-login marker: a headless `/login` request that redirects back
    /// to an internal URI and skips registration and scope handling.
    #[serde(default)]
    pub plain: bool,
    /// Username to prefill on the login form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefill_username: Option<String>,
}

/// Normalizes a redirect URI for comparison: everything from the first
/// `?` and any trailing slash is stripped.
#[must_use]
pub fn normalize_redirect_uri(uri: &str) -> String {
    let uri = match uri.find('?') {
        Some(pos) => &uri[..pos],
        None => uri,
    };
    uri.trim_end_matches('/').to_string()
}

/// Resolves the effective redirect URI for an authorize request.
///
/// A given URI must normalize-match one of the application's registered
/// URIs; an absent URI defaults to the application's sole registered URI.
///
/// # Errors
///
/// Fails with `invalid_request` on mismatch, on ambiguity, or when the
/// application has no registered URI.
pub fn resolve_redirect_uri(
    registered: &[String],
    requested: Option<&str>,
) -> Result<String, AuthError> {
    match requested {
        Some(uri) => {
            let normalized = normalize_redirect_uri(uri);
            if registered
                .iter()
                .any(|r| normalize_redirect_uri(r) == normalized)
            {
                Ok(uri.to_string())
            } else {
                Err(AuthError::invalid_request(
                    "redirect_uri does not match any registered redirect URI",
                ))
            }
        }
        None => match registered {
            [only] => Ok(only.clone()),
            [] => Err(AuthError::invalid_request(
                "application has no registered redirect URI",
            )),
            _ => Err(AuthError::invalid_request(
                "redirect_uri is required when multiple redirect URIs are registered",
            )),
        },
    }
}

/// Validates an authorize request against the API and the resolved
/// subscription, producing a fresh [`AuthRequest`].
///
/// # Errors
///
/// Fails closed on unsupported response types, client/API mismatch,
/// redirect-URI violations, missing PKCE challenges for public `code`
/// clients, unsupported challenge methods, and unknown scopes.
pub fn validate_authorize_request(
    api: &ApiInfo,
    subscription_info: &SubscriptionInfo,
    query: &AuthorizeQuery,
) -> Result<AuthRequest, AuthError> {
    let client_id = query
        .client_id
        .as_deref()
        .ok_or_else(|| AuthError::invalid_request("client_id is missing"))?;
    let response_type = query
        .response_type
        .as_deref()
        .ok_or_else(|| AuthError::invalid_request("response_type is missing"))?;
    let response_type = ResponseType::parse(response_type)?;

    let subscription = &subscription_info.subscription;
    if subscription.api != api.id {
        return Err(AuthError::unauthorized_client(format!(
            "client is not subscribed to API '{}'",
            api.id
        )));
    }

    let application = &subscription_info.application;
    let redirect_uri =
        resolve_redirect_uri(&application.redirect_uris, query.redirect_uri.as_deref())?;

    // PKCE preconditions: mandatory challenge for public clients using the
    // authorization code grant, method defaults to plain.
    let mut code_challenge = query.code_challenge.clone();
    let mut code_challenge_method = None;
    if code_challenge.is_some() {
        let method = query.code_challenge_method.as_deref().unwrap_or("plain");
        let parsed = PkceChallengeMethod::parse(method)
            .map_err(|e| AuthError::invalid_request(e.to_string()))?;
        code_challenge_method = Some(parsed.as_str().to_string());
    } else if application.client_type.is_public() && response_type == ResponseType::Code {
        return Err(AuthError::invalid_request(
            "code_challenge is required for public clients using the authorization code grant",
        ));
    } else {
        code_challenge = None;
    }

    let requested_scope = query
        .scope
        .as_deref()
        .map(parse_scope)
        .unwrap_or_default();
    let validated = validate_scopes(api, &requested_scope, subscription)?;

    Ok(AuthRequest {
        api_id: api.id.clone(),
        client_id: client_id.to_string(),
        response_type,
        redirect_uri,
        state: query.state.clone(),
        requested_scope,
        validated_scope: validated.validated_scopes,
        scope_differs: validated.scope_differs,
        namespace: query.namespace.clone(),
        prompt: query.prompt.clone(),
        code_challenge,
        code_challenge_method,
        trusted: subscription.trusted,
        plain: false,
        prefill_username: query.prefill_username.clone(),
    })
}
