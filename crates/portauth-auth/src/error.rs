//! Failure types for the authorization protocol engine.
//!
//! Every failure carries an explicit transport kind so that one boundary
//! translator can map it onto its HTTP representation:
//!
//! - [`FailureKind::Ui`] - a user-facing error page (registration,
//!   verification, login forms)
//! - [`FailureKind::OAuth`] - an RFC 6749 `{error, error_description}`
//!   JSON body
//! - [`FailureKind::Redirect`] - an error expressed as a 302 to the
//!   client's `redirect_uri` with `error`/`error_description` parameters
//! - [`FailureKind::Json`] - a `{status, message}` body used by
//!   token-management utility endpoints
//!
//! Handlers never inspect ad hoc fields; they return the error and let the
//! [`IntoResponse`] implementation translate it.

use std::fmt;

use axum::{
    Json,
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use serde_json::json;

/// OAuth 2.0 error codes used by this server (RFC 6749 section 4.1.2.1 and
/// 5.2, plus `login_required` from OIDC Core).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuthErrorCode {
    /// The request is missing a parameter or is otherwise malformed.
    InvalidRequest,
    /// Client authentication failed.
    InvalidClient,
    /// The grant (code, refresh token, credentials) is invalid or revoked.
    InvalidGrant,
    /// The client is not authorized to use this grant type or scope.
    UnauthorizedClient,
    /// The grant type is not supported.
    UnsupportedGrantType,
    /// The response type is not supported.
    UnsupportedResponseType,
    /// The requested scope is invalid or unknown.
    InvalidScope,
    /// The resource owner or the server denied the request.
    AccessDenied,
    /// Authentication is required but `prompt=none` was requested.
    LoginRequired,
    /// An unexpected server-side condition.
    ServerError,
}

impl OAuthErrorCode {
    /// The wire representation of the error code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::InvalidScope => "invalid_scope",
            Self::AccessDenied => "access_denied",
            Self::LoginRequired => "login_required",
            Self::ServerError => "server_error",
        }
    }

    /// The default HTTP status for this code.
    #[must_use]
    pub fn default_status(&self) -> u16 {
        match self {
            Self::InvalidClient => 401,
            Self::UnauthorizedClient | Self::AccessDenied => 403,
            Self::ServerError => 500,
            _ => 400,
        }
    }
}

impl fmt::Display for OAuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The transport kind of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// User-facing error page.
    Ui,
    /// RFC 6749 JSON error body.
    OAuth,
    /// Error delivered as a redirect to the client.
    Redirect,
    /// Plain JSON error body.
    Json,
}

/// A failure of the authorization engine, tagged with its transport kind.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Rendered as an HTML error page.
    #[error("{status}: {message}")]
    Ui {
        /// HTTP status code.
        status: u16,
        /// User-facing message.
        message: String,
    },

    /// Rendered as an RFC 6749 error body.
    #[error("{code}: {message}")]
    OAuth {
        /// HTTP status code.
        status: u16,
        /// OAuth 2.0 error code.
        code: OAuthErrorCode,
        /// Error description.
        message: String,
    },

    /// Delivered as a 302 to the client's `redirect_uri` with
    /// `error`/`error_description` query parameters.
    #[error("{code} (redirected to client): {message}")]
    Redirect {
        /// OAuth 2.0 error code.
        code: OAuthErrorCode,
        /// Error description.
        message: String,
        /// The client's redirect URI.
        redirect_uri: String,
    },

    /// Rendered as a plain `{status, message}` JSON body.
    #[error("{status}: {message}")]
    Json {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
        /// Internal detail, logged but never sent to the client.
        internal: Option<String>,
    },
}

impl AuthError {
    /// Creates a UI failure.
    #[must_use]
    pub fn ui(status: u16, message: impl Into<String>) -> Self {
        Self::Ui {
            status,
            message: message.into(),
        }
    }

    /// Creates an OAuth failure with the code's default status.
    #[must_use]
    pub fn oauth(code: OAuthErrorCode, message: impl Into<String>) -> Self {
        Self::OAuth {
            status: code.default_status(),
            code,
            message: message.into(),
        }
    }

    /// Creates an OAuth failure with an explicit status.
    #[must_use]
    pub fn oauth_with_status(
        status: u16,
        code: OAuthErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self::OAuth {
            status,
            code,
            message: message.into(),
        }
    }

    /// Creates a JSON failure.
    #[must_use]
    pub fn json(status: u16, message: impl Into<String>) -> Self {
        Self::Json {
            status,
            message: message.into(),
            internal: None,
        }
    }

    /// Creates a JSON failure carrying internal detail for the logs.
    #[must_use]
    pub fn json_with_internal(
        status: u16,
        message: impl Into<String>,
        internal: impl Into<String>,
    ) -> Self {
        Self::Json {
            status,
            message: message.into(),
            internal: Some(internal.into()),
        }
    }

    /// Creates an `invalid_request` OAuth failure (400).
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::oauth(OAuthErrorCode::InvalidRequest, message)
    }

    /// Creates an `invalid_client` OAuth failure (401).
    #[must_use]
    pub fn invalid_client(message: impl Into<String>) -> Self {
        Self::oauth(OAuthErrorCode::InvalidClient, message)
    }

    /// Creates an `invalid_grant` OAuth failure (400).
    #[must_use]
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::oauth(OAuthErrorCode::InvalidGrant, message)
    }

    /// Creates an `unauthorized_client` OAuth failure (403).
    #[must_use]
    pub fn unauthorized_client(message: impl Into<String>) -> Self {
        Self::oauth(OAuthErrorCode::UnauthorizedClient, message)
    }

    /// Creates an `unsupported_grant_type` OAuth failure (400).
    #[must_use]
    pub fn unsupported_grant_type(message: impl Into<String>) -> Self {
        Self::oauth(OAuthErrorCode::UnsupportedGrantType, message)
    }

    /// Creates an `unsupported_response_type` OAuth failure (400).
    #[must_use]
    pub fn unsupported_response_type(message: impl Into<String>) -> Self {
        Self::oauth(OAuthErrorCode::UnsupportedResponseType, message)
    }

    /// Creates an `invalid_scope` OAuth failure (400).
    #[must_use]
    pub fn invalid_scope(message: impl Into<String>) -> Self {
        Self::oauth(OAuthErrorCode::InvalidScope, message)
    }

    /// Creates an `access_denied` OAuth failure (403).
    #[must_use]
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::oauth(OAuthErrorCode::AccessDenied, message)
    }

    /// Creates a `login_required` OAuth failure (400).
    #[must_use]
    pub fn login_required(message: impl Into<String>) -> Self {
        Self::oauth(OAuthErrorCode::LoginRequired, message)
    }

    /// Creates a `server_error` OAuth failure (500).
    #[must_use]
    pub fn server_error(message: impl Into<String>) -> Self {
        Self::oauth(OAuthErrorCode::ServerError, message)
    }

    /// The transport kind of this failure.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Ui { .. } => FailureKind::Ui,
            Self::OAuth { .. } => FailureKind::OAuth,
            Self::Redirect { .. } => FailureKind::Redirect,
            Self::Json { .. } => FailureKind::Json,
        }
    }

    /// The HTTP status of this failure. Redirect failures report 302.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Ui { status, .. } | Self::Json { status, .. } | Self::OAuth { status, .. } => {
                *status
            }
            Self::Redirect { .. } => 302,
        }
    }

    /// The OAuth error code, if this is an OAuth or redirect failure.
    #[must_use]
    pub fn oauth_error_code(&self) -> Option<OAuthErrorCode> {
        match self {
            Self::OAuth { code, .. } | Self::Redirect { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns `true` for 4xx failures.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status())
    }

    /// Returns `true` for 5xx failures.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status() >= 500
    }

    /// Converts an OAuth failure into a redirect failure targeting
    /// `redirect_uri`. Used mid-authorize-flow once the client's redirect
    /// URI is known and validated. Other kinds are returned unchanged.
    #[must_use]
    pub fn with_redirect(self, redirect_uri: impl Into<String>) -> Self {
        match self {
            Self::OAuth { code, message, .. } => Self::Redirect {
                code,
                message,
                redirect_uri: redirect_uri.into(),
            },
            other => other,
        }
    }
}

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Appends `error`/`error_description` to a redirect URI.
fn error_redirect_location(redirect_uri: &str, code: OAuthErrorCode, message: &str) -> String {
    match url::Url::parse(redirect_uri) {
        Ok(mut url) => {
            url.query_pairs_mut()
                .append_pair("error", code.as_str())
                .append_pair("error_description", message);
            url.to_string()
        }
        Err(_) => {
            let sep = if redirect_uri.contains('?') { '&' } else { '?' };
            format!(
                "{redirect_uri}{sep}error={}&error_description={}",
                code.as_str(),
                urlencode(message)
            )
        }
    }
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// The single boundary translator from failures to HTTP responses.
impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if self.is_server_error() {
            tracing::error!(error = %self, "Request failed with server error");
        } else {
            tracing::debug!(error = %self, "Request failed");
        }
        match self {
            Self::Ui { status, message } => {
                let body = format!(
                    "<!DOCTYPE html><html><head><title>Error</title></head>\
                     <body><h1>Error {status}</h1><p>{message}</p></body></html>"
                );
                (status_code(status), Html(body)).into_response()
            }
            Self::OAuth {
                status,
                code,
                message,
            } => {
                let body = json!({
                    "error": code.as_str(),
                    "error_description": message,
                });
                (status_code(status), Json(body)).into_response()
            }
            Self::Redirect {
                code,
                message,
                redirect_uri,
            } => {
                let location = error_redirect_location(&redirect_uri, code, &message);
                Redirect::to(&location).into_response()
            }
            Self::Json {
                status,
                message,
                internal,
            } => {
                if let Some(internal) = internal {
                    tracing::warn!(internal = %internal, "Internal error detail");
                }
                let body = json!({
                    "status": status,
                    "message": message,
                });
                (status_code(status), Json(body)).into_response()
            }
        }
    }
}
