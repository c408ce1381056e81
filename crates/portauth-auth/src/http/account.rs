//! Token-management and account endpoints: profile lookup, grant
//! management, email verification.
//!
//! These speak plain JSON, not the RFC 6749 error shape; failures here use
//! the `{status, message}` body.

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::AuthResult;
use crate::error::AuthError;
use crate::http::session::load_session;
use crate::http::AppState;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// `GET /{auth_method_id}/profile`
///
/// Resolves the OIDC profile for a bearer access token. Internal transport
/// fields are stripped server-side before the profile leaves the store
/// boundary; this endpoint can only ever return public claims.
pub async fn profile(
    State(state): State<AppState>,
    Path(_auth_method_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return AuthError::json(401, "a bearer access token is required").into_response();
    };
    match state.engine.services().profiles.retrieve(token).await {
        Ok(Some(profile)) => Json(profile.stripped()).into_response(),
        // The profile store may have expired before the token record did
        Ok(None) => match state.engine.services().tokens.get_by_access_token(token).await {
            Ok(Some(record)) => match record.profile {
                Some(profile) => Json(profile.stripped()).into_response(),
                None => AuthError::json(404, "no profile for this token").into_response(),
            },
            Ok(None) => AuthError::json(404, "no profile for this token").into_response(),
            Err(e) => e.into_response(),
        },
        Err(e) => e.into_response(),
    }
}

/// Resolves the logged-in user id from the session.
async fn session_user(
    state: &AppState,
    auth_method_id: &str,
    headers: &HeaderMap,
) -> AuthResult<String> {
    let handle = load_session(state, auth_method_id, headers).await?;
    handle
        .state
        .auth_response
        .and_then(|r| r.user_id)
        .ok_or_else(|| AuthError::json(401, "not logged in"))
}

/// `GET /{auth_method_id}/grants`
pub async fn list_grants(
    State(state): State<AppState>,
    Path(auth_method_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let user_id = match session_user(&state, &auth_method_id, &headers).await {
        Ok(user_id) => user_id,
        Err(e) => return e.into_response(),
    };
    match state.grant_manager.list(&user_id).await {
        Ok(grants) => Json(grants).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `DELETE /{auth_method_id}/grants/{application_id}/{api_id}`
pub async fn revoke_grant(
    State(state): State<AppState>,
    Path((auth_method_id, application_id, api_id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    let user_id = match session_user(&state, &auth_method_id, &headers).await {
        Ok(user_id) => user_id,
        Err(e) => return e.into_response(),
    };
    match state
        .grant_manager
        .revoke(&user_id, &application_id, &api_id)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

/// `POST /{auth_method_id}/verifyemail`
///
/// Requests a (re-)verification mail for the logged-in user.
pub async fn verify_email(
    State(state): State<AppState>,
    Path(auth_method_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let user_id = match session_user(&state, &auth_method_id, &headers).await {
        Ok(user_id) => user_id,
        Err(e) => return e.into_response(),
    };
    let user = match state.engine.services().users.get_user(&user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return AuthError::json(404, "user not found").into_response(),
        Err(e) => return e.into_response(),
    };
    let Some(email) = user.email else {
        return AuthError::json(400, "the user has no email address").into_response();
    };
    match state
        .engine
        .services()
        .verifications
        .request_email_verification(&user_id, &email)
        .await
    {
        Ok(()) => Json(serde_json::json!({ "status": "ok" })).into_response(),
        Err(e) => e.into_response(),
    }
}
