//! The two protocol endpoints: authorize and token.

use axum::{
    Form, Json,
    extract::{Path, Query, State},
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
};

use crate::http::session::{load_session, save_session};
use crate::http::{AppState, ui_response};
use crate::oauth::{AuthorizeQuery, TokenRequestForm, decode_basic_auth};

/// `GET /{auth_method_id}/api/{api_id}/authorize`
pub async fn authorize(
    State(state): State<AppState>,
    Path((auth_method_id, api_id)): Path<(String, String)>,
    headers: HeaderMap,
    Query(query): Query<AuthorizeQuery>,
) -> Response {
    let mut handle = match load_session(&state, &auth_method_id, &headers).await {
        Ok(handle) => handle,
        Err(e) => return e.into_response(),
    };

    let outcome = state
        .engine
        .authorize(&auth_method_id, &api_id, &query, &mut handle.state)
        .await;
    // The engine mutates the session on both paths
    if let Err(e) = save_session(&state, &auth_method_id, &handle).await {
        return e.into_response();
    }

    let response = match outcome {
        Ok(action) => ui_response(&auth_method_id, action),
        Err(e) => e.into_response(),
    };
    handle.apply_cookie(response)
}

/// `POST /{auth_method_id}/api/{api_id}/token`
pub async fn token(
    State(state): State<AppState>,
    Path((auth_method_id, api_id)): Path<(String, String)>,
    headers: HeaderMap,
    Form(form): Form<TokenRequestForm>,
) -> Response {
    let basic_auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(decode_basic_auth);

    match state
        .engine
        .token(&auth_method_id, &api_id, basic_auth, &form)
        .await
    {
        Ok(token) => Json(token).into_response(),
        Err(e) => e.into_response(),
    }
}
