//! Interactive form endpoints: login, registration, namespace selection,
//! consent and logout.

use std::collections::BTreeMap;

use axum::{
    Form,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use serde_json::json;

use crate::error::{AuthError, OAuthErrorCode};
use crate::http::session::{drop_session, load_session, save_session};
use crate::http::{AppState, templates, ui_response};

#[derive(Debug, Deserialize)]
pub struct PlainLoginQuery {
    /// Internal URI to return to after login.
    pub redirect_uri: Option<String>,
    /// Username to prefill.
    #[serde(default)]
    pub prefill_username: Option<String>,
}

/// `GET /{auth_method_id}/login` - headless login entry for internal UIs.
pub async fn login_page(
    State(state): State<AppState>,
    Path(auth_method_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<PlainLoginQuery>,
) -> Response {
    let Some(redirect_uri) = query.redirect_uri else {
        return AuthError::ui(400, "redirect_uri is missing").into_response();
    };
    let mut handle = match load_session(&state, &auth_method_id, &headers).await {
        Ok(handle) => handle,
        Err(e) => return e.into_response(),
    };

    let outcome = state
        .engine
        .plain_login(
            &auth_method_id,
            &redirect_uri,
            query.prefill_username,
            &mut handle.state,
        )
        .await;
    if let Err(e) = save_session(&state, &auth_method_id, &handle).await {
        return e.into_response();
    }
    let response = match outcome {
        Ok(action) => ui_response(&auth_method_id, action),
        Err(e) => e.into_response(),
    };
    handle.apply_cookie(response)
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

/// `POST /{auth_method_id}/login`
pub async fn login_submit(
    State(state): State<AppState>,
    Path(auth_method_id): Path<String>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Response {
    let mut handle = match load_session(&state, &auth_method_id, &headers).await {
        Ok(handle) => handle,
        Err(e) => return e.into_response(),
    };

    let outcome = state
        .engine
        .login(&auth_method_id, &form.username, &form.password, &mut handle.state)
        .await;
    if let Err(e) = save_session(&state, &auth_method_id, &handle).await {
        return e.into_response();
    }

    let response = match outcome {
        Ok(action) => ui_response(&auth_method_id, action),
        // Bad credentials re-render the form instead of surfacing JSON
        Err(e) if e.oauth_error_code() == Some(OAuthErrorCode::InvalidGrant) => {
            let view = json!({ "prefillUsername": form.username });
            let html = templates::login(&auth_method_id, &view, Some("Invalid username or password"));
            (StatusCode::UNAUTHORIZED, Html(html)).into_response()
        }
        Err(e) => e.into_response(),
    };
    handle.apply_cookie(response)
}

/// `POST /{auth_method_id}/register`
///
/// The form is schemaless: the pool's declared properties come in as
/// plain fields next to the nonce.
pub async fn register_submit(
    State(state): State<AppState>,
    Path(auth_method_id): Path<String>,
    headers: HeaderMap,
    Form(mut form): Form<BTreeMap<String, String>>,
) -> Response {
    let Some(nonce) = form.remove("nonce") else {
        return AuthError::ui(400, "The form is missing its nonce").into_response();
    };
    let properties: BTreeMap<String, serde_json::Value> = form
        .into_iter()
        .map(|(k, v)| (k, serde_json::Value::String(v)))
        .collect();

    let mut handle = match load_session(&state, &auth_method_id, &headers).await {
        Ok(handle) => handle,
        Err(e) => return e.into_response(),
    };
    let outcome = state
        .engine
        .submit_registration(&auth_method_id, &nonce, properties, &mut handle.state)
        .await;
    if let Err(e) = save_session(&state, &auth_method_id, &handle).await {
        return e.into_response();
    }
    match outcome {
        Ok(action) => ui_response(&auth_method_id, action),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct NamespaceForm {
    pub nonce: String,
    pub namespace: String,
}

/// `POST /{auth_method_id}/selectnamespace`
pub async fn select_namespace_submit(
    State(state): State<AppState>,
    Path(auth_method_id): Path<String>,
    headers: HeaderMap,
    Form(form): Form<NamespaceForm>,
) -> Response {
    let mut handle = match load_session(&state, &auth_method_id, &headers).await {
        Ok(handle) => handle,
        Err(e) => return e.into_response(),
    };
    let outcome = state
        .engine
        .select_namespace(&auth_method_id, &form.nonce, &form.namespace, &mut handle.state)
        .await;
    if let Err(e) = save_session(&state, &auth_method_id, &handle).await {
        return e.into_response();
    }
    match outcome {
        Ok(action) => ui_response(&auth_method_id, action),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct GrantForm {
    pub nonce: String,
    /// `allow` or `deny`.
    #[serde(rename = "_action")]
    pub action: String,
}

/// `POST /{auth_method_id}/grant`
pub async fn grant_submit(
    State(state): State<AppState>,
    Path(auth_method_id): Path<String>,
    headers: HeaderMap,
    Form(form): Form<GrantForm>,
) -> Response {
    let mut handle = match load_session(&state, &auth_method_id, &headers).await {
        Ok(handle) => handle,
        Err(e) => return e.into_response(),
    };
    let allow = form.action == "allow";
    let outcome = state
        .engine
        .decide_grant(&auth_method_id, &form.nonce, allow, &mut handle.state)
        .await;
    if let Err(e) = save_session(&state, &auth_method_id, &handle).await {
        return e.into_response();
    }
    match outcome {
        Ok(action) => ui_response(&auth_method_id, action),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct LogoutQuery {
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

/// `GET /{auth_method_id}/logout`
///
/// Drops the session; a provider with a logout hook (single logout) takes
/// over the response.
pub async fn logout(
    State(state): State<AppState>,
    Path(auth_method_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<LogoutQuery>,
) -> Response {
    let handle = match load_session(&state, &auth_method_id, &headers).await {
        Ok(handle) => handle,
        Err(e) => return e.into_response(),
    };
    if let Err(e) = drop_session(&state, &auth_method_id, &handle).await {
        return e.into_response();
    }

    let provider = match state.engine.provider(&auth_method_id) {
        Ok(provider) => provider,
        Err(e) => return e.into_response(),
    };
    if let Some(action) = provider.logout_hook() {
        return ui_response(&auth_method_id, action);
    }
    let target = query.redirect_uri.as_deref().unwrap_or("/");
    Redirect::to(target).into_response()
}
