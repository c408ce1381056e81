//! The HTTP surface.
//!
//! One router serves every configured auth method; the method id is the
//! first path segment, so `/default/api/orders/authorize` runs the
//! `orders` authorization through the `default` method. Handlers are thin:
//! load the session, call the engine, persist the session, translate the
//! engine's [`UiAction`] into a response. All error translation lives in
//! the [`AuthError`](crate::error::AuthError) `IntoResponse` impl.

mod account;
mod forms;
mod oauth;
pub mod session;
pub mod templates;

use std::sync::Arc;

use axum::{
    Json, Router,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{delete, get, post},
};

use crate::error::AuthError;
use crate::flow::FlowEngine;
use crate::grants::GrantManager;
use crate::idp::UiAction;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// The flow engine.
    pub engine: Arc<FlowEngine>,
    /// Grant management.
    pub grant_manager: Arc<GrantManager>,
}

/// Builds the router for all mounted auth methods.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/{auth_method_id}/api/{api_id}/authorize",
            get(oauth::authorize),
        )
        .route("/{auth_method_id}/api/{api_id}/token", post(oauth::token))
        .route(
            "/{auth_method_id}/login",
            get(forms::login_page).post(forms::login_submit),
        )
        .route("/{auth_method_id}/register", post(forms::register_submit))
        .route(
            "/{auth_method_id}/selectnamespace",
            post(forms::select_namespace_submit),
        )
        .route("/{auth_method_id}/grant", post(forms::grant_submit))
        .route("/{auth_method_id}/logout", get(forms::logout))
        .route("/{auth_method_id}/profile", get(account::profile))
        .route("/{auth_method_id}/grants", get(account::list_grants))
        .route(
            "/{auth_method_id}/grants/{application_id}/{api_id}",
            delete(account::revoke_grant),
        )
        .route("/{auth_method_id}/verifyemail", post(account::verify_email))
        .with_state(state)
}

async fn health() -> Response {
    Json(serde_json::json!({ "status": "up" })).into_response()
}

/// Translates an engine action into a response.
pub(crate) fn ui_response(auth_method_id: &str, action: UiAction) -> Response {
    match action {
        UiAction::Render { template, view } => {
            match templates::render(auth_method_id, &template, &view) {
                Ok(html) => Html(html).into_response(),
                Err(e) => e.into_response(),
            }
        }
        UiAction::Redirect { location } => Redirect::to(&location).into_response(),
        // The engine consumes authentication outcomes itself
        UiAction::Authenticated(_) => {
            AuthError::server_error("unconsumed authentication outcome").into_response()
        }
    }
}
