//! Cookie-backed session plumbing for the HTTP layer.
//!
//! The session id lives in an opaque, HttpOnly cookie; all state lives
//! server-side behind the [`SessionStore`] interface. Handlers load the
//! session up front, hand the engine a mutable state value, and persist
//! whatever came back, success or failure, because the engine mutates the
//! session on both paths.

use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::Response;
use uuid::Uuid;

use crate::AuthResult;
use crate::http::AppState;
use crate::session::SessionState;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "portauth_session";

/// A loaded session and the bookkeeping to persist it.
pub struct SessionHandle {
    /// The session id.
    pub id: String,
    /// The loaded (or fresh) state.
    pub state: SessionState,
    /// Whether the cookie still has to be set on the response.
    pub is_new: bool,
}

impl SessionHandle {
    /// Attaches the session cookie to a response when the session is new.
    #[must_use]
    pub fn apply_cookie(&self, mut response: Response) -> Response {
        if self.is_new {
            response
                .headers_mut()
                .insert(header::SET_COOKIE, session_cookie(&self.id));
        }
        response
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k == name).then(|| v.to_string())
    })
}

/// Loads the session for a request, creating a fresh one when the cookie
/// is absent or stale.
pub async fn load_session(
    state: &AppState,
    auth_method_id: &str,
    headers: &HeaderMap,
) -> AuthResult<SessionHandle> {
    if let Some(id) = cookie_value(headers, SESSION_COOKIE) {
        if let Some(session) = state
            .engine
            .services()
            .sessions
            .get(auth_method_id, &id)
            .await?
        {
            return Ok(SessionHandle {
                id,
                state: session,
                is_new: false,
            });
        }
        // Keep the id, start fresh state; the cookie is already set
        return Ok(SessionHandle {
            id,
            state: SessionState::default(),
            is_new: false,
        });
    }
    Ok(SessionHandle {
        id: Uuid::new_v4().to_string(),
        state: SessionState::default(),
        is_new: true,
    })
}

/// Persists the session state.
pub async fn save_session(
    state: &AppState,
    auth_method_id: &str,
    handle: &SessionHandle,
) -> AuthResult<()> {
    state
        .engine
        .services()
        .sessions
        .put(auth_method_id, &handle.id, handle.state.clone())
        .await
}

/// Deletes the session state (logout).
pub async fn drop_session(
    state: &AppState,
    auth_method_id: &str,
    handle: &SessionHandle,
) -> AuthResult<()> {
    state
        .engine
        .services()
        .sessions
        .delete(auth_method_id, &handle.id)
        .await
}

/// The `Set-Cookie` value for a session id.
#[must_use]
pub fn session_cookie(session_id: &str) -> HeaderValue {
    let value = format!("{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; SameSite=Lax");
    HeaderValue::from_str(&value)
        .unwrap_or_else(|_| HeaderValue::from_static("portauth_session=invalid"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("other=1; portauth_session=s-1; x=y"),
        );
        assert_eq!(
            cookie_value(&headers, SESSION_COOKIE),
            Some("s-1".to_string())
        );
        assert_eq!(cookie_value(&headers, "missing"), None);
        assert_eq!(cookie_value(&HeaderMap::new(), SESSION_COOKIE), None);
    }

    #[test]
    fn test_session_cookie_attributes() {
        let value = session_cookie("s-1");
        let s = value.to_str().unwrap();
        assert!(s.starts_with("portauth_session=s-1"));
        assert!(s.contains("HttpOnly"));
        assert!(s.contains("SameSite=Lax"));
    }
}
