//! Scope parsing and validation.
//!
//! Validates a requested scope against an API's declared scope map and the
//! subscription's allowed-scope policy. Unknown scopes fail the request;
//! disallowed-but-known scopes are silently dropped and only flagged via
//! `scope_differs`, so clients are never told which scopes were withheld.

use portauth_core::{AllowedScopesMode, ApiInfo, Subscription};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Prefix for group-derived pseudo-scopes merged into issued scopes.
pub const GROUP_SCOPE_PREFIX: &str = "portal:";

/// The result of scope validation. Intermediate, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedScopes {
    /// The scopes that survived validation.
    pub validated_scopes: Vec<String>,
    /// Whether the validated set differs from the requested one, either by
    /// expansion (trusted + empty) or by dropping disallowed scopes.
    pub scope_differs: bool,
}

/// Parses a scope value from its wire representation.
///
/// Accepts space-, comma-, and semicolon-delimited strings. Empty tokens
/// are skipped, duplicates are removed while preserving order.
#[must_use]
pub fn parse_scope(scope: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in scope.split([' ', ',', ';']) {
        if !token.is_empty() && !out.iter().any(|t| t == token) {
            out.push(token.to_string());
        }
    }
    out
}

/// Joins scopes into the space-delimited wire form.
#[must_use]
pub fn scope_string(scopes: &[String]) -> String {
    scopes.join(" ")
}

/// Validates a requested scope against the API's declared scopes and the
/// subscription's allowed-scope policy.
///
/// Trusted subscriptions with an empty requested scope expand to the full
/// declared scope set and are marked `scope_differs`. A requested scope
/// not declared by the API fails with `invalid_request`. Scopes that are
/// declared but not allowed by the subscription's mode are dropped, not
/// failed, and set `scope_differs`.
///
/// # Errors
///
/// Returns an `invalid_request` failure for unknown scopes.
pub fn validate_scopes(
    api: &ApiInfo,
    requested: &[String],
    subscription: &Subscription,
) -> Result<ValidatedScopes, AuthError> {
    if subscription.trusted && requested.is_empty() {
        return Ok(ValidatedScopes {
            validated_scopes: api.declared_scopes(),
            scope_differs: true,
        });
    }

    for scope in requested {
        if !api.declares_scope(scope) {
            return Err(AuthError::invalid_request(format!(
                "Invalid scope '{scope}' for API '{}'",
                api.id
            )));
        }
    }

    let allowed: Vec<String> = match subscription.allowed_scopes_mode {
        AllowedScopesMode::All => api.declared_scopes(),
        AllowedScopesMode::None => Vec::new(),
        AllowedScopesMode::Select => subscription.allowed_scopes.clone(),
    };

    let validated_scopes: Vec<String> = requested
        .iter()
        .filter(|s| allowed.iter().any(|a| a == *s))
        .cloned()
        .collect();
    let scope_differs = validated_scopes.len() != requested.len();

    Ok(ValidatedScopes {
        validated_scopes,
        scope_differs,
    })
}

/// Merges group-derived pseudo-scopes (`portal:<group>`) into a scope set.
#[must_use]
pub fn merge_group_scopes(scopes: &[String], groups: &[String]) -> Vec<String> {
    let mut out = scopes.to_vec();
    for group in groups {
        let pseudo = format!("{GROUP_SCOPE_PREFIX}{group}");
        if !out.contains(&pseudo) {
            out.push(pseudo);
        }
    }
    out
}

/// Removes group-derived pseudo-scopes from a scope set. Used when
/// re-validating refresh tokens, whose stored scope includes the merged
/// pseudo-scopes.
#[must_use]
pub fn strip_group_scopes(scopes: &[String]) -> Vec<String> {
    scopes
        .iter()
        .filter(|s| !s.starts_with(GROUP_SCOPE_PREFIX))
        .cloned()
        .collect()
}
