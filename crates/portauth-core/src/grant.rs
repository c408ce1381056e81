//! Persisted scope-consent records.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A single granted scope with its grant date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeGrant {
    /// The granted scope name.
    pub scope: String,

    /// When the scope was granted.
    #[serde(with = "time::serde::rfc3339")]
    pub granted_date: OffsetDateTime,
}

/// A consent record: which scopes a user has granted an application for
/// one API.
///
/// Created when a user approves a scope-consent screen; read on every
/// authorize/refresh for non-trusted subscriptions; deleted on explicit
/// revocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    /// The granting user.
    pub user_id: String,

    /// The application the grant was given to.
    pub application_id: String,

    /// The API the grant applies to.
    pub api_id: String,

    /// The granted scopes.
    #[serde(default)]
    pub grants: Vec<ScopeGrant>,
}

impl Grant {
    /// Creates an empty grant record.
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        application_id: impl Into<String>,
        api_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            application_id: application_id.into(),
            api_id: api_id.into(),
            grants: Vec::new(),
        }
    }

    /// Returns `true` if `scope` has been granted.
    #[must_use]
    pub fn contains_scope(&self, scope: &str) -> bool {
        self.grants.iter().any(|g| g.scope == scope)
    }

    /// The requested scopes not yet covered by this record.
    #[must_use]
    pub fn missing_scopes(&self, requested: &[String]) -> Vec<String> {
        requested
            .iter()
            .filter(|s| !self.contains_scope(s))
            .cloned()
            .collect()
    }

    /// Appends the given scopes, skipping ones already present.
    pub fn add_scopes(&mut self, scopes: &[String]) {
        let now = OffsetDateTime::now_utc();
        for scope in scopes {
            if !self.contains_scope(scope) {
                self.grants.push(ScopeGrant {
                    scope: scope.clone(),
                    granted_date: now,
                });
            }
        }
    }

    /// The granted scope names.
    #[must_use]
    pub fn scope_names(&self) -> Vec<String> {
        self.grants.iter().map(|g| g.scope.clone()).collect()
    }
}
