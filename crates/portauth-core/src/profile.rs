//! OIDC profiles.
//!
//! The profile is the claim set associated with an issued code or token.
//! While a flow is in progress it is augmented with internal transport
//! fields (PKCE challenge, `authenticated_userid`, `authenticated_scope`,
//! `scope_differs`); those must be stripped before the profile is exposed
//! through any profile-lookup API.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An OIDC profile: the standard claims plus arbitrary custom claims.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OidcProfile {
    /// Subject identifier.
    pub sub: String,

    /// Email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Whether the email address has been verified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,

    /// Full name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Given name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,

    /// Family name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,

    /// Preferred username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,

    /// Internal: verbose authenticated user id handed to the token gateway
    /// (`sub=<id>[;namespace=<ns>]`). Never exposed to clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticated_userid: Option<String>,

    /// Internal: the scope the user was authenticated with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticated_scope: Option<Vec<String>>,

    /// Internal: whether the issued scope differs from the requested one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_differs: Option<bool>,

    /// Internal: PKCE code challenge, carried from authorize to token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,

    /// Internal: PKCE code challenge method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,

    /// Custom claims.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OidcProfile {
    /// Creates a minimal profile with just a subject.
    #[must_use]
    pub fn new(sub: impl Into<String>) -> Self {
        Self {
            sub: sub.into(),
            ..Self::default()
        }
    }

    /// Removes all internal transport fields in place.
    pub fn strip_internal_fields(&mut self) {
        self.authenticated_userid = None;
        self.authenticated_scope = None;
        self.scope_differs = None;
        self.code_challenge = None;
        self.code_challenge_method = None;
    }

    /// Returns a copy with all internal transport fields removed.
    #[must_use]
    pub fn stripped(&self) -> Self {
        let mut p = self.clone();
        p.strip_internal_fields();
        p
    }

    /// Returns `true` if no internal transport field is set.
    #[must_use]
    pub fn is_stripped(&self) -> bool {
        self.authenticated_userid.is_none()
            && self.authenticated_scope.is_none()
            && self.scope_differs.is_none()
            && self.code_challenge.is_none()
            && self.code_challenge_method.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_internal_fields() {
        let mut profile = OidcProfile::new("u-1");
        profile.email = Some("a@example.com".to_string());
        profile.authenticated_userid = Some("sub=u-1".to_string());
        profile.authenticated_scope = Some(vec!["read".to_string()]);
        profile.scope_differs = Some(true);
        profile.code_challenge = Some("challenge".to_string());
        profile.code_challenge_method = Some("S256".to_string());

        assert!(!profile.is_stripped());
        let stripped = profile.stripped();
        assert!(stripped.is_stripped());
        // Public claims survive
        assert_eq!(stripped.sub, "u-1");
        assert_eq!(stripped.email.as_deref(), Some("a@example.com"));
    }

    #[test]
    fn test_internal_fields_not_serialized_when_absent() {
        let profile = OidcProfile::new("u-1").stripped();
        let json = serde_json::to_string(&profile).unwrap();
        assert!(!json.contains("authenticated_userid"));
        assert!(!json.contains("code_challenge"));
        assert!(!json.contains("scope_differs"));
    }

    #[test]
    fn test_custom_claims_flattened() {
        let json = r#"{"sub": "u-1", "tenant": "acme"}"#;
        let profile: OidcProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.extra.get("tenant"), Some(&Value::from("acme")));

        let out = serde_json::to_string(&profile).unwrap();
        assert!(out.contains(r#""tenant":"acme""#));
    }
}
