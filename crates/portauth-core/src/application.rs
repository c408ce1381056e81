//! Application descriptors and client types.

use serde::{Deserialize, Serialize};

/// OAuth2 client type of an application.
///
/// Determines credential rules at both endpoints: confidential clients must
/// present a secret, public clients must not (and must use PKCE for the
/// authorization code grant). Public single-page applications additionally
/// never receive refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    /// Server-side application that can keep a client secret.
    Confidential,
    /// Browser-based single-page application.
    PublicSpa,
    /// Native (mobile/desktop) application.
    PublicNative,
}

impl ClientType {
    /// Returns `true` for confidential clients.
    #[must_use]
    pub fn is_confidential(&self) -> bool {
        matches!(self, Self::Confidential)
    }

    /// Returns `true` for public clients (SPA or native).
    #[must_use]
    pub fn is_public(&self) -> bool {
        !self.is_confidential()
    }
}

impl Default for ClientType {
    fn default() -> Self {
        Self::Confidential
    }
}

/// Descriptor of a registered application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationInfo {
    /// Application id.
    pub id: String,

    /// Display name, shown on consent screens.
    #[serde(default)]
    pub name: String,

    /// Registered redirect URIs. An authorize request's `redirect_uri` must
    /// normalize-match one of these; if absent, the sole registered URI is
    /// used as the default.
    #[serde(default)]
    pub redirect_uris: Vec<String>,

    /// Client type.
    #[serde(default)]
    pub client_type: ClientType,
}

impl ApplicationInfo {
    /// Display name with a fallback to the id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_type_predicates() {
        assert!(ClientType::Confidential.is_confidential());
        assert!(!ClientType::Confidential.is_public());
        assert!(ClientType::PublicSpa.is_public());
        assert!(ClientType::PublicNative.is_public());
    }

    #[test]
    fn test_client_type_serde() {
        assert_eq!(
            serde_json::to_string(&ClientType::PublicSpa).unwrap(),
            r#""public_spa""#
        );
        let t: ClientType = serde_json::from_str(r#""public_native""#).unwrap();
        assert_eq!(t, ClientType::PublicNative);
    }

    #[test]
    fn test_display_name_fallback() {
        let app = ApplicationInfo {
            id: "my-app".to_string(),
            name: String::new(),
            redirect_uris: vec![],
            client_type: ClientType::Confidential,
        };
        assert_eq!(app.display_name(), "my-app");
    }
}
