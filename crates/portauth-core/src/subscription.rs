//! Application/API subscriptions and their scope policy.

use serde::{Deserialize, Serialize};

use crate::application::ApplicationInfo;

/// How a subscription's allowed scopes are determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllowedScopesMode {
    /// The full declared scope set of the API is allowed.
    All,
    /// No scopes are allowed.
    None,
    /// Only the scopes in the subscription's explicit allow-list.
    Select,
}

impl Default for AllowedScopesMode {
    fn default() -> Self {
        Self::All
    }
}

/// A subscription of an application to an API under a plan.
///
/// Invariant: a subscription always resolves to exactly one application and
/// one plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// The subscribing application id.
    pub application: String,

    /// The subscribed API id.
    pub api: String,

    /// The plan the subscription runs under.
    #[serde(default)]
    pub plan: String,

    /// OAuth2 client id issued for this subscription.
    pub client_id: String,

    /// OAuth2 client secret, absent for public clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Trusted subscriptions are exempted from consent prompts and may
    /// request the full declared scope set implicitly.
    #[serde(default)]
    pub trusted: bool,

    /// Allowed-scopes policy mode.
    #[serde(default)]
    pub allowed_scopes_mode: AllowedScopesMode,

    /// Explicit allow-list, effective only in `Select` mode.
    #[serde(default)]
    pub allowed_scopes: Vec<String>,
}

/// A subscription joined with its application descriptor, as returned by
/// registry lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    /// The subscription record.
    pub subscription: Subscription,
    /// The subscribing application.
    pub application: ApplicationInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_scopes_mode_serde() {
        assert_eq!(
            serde_json::to_string(&AllowedScopesMode::Select).unwrap(),
            r#""select""#
        );
        let m: AllowedScopesMode = serde_json::from_str(r#""none""#).unwrap();
        assert_eq!(m, AllowedScopesMode::None);
    }

    #[test]
    fn test_subscription_defaults() {
        let json = r#"{
            "application": "my-app",
            "api": "orders",
            "clientId": "abc123"
        }"#;
        let sub: Subscription = serde_json::from_str(json).unwrap();
        assert!(!sub.trusted);
        assert_eq!(sub.allowed_scopes_mode, AllowedScopesMode::All);
        assert!(sub.allowed_scopes.is_empty());
        assert!(sub.client_secret.is_none());
    }
}
