//! Registration pools and registrations.
//!
//! A registration pool is a named schema of additional user attributes an
//! API requires, collected via a registration form and optionally
//! namespaced (e.g. one registration per tenant).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A property collected by a registration pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolProperty {
    /// Property name, used as the form field name.
    pub name: String,

    /// OIDC claim the property value maps onto, if any. Properties without
    /// a claim mapping stay in the registration record only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc_claim: Option<String>,

    /// Whether the property must be provided at registration.
    #[serde(default)]
    pub required: bool,
}

/// A registration pool descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationPool {
    /// Pool id.
    pub id: String,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Whether registrations in this pool are namespaced.
    #[serde(default)]
    pub requires_namespace: bool,

    /// Whether self-registration is forbidden; users without an existing
    /// registration are rejected instead of being shown a form.
    #[serde(default)]
    pub disable_register: bool,

    /// Declared properties.
    #[serde(default)]
    pub properties: Vec<PoolProperty>,
}

/// A user's registration in a pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    /// The pool this registration belongs to.
    pub pool_id: String,

    /// The registered user.
    pub user_id: String,

    /// Namespace, present iff the pool requires one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Submitted property values, keyed by property name.
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_defaults() {
        let json = r#"{"id": "customers"}"#;
        let pool: RegistrationPool = serde_json::from_str(json).unwrap();
        assert!(!pool.requires_namespace);
        assert!(!pool.disable_register);
        assert!(pool.properties.is_empty());
    }

    #[test]
    fn test_registration_roundtrip() {
        let mut props = BTreeMap::new();
        props.insert("company".to_string(), serde_json::json!("ACME"));
        let reg = Registration {
            pool_id: "customers".to_string(),
            user_id: "u-1".to_string(),
            namespace: Some("acme".to_string()),
            properties: props,
        };
        let json = serde_json::to_string(&reg).unwrap();
        assert!(json.contains(r#""poolId":"customers""#));
        assert!(json.contains(r#""namespace":"acme""#));
    }
}
