//! User directory records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A record in the user directory.
///
/// Users may originate locally (password login) or be created on first
/// sight of a federated identity, in which case `custom_id` carries the
/// stable external identity key (`<provider-type>:<upstream-id>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    /// Internal user id.
    pub id: String,

    /// Stable external identity key, set for federated users.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<String>,

    /// Primary email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Whether the email address has been verified.
    #[serde(default)]
    pub email_verified: bool,

    /// Group memberships; merged into issued scopes as group pseudo-scopes.
    #[serde(default)]
    pub groups: Vec<String>,
}

impl UserInfo {
    /// Creates a new user with a fresh id and no group memberships.
    #[must_use]
    pub fn new(email: Option<String>, custom_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            custom_id,
            email,
            email_verified: false,
            groups: Vec::new(),
        }
    }

    /// Adds the groups from `defaults` that are not yet present.
    /// Returns `true` if anything was added.
    pub fn add_missing_groups(&mut self, defaults: &[String]) -> bool {
        let mut changed = false;
        for g in defaults {
            if !self.groups.contains(g) {
                self.groups.push(g.clone());
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_has_unique_id() {
        let a = UserInfo::new(Some("a@example.com".to_string()), None);
        let b = UserInfo::new(Some("b@example.com".to_string()), None);
        assert_ne!(a.id, b.id);
        assert!(!a.email_verified);
    }

    #[test]
    fn test_add_missing_groups() {
        let mut user = UserInfo::new(None, None);
        user.groups.push("dev".to_string());

        let changed = user.add_missing_groups(&["dev".to_string(), "admin".to_string()]);
        assert!(changed);
        assert_eq!(user.groups, vec!["dev", "admin"]);

        let changed = user.add_missing_groups(&["dev".to_string()]);
        assert!(!changed);
    }
}
