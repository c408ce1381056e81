//! Grant management.
//!
//! Lets an authenticated user inspect and revoke the scope grants they
//! have given applications. Listings are joined with application and API
//! display names for presentation; a missing descriptor degrades to a
//! placeholder instead of failing the listing.

use std::sync::Arc;

use portauth_core::Grant;
use serde::Serialize;
use tracing::warn;

use crate::AuthResult;
use crate::storage::{GrantStore, Registry};

/// A grant joined with display metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedGrant {
    /// The grant record.
    #[serde(flatten)]
    pub grant: Grant,
    /// Application display name.
    pub application_name: String,
    /// API display name.
    pub api_name: String,
}

/// Read/revoke interface over a user's grants.
pub struct GrantManager {
    grants: Arc<dyn GrantStore>,
    registry: Arc<dyn Registry>,
}

impl GrantManager {
    /// Creates a manager over the given stores.
    #[must_use]
    pub fn new(grants: Arc<dyn GrantStore>, registry: Arc<dyn Registry>) -> Self {
        Self { grants, registry }
    }

    /// Lists a user's grants with display names.
    pub async fn list(&self, user_id: &str) -> AuthResult<Vec<ExtendedGrant>> {
        let grants = self.grants.list_grants(user_id).await?;
        let mut extended = Vec::with_capacity(grants.len());
        for grant in grants {
            let application_name = match self.registry.get_application(&grant.application_id).await
            {
                Ok(Some(app)) => app.display_name().to_string(),
                Ok(None) | Err(_) => {
                    warn!(
                        application_id = %grant.application_id,
                        "Application descriptor missing for grant listing"
                    );
                    grant.application_id.clone()
                }
            };
            let api_name = match self.registry.get_api(&grant.api_id).await {
                Ok(Some(api)) if !api.name.is_empty() => api.name,
                _ => grant.api_id.clone(),
            };
            extended.push(ExtendedGrant {
                grant,
                application_name,
                api_name,
            });
        }
        Ok(extended)
    }

    /// Revokes a grant. Revoking a grant that does not exist is logged and
    /// treated as success; the end state is the same.
    pub async fn revoke(
        &self,
        user_id: &str,
        application_id: &str,
        api_id: &str,
    ) -> AuthResult<()> {
        let existed = self
            .grants
            .delete_grant(user_id, application_id, api_id)
            .await?;
        if !existed {
            warn!(user_id, application_id, api_id, "Revoked a grant that did not exist");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use portauth_core::{ApplicationInfo, ClientType};

    use crate::storage::{MemoryGrantStore, MemoryRegistry};

    use super::*;

    fn manager() -> (GrantManager, Arc<MemoryGrantStore>, Arc<MemoryRegistry>) {
        let grants = Arc::new(MemoryGrantStore::new());
        let registry = Arc::new(MemoryRegistry::new());
        (
            GrantManager::new(grants.clone(), registry.clone()),
            grants,
            registry,
        )
    }

    fn seeded_grant() -> Grant {
        let mut grant = Grant::new("u-1", "my-app", "orders");
        grant.add_scopes(&["read".to_string()]);
        grant
    }

    #[tokio::test]
    async fn test_listing_joins_display_names() {
        let (manager, grants, registry) = manager();
        grants.put_grant(seeded_grant()).await.unwrap();
        registry.add_subscription(crate::flow::authorize::tests::subscription("orders", false));
        registry.add_api(crate::flow::authorize::tests::scoped_api("orders", &["read"]));

        let listed = manager.list("u-1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].application_name, "My App");
        assert_eq!(listed[0].api_name, "orders");
    }

    #[tokio::test]
    async fn test_listing_degrades_to_placeholders() {
        let (manager, grants, _registry) = manager();
        grants.put_grant(seeded_grant()).await.unwrap();

        // Neither the application nor the API descriptor exists
        let listed = manager.list("u-1").await.unwrap();
        assert_eq!(listed[0].application_name, "my-app");
        assert_eq!(listed[0].api_name, "orders");
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let (manager, grants, _registry) = manager();
        grants.put_grant(seeded_grant()).await.unwrap();

        manager.revoke("u-1", "my-app", "orders").await.unwrap();
        assert!(grants.get_grant("u-1", "my-app", "orders").await.unwrap().is_none());

        // Revoking again is fine
        manager.revoke("u-1", "my-app", "orders").await.unwrap();
    }
}
