//! Grant store trait.

use async_trait::async_trait;
use portauth_core::Grant;

use crate::AuthResult;

/// Interface to the consent-record store.
#[async_trait]
pub trait GrantStore: Send + Sync {
    /// Loads the grant record for `(user, application, api)`.
    async fn get_grant(
        &self,
        user_id: &str,
        application_id: &str,
        api_id: &str,
    ) -> AuthResult<Option<Grant>>;

    /// Creates or replaces a grant record.
    async fn put_grant(&self, grant: Grant) -> AuthResult<()>;

    /// Deletes a grant record. Returns `false` when none existed.
    async fn delete_grant(
        &self,
        user_id: &str,
        application_id: &str,
        api_id: &str,
    ) -> AuthResult<bool>;

    /// Lists all grant records of a user.
    async fn list_grants(&self, user_id: &str) -> AuthResult<Vec<Grant>>;
}
