//! Subscription/application/API/pool registry trait.

use async_trait::async_trait;
use portauth_core::{ApiInfo, ApplicationInfo, Registration, RegistrationPool, SubscriptionInfo};

use crate::AuthResult;

/// Interface to the externally-owned metadata registry.
///
/// Lookups here are read-mostly; the engine caches API and pool metadata
/// process-wide (staleness is acceptable for this metadata class).
#[async_trait]
pub trait Registry: Send + Sync {
    /// Looks up an API descriptor.
    async fn get_api(&self, api_id: &str) -> AuthResult<Option<ApiInfo>>;

    /// Resolves the subscription for `client_id`, joined with its
    /// application. Returns `None` when the client is unknown; the caller
    /// must still verify the subscription's API matches the requested one.
    async fn get_subscription_by_client_id(
        &self,
        client_id: &str,
    ) -> AuthResult<Option<SubscriptionInfo>>;

    /// Looks up an application descriptor.
    async fn get_application(&self, application_id: &str) -> AuthResult<Option<ApplicationInfo>>;

    /// Looks up a registration pool descriptor.
    async fn get_pool(&self, pool_id: &str) -> AuthResult<Option<RegistrationPool>>;

    /// Lists a user's registrations in a pool.
    async fn get_registrations(
        &self,
        pool_id: &str,
        user_id: &str,
    ) -> AuthResult<Vec<Registration>>;

    /// Creates or updates a registration, keyed by pool, user and
    /// namespace.
    async fn upsert_registration(&self, registration: Registration) -> AuthResult<()>;
}
