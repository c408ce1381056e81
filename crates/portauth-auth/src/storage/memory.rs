//! In-memory storage implementations.
//!
//! Back the test suites and single-node deployments. All maps are
//! process-local; nothing here survives a restart.

use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use portauth_core::{
    ApiInfo, ApplicationInfo, Grant, Registration, RegistrationPool, SubscriptionInfo, TokenRecord,
    UserInfo,
};

use crate::AuthResult;
use crate::error::AuthError;

use super::{GrantStore, Registry, TokenRecordStore, UserDirectory, VerificationService};

// =============================================================================
// User Directory
// =============================================================================

/// In-memory user directory with optional password credentials.
#[derive(Default)]
pub struct MemoryUserDirectory {
    users: DashMap<String, UserInfo>,
    // username -> (password, user id)
    credentials: DashMap<String, (String, String)>,
}

impl MemoryUserDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a user record.
    pub fn add_user(&self, user: UserInfo) {
        self.users.insert(user.id.clone(), user);
    }

    /// Seeds password credentials for a user.
    pub fn add_credentials(
        &self,
        username: impl Into<String>,
        password: impl Into<String>,
        user_id: impl Into<String>,
    ) {
        self.credentials
            .insert(username.into(), (password.into(), user_id.into()));
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn get_user(&self, user_id: &str) -> AuthResult<Option<UserInfo>> {
        Ok(self.users.get(user_id).map(|u| u.clone()))
    }

    async fn get_user_by_custom_id(&self, custom_id: &str) -> AuthResult<Option<UserInfo>> {
        Ok(self
            .users
            .iter()
            .find(|u| u.custom_id.as_deref() == Some(custom_id))
            .map(|u| u.clone()))
    }

    async fn get_user_by_email(&self, email: &str) -> AuthResult<Option<UserInfo>> {
        Ok(self
            .users
            .iter()
            .find(|u| u.email.as_deref() == Some(email))
            .map(|u| u.clone()))
    }

    async fn create_user(&self, user: UserInfo) -> AuthResult<UserInfo> {
        if let Some(email) = user.email.as_deref() {
            if self.get_user_by_email(email).await?.is_some() {
                return Err(AuthError::ui(
                    409,
                    "A user with this email address already exists",
                ));
            }
        }
        self.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn patch_user_groups(&self, user_id: &str, groups: &[String]) -> AuthResult<()> {
        match self.users.get_mut(user_id) {
            Some(mut user) => {
                user.groups = groups.to_vec();
                Ok(())
            }
            None => Err(AuthError::json(404, format!("user {user_id} not found"))),
        }
    }

    async fn verify_password(
        &self,
        username: &str,
        password: &str,
    ) -> AuthResult<Option<UserInfo>> {
        let Some(entry) = self.credentials.get(username) else {
            return Ok(None);
        };
        let (stored_password, user_id) = entry.value();
        if stored_password != password {
            return Ok(None);
        }
        self.get_user(user_id).await
    }
}

// =============================================================================
// Registry
// =============================================================================

/// In-memory metadata registry.
#[derive(Default)]
pub struct MemoryRegistry {
    apis: DashMap<String, ApiInfo>,
    applications: DashMap<String, ApplicationInfo>,
    subscriptions: DashMap<String, SubscriptionInfo>,
    pools: DashMap<String, RegistrationPool>,
    registrations: DashMap<(String, String), Vec<Registration>>,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an API descriptor.
    pub fn add_api(&self, api: ApiInfo) {
        self.apis.insert(api.id.clone(), api);
    }

    /// Seeds a subscription, keyed by its client id, and its application.
    pub fn add_subscription(&self, info: SubscriptionInfo) {
        self.applications
            .insert(info.application.id.clone(), info.application.clone());
        self.subscriptions
            .insert(info.subscription.client_id.clone(), info);
    }

    /// Seeds a registration pool.
    pub fn add_pool(&self, pool: RegistrationPool) {
        self.pools.insert(pool.id.clone(), pool);
    }

    /// Seeds a registration.
    pub fn add_registration(&self, registration: Registration) {
        self.registrations
            .entry((registration.pool_id.clone(), registration.user_id.clone()))
            .or_default()
            .push(registration);
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn get_api(&self, api_id: &str) -> AuthResult<Option<ApiInfo>> {
        Ok(self.apis.get(api_id).map(|a| a.clone()))
    }

    async fn get_subscription_by_client_id(
        &self,
        client_id: &str,
    ) -> AuthResult<Option<SubscriptionInfo>> {
        Ok(self.subscriptions.get(client_id).map(|s| s.clone()))
    }

    async fn get_application(&self, application_id: &str) -> AuthResult<Option<ApplicationInfo>> {
        Ok(self.applications.get(application_id).map(|a| a.clone()))
    }

    async fn get_pool(&self, pool_id: &str) -> AuthResult<Option<RegistrationPool>> {
        Ok(self.pools.get(pool_id).map(|p| p.clone()))
    }

    async fn get_registrations(
        &self,
        pool_id: &str,
        user_id: &str,
    ) -> AuthResult<Vec<Registration>> {
        Ok(self
            .registrations
            .get(&(pool_id.to_string(), user_id.to_string()))
            .map(|r| r.clone())
            .unwrap_or_default())
    }

    async fn upsert_registration(&self, registration: Registration) -> AuthResult<()> {
        let key = (registration.pool_id.clone(), registration.user_id.clone());
        let mut entry = self.registrations.entry(key).or_default();
        match entry
            .iter_mut()
            .find(|r| r.namespace == registration.namespace)
        {
            Some(existing) => *existing = registration,
            None => entry.push(registration),
        }
        Ok(())
    }
}

// =============================================================================
// Grant Store
// =============================================================================

/// In-memory grant store.
#[derive(Default)]
pub struct MemoryGrantStore {
    grants: DashMap<(String, String, String), Grant>,
}

impl MemoryGrantStore {
    /// Creates an empty grant store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GrantStore for MemoryGrantStore {
    async fn get_grant(
        &self,
        user_id: &str,
        application_id: &str,
        api_id: &str,
    ) -> AuthResult<Option<Grant>> {
        let key = (
            user_id.to_string(),
            application_id.to_string(),
            api_id.to_string(),
        );
        Ok(self.grants.get(&key).map(|g| g.clone()))
    }

    async fn put_grant(&self, grant: Grant) -> AuthResult<()> {
        let key = (
            grant.user_id.clone(),
            grant.application_id.clone(),
            grant.api_id.clone(),
        );
        self.grants.insert(key, grant);
        Ok(())
    }

    async fn delete_grant(
        &self,
        user_id: &str,
        application_id: &str,
        api_id: &str,
    ) -> AuthResult<bool> {
        let key = (
            user_id.to_string(),
            application_id.to_string(),
            api_id.to_string(),
        );
        Ok(self.grants.remove(&key).is_some())
    }

    async fn list_grants(&self, user_id: &str) -> AuthResult<Vec<Grant>> {
        Ok(self
            .grants
            .iter()
            .filter(|g| g.user_id == user_id)
            .map(|g| g.clone())
            .collect())
    }
}

// =============================================================================
// Token Record Store
// =============================================================================

/// In-memory token-record store, keyed by access token.
#[derive(Default)]
pub struct MemoryTokenRecordStore {
    records: DashMap<String, TokenRecord>,
}

impl MemoryTokenRecordStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenRecordStore for MemoryTokenRecordStore {
    async fn register(&self, record: TokenRecord) -> AuthResult<()> {
        self.records.insert(record.access_token.clone(), record);
        Ok(())
    }

    async fn get_by_refresh_token(&self, refresh_token: &str) -> AuthResult<Vec<TokenRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.refresh_token.as_deref() == Some(refresh_token))
            .map(|r| r.clone())
            .collect())
    }

    async fn get_by_access_token(&self, access_token: &str) -> AuthResult<Option<TokenRecord>> {
        Ok(self.records.get(access_token).map(|r| r.clone()))
    }

    async fn delete_by_access_token(&self, access_token: &str) -> AuthResult<()> {
        self.records.remove(access_token);
        Ok(())
    }
}

// =============================================================================
// Verification Service
// =============================================================================

/// In-memory verification service that records requests.
#[derive(Default)]
pub struct MemoryVerificationService {
    requests: Mutex<Vec<(String, String)>>,
}

impl MemoryVerificationService {
    /// Creates an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The `(user_id, email)` pairs requested so far.
    #[must_use]
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl VerificationService for MemoryVerificationService {
    async fn request_email_verification(&self, user_id: &str, email: &str) -> AuthResult<()> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((user_id.to_string(), email.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_user_directory_duplicate_email() {
        let dir = MemoryUserDirectory::new();
        let user = UserInfo::new(Some("a@example.com".to_string()), None);
        dir.create_user(user).await.unwrap();

        let dup = UserInfo::new(Some("a@example.com".to_string()), None);
        let err = dir.create_user(dup).await.unwrap_err();
        assert_eq!(err.status(), 409);
    }

    #[tokio::test]
    async fn test_user_directory_password_verification() {
        let dir = MemoryUserDirectory::new();
        let user = UserInfo::new(Some("a@example.com".to_string()), None);
        let user_id = user.id.clone();
        dir.add_user(user);
        dir.add_credentials("a@example.com", "hunter2", &user_id);

        let found = dir.verify_password("a@example.com", "hunter2").await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(user_id));

        assert!(dir.verify_password("a@example.com", "wrong").await.unwrap().is_none());
        assert!(dir.verify_password("nobody", "hunter2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_registration_upsert_by_namespace() {
        let registry = MemoryRegistry::new();
        let mut reg = Registration {
            pool_id: "customers".to_string(),
            user_id: "u-1".to_string(),
            namespace: Some("acme".to_string()),
            properties: Default::default(),
        };
        registry.upsert_registration(reg.clone()).await.unwrap();

        reg.properties
            .insert("company".to_string(), serde_json::json!("ACME Corp"));
        registry.upsert_registration(reg.clone()).await.unwrap();

        let regs = registry.get_registrations("customers", "u-1").await.unwrap();
        assert_eq!(regs.len(), 1);
        assert_eq!(
            regs[0].properties.get("company"),
            Some(&serde_json::json!("ACME Corp"))
        );

        reg.namespace = Some("other".to_string());
        registry.upsert_registration(reg).await.unwrap();
        let regs = registry.get_registrations("customers", "u-1").await.unwrap();
        assert_eq!(regs.len(), 2);
    }

    #[tokio::test]
    async fn test_token_record_store_refresh_lookup() {
        let store = MemoryTokenRecordStore::new();
        let settings = portauth_core::ApiSettings::default();
        let (expires, expires_refresh) = TokenRecord::expiry_from_settings(&settings, true);
        let record = TokenRecord {
            access_token: "at-1".to_string(),
            refresh_token: Some("rt-1".to_string()),
            api_id: "orders".to_string(),
            plan_id: "basic".to_string(),
            application_id: "my-app".to_string(),
            auth_method: "portauth:default".to_string(),
            authenticated_userid: Some("sub=u-1".to_string()),
            scope: vec!["read".to_string()],
            expires,
            expires_refresh,
            profile: None,
        };
        store.register(record).await.unwrap();

        assert_eq!(store.get_by_refresh_token("rt-1").await.unwrap().len(), 1);
        assert!(store.get_by_access_token("at-1").await.unwrap().is_some());

        store.delete_by_access_token("at-1").await.unwrap();
        assert!(store.get_by_refresh_token("rt-1").await.unwrap().is_empty());
    }
}
