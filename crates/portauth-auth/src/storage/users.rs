//! User directory trait.

use async_trait::async_trait;
use portauth_core::UserInfo;

use crate::AuthResult;

/// Interface to the external user directory.
///
/// Implementations must fail `create_user` with a 409-shaped error when a
/// user with the same email already exists; the engine surfaces that as a
/// friendly UI failure.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Looks up a user by internal id.
    async fn get_user(&self, user_id: &str) -> AuthResult<Option<UserInfo>>;

    /// Looks up a user by stable external identity key.
    async fn get_user_by_custom_id(&self, custom_id: &str) -> AuthResult<Option<UserInfo>>;

    /// Looks up a user by email address.
    async fn get_user_by_email(&self, email: &str) -> AuthResult<Option<UserInfo>>;

    /// Creates a user record.
    ///
    /// # Errors
    ///
    /// Fails with status 409 when the email is already taken.
    async fn create_user(&self, user: UserInfo) -> AuthResult<UserInfo>;

    /// Replaces a user's group memberships.
    async fn patch_user_groups(&self, user_id: &str, groups: &[String]) -> AuthResult<()>;

    /// Verifies a username/password pair against the directory.
    ///
    /// Returns the matching user on success and `None` on bad credentials;
    /// transport failures surface as errors.
    async fn verify_password(
        &self,
        username: &str,
        password: &str,
    ) -> AuthResult<Option<UserInfo>>;
}
