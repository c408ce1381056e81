//! Verification service trait.

use async_trait::async_trait;

use crate::AuthResult;

/// Interface to the email-verification delivery service.
///
/// Requests are fired asynchronously after creating a user with an
/// unverified email; a failure here is logged and never fails the login.
#[async_trait]
pub trait VerificationService: Send + Sync {
    /// Requests an email verification for the given user.
    async fn request_email_verification(&self, user_id: &str, email: &str) -> AuthResult<()>;
}
