//! Token-record store trait.

use async_trait::async_trait;
use portauth_core::TokenRecord;

use crate::AuthResult;

/// Interface to the token bookkeeping registry.
#[async_trait]
pub trait TokenRecordStore: Send + Sync {
    /// Registers an issued token record.
    async fn register(&self, record: TokenRecord) -> AuthResult<()>;

    /// Looks up token records by refresh token. A refresh is only valid
    /// when exactly one record matches.
    async fn get_by_refresh_token(&self, refresh_token: &str) -> AuthResult<Vec<TokenRecord>>;

    /// Looks up the token record for an access token.
    async fn get_by_access_token(&self, access_token: &str) -> AuthResult<Option<TokenRecord>>;

    /// Deletes the record for an access token. Used for best-effort
    /// cleanup of superseded tokens.
    async fn delete_by_access_token(&self, access_token: &str) -> AuthResult<()>;
}
