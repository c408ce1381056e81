//! Issued-token bookkeeping records.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::api::ApiSettings;
use crate::profile::OidcProfile;

/// Bookkeeping record for an issued token pair.
///
/// Registered after every successful token issuance so the server can
/// re-validate refresh requests, answer profile lookups, and revoke tokens.
/// The stored profile is always the stripped variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    /// The issued access token.
    pub access_token: String,

    /// The issued refresh token, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// The API the token was issued for.
    pub api_id: String,

    /// The plan the subscription runs under.
    #[serde(default)]
    pub plan_id: String,

    /// The application the token was issued to.
    pub application_id: String,

    /// The auth method the token was issued through
    /// (`<server-name>:<method-id>`).
    pub auth_method: String,

    /// Verbose authenticated user id, absent for client-credentials tokens
    /// and passthrough APIs without user resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticated_userid: Option<String>,

    /// The issued scope.
    #[serde(default)]
    pub scope: Vec<String>,

    /// Absolute access token expiry.
    #[serde(with = "time::serde::rfc3339")]
    pub expires: OffsetDateTime,

    /// Absolute refresh token expiry, present iff a refresh token was issued.
    #[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub expires_refresh: Option<OffsetDateTime>,

    /// The stripped OIDC profile associated with the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<OidcProfile>,
}

impl TokenRecord {
    /// Computes absolute expiry timestamps from an API's token settings.
    #[must_use]
    pub fn expiry_from_settings(
        settings: &ApiSettings,
        has_refresh_token: bool,
    ) -> (OffsetDateTime, Option<OffsetDateTime>) {
        let now = OffsetDateTime::now_utc();
        let expires = now + Duration::seconds(settings.token_expiration as i64);
        let expires_refresh =
            has_refresh_token.then(|| now + Duration::seconds(settings.refresh_token_ttl as i64));
        (expires, expires_refresh)
    }

    /// Returns `true` if the access token has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() > self.expires
    }
}
