//! The token gateway adapter.
//!
//! A stateless façade translating internal authorize/token requests into
//! calls against the backend credential gateway's admin API. The gateway
//! is the component that actually mints, validates and revokes tokens;
//! this adapter enforces the policy around it: per-API grant enablement,
//! the auth-method allow-list, confidential/public client credential
//! rules, and refresh-token stripping for public single-page apps.
//!
//! The per-API OAuth2 configuration is cached process-wide; staleness is
//! acceptable for this metadata class and the TTL is a configuration
//! parameter (default: process lifetime).

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use portauth_core::{ApiInfo, ClientType, SubscriptionInfo};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};

use crate::AuthResult;
use crate::config::AuthEngineConfig;
use crate::error::AuthError;
use crate::oauth::{AccessToken, GrantType, ResponseType, TokenRequest, scope_string};
use crate::storage::Registry;

/// Internal authorize request handed to the gateway.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAuthRequest {
    /// The API to authorize for.
    pub api_id: String,
    /// The calling auth method (`<server-name>:<method-id>`).
    pub auth_method: String,
    /// OAuth2 client id.
    pub client_id: String,
    /// Response type.
    pub response_type: ResponseType,
    /// The validated redirect URI.
    pub redirect_uri: String,
    /// The scope to issue.
    pub scope: Vec<String>,
    /// Verbose authenticated user id.
    pub authenticated_userid: String,
}

/// Per-API OAuth2 configuration of the gateway plugin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct OAuth2Config {
    /// Whether the authorization code grant is enabled.
    pub enable_authorization_code: bool,
    /// Whether the implicit grant is enabled.
    pub enable_implicit_grant: bool,
    /// Whether the client credentials grant is enabled.
    pub enable_client_credentials: bool,
    /// Whether the password grant is enabled.
    pub enable_password_grant: bool,
}

/// Checks that the response type of an authorize request is enabled for
/// the API.
///
/// # Errors
///
/// Fails with `unauthorized_client` when the grant is disabled.
pub fn check_response_type_enabled(
    config: &OAuth2Config,
    response_type: ResponseType,
) -> Result<(), AuthError> {
    let enabled = match response_type {
        ResponseType::Code => config.enable_authorization_code,
        ResponseType::Token => config.enable_implicit_grant,
    };
    if enabled {
        Ok(())
    } else {
        Err(AuthError::oauth_with_status(
            401,
            crate::error::OAuthErrorCode::UnauthorizedClient,
            format!(
                "the '{}' response type is not enabled for this API",
                response_type.as_str()
            ),
        ))
    }
}

/// Checks that the grant type of a token request is enabled for the API.
///
/// The internal refresh rewrite for passthrough APIs sets
/// `accept_password_grant`; such requests bypass the enablement check by
/// design (they re-issue a token the gateway already granted).
///
/// # Errors
///
/// Fails with `unauthorized_client` when the grant is disabled.
pub fn check_grant_type_enabled(
    config: &OAuth2Config,
    request: &TokenRequest,
) -> Result<(), AuthError> {
    if request.accept_password_grant && request.grant_type == GrantType::Password {
        return Ok(());
    }
    let enabled = match request.grant_type {
        GrantType::AuthorizationCode => config.enable_authorization_code,
        GrantType::ClientCredentials => config.enable_client_credentials,
        GrantType::Password => config.enable_password_grant,
        // Refresh is implied by the grants that issue refresh tokens
        GrantType::RefreshToken => {
            config.enable_authorization_code || config.enable_password_grant
        }
    };
    if enabled {
        Ok(())
    } else {
        Err(AuthError::oauth_with_status(
            401,
            crate::error::OAuthErrorCode::UnauthorizedClient,
            format!(
                "the '{}' grant type is not enabled for this API",
                request.grant_type
            ),
        ))
    }
}

/// Enforces the confidential/public client credential rules for a token
/// request: confidential clients must present a secret, public clients
/// must not, and public clients must use PKCE for the authorization code
/// grant.
///
/// # Errors
///
/// Fails with `invalid_client` or `invalid_request`.
pub fn check_client_credentials(
    client_type: ClientType,
    request: &TokenRequest,
) -> Result<(), AuthError> {
    if client_type.is_confidential() {
        if request.client_secret.is_none() {
            return Err(AuthError::invalid_client(
                "confidential clients must present a client_secret",
            ));
        }
        return Ok(());
    }

    if request.client_secret.is_some() {
        return Err(AuthError::invalid_client(
            "public clients must not present a client_secret",
        ));
    }
    if request.grant_type == GrantType::AuthorizationCode && request.code_verifier.is_none() {
        return Err(AuthError::invalid_request(
            "public clients must present a code_verifier for the authorization code grant",
        ));
    }
    Ok(())
}

/// Strips the refresh token from an authorization-code response for
/// public single-page applications; a browser cannot keep it safe.
pub fn scrub_public_spa_refresh_token(
    client_type: ClientType,
    grant_type: GrantType,
    token: &mut AccessToken,
) {
    if client_type == ClientType::PublicSpa
        && grant_type == GrantType::AuthorizationCode
        && token.refresh_token.take().is_some()
    {
        debug!("Stripped refresh token from public SPA response");
    }
}

/// The token gateway interface.
#[async_trait]
pub trait TokenGateway: Send + Sync {
    /// Runs the gateway's authorize operation; returns the redirect URI
    /// carrying the issued code or token.
    async fn authorize(&self, request: &GatewayAuthRequest) -> AuthResult<String>;

    /// Runs the gateway's token operation.
    async fn token(&self, request: &TokenRequest) -> AuthResult<AccessToken>;

    /// Deletes issued tokens, by access token or by authenticated user id.
    async fn delete_tokens(
        &self,
        access_token: Option<&str>,
        authenticated_userid: Option<&str>,
    ) -> AuthResult<()>;
}

/// HTTP implementation of the gateway adapter, talking to the gateway's
/// admin API.
pub struct HttpTokenGateway {
    client: reqwest::Client,
    admin_url: String,
    registry: Arc<dyn Registry>,
    config: AuthEngineConfig,
    oauth2_configs: DashMap<String, (OAuth2Config, OffsetDateTime)>,
}

#[derive(Debug, Deserialize)]
struct AuthorizeReply {
    redirect_uri: String,
}

#[derive(Debug, Deserialize)]
struct ErrorReply {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl HttpTokenGateway {
    /// Creates an adapter against `admin_url`.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be constructed.
    pub fn new(
        admin_url: impl Into<String>,
        registry: Arc<dyn Registry>,
        config: AuthEngineConfig,
    ) -> AuthResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(
                config.external_call_timeout_ms,
            ))
            .build()
            .map_err(|e| AuthError::server_error(format!("gateway client setup failed: {e}")))?;
        Ok(Self {
            client,
            admin_url: admin_url.into().trim_end_matches('/').to_string(),
            registry,
            config,
            oauth2_configs: DashMap::new(),
        })
    }

    /// Resolves the subscription and API for a client, verifying the API
    /// match and the auth-method allow-list.
    async fn resolve(
        &self,
        client_id: &str,
        api_id: &str,
        auth_method: &str,
    ) -> AuthResult<(SubscriptionInfo, ApiInfo)> {
        let info = self
            .registry
            .get_subscription_by_client_id(client_id)
            .await?
            .ok_or_else(|| AuthError::invalid_request("unknown client_id"))?;
        if info.subscription.api != api_id {
            return Err(AuthError::unauthorized_client(format!(
                "client is not subscribed to API '{api_id}'"
            )));
        }
        let api = self
            .registry
            .get_api(api_id)
            .await?
            .ok_or_else(|| AuthError::invalid_request(format!("unknown API '{api_id}'")))?;
        if !api.allows_auth_method(auth_method) {
            // A server-side misconfiguration, not a client mistake
            return Err(AuthError::server_error(format!(
                "auth method '{auth_method}' is not allowed for API '{api_id}'"
            )));
        }
        Ok((info, api))
    }

    /// Loads the per-API OAuth2 configuration, from the process-wide cache
    /// when fresh.
    async fn oauth2_config(&self, api_id: &str) -> AuthResult<OAuth2Config> {
        if let Some(entry) = self.oauth2_configs.get(api_id) {
            let (config, fetched_at) = entry.value();
            let fresh = match self.config.metadata_cache_ttl_secs {
                Some(ttl) => {
                    OffsetDateTime::now_utc() - *fetched_at < Duration::seconds(ttl as i64)
                }
                None => true,
            };
            if fresh {
                return Ok(config.clone());
            }
        }

        let url = format!("{}/apis/{api_id}/oauth2", self.admin_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AuthError::server_error(format!("gateway config fetch failed: {e}")))?;
        if !response.status().is_success() {
            return Err(AuthError::server_error(format!(
                "gateway config fetch for API '{api_id}' returned {}",
                response.status()
            )));
        }
        let config: OAuth2Config = response
            .json()
            .await
            .map_err(|e| AuthError::server_error(format!("gateway config parse failed: {e}")))?;
        self.oauth2_configs
            .insert(api_id.to_string(), (config.clone(), OffsetDateTime::now_utc()));
        Ok(config)
    }

    /// Maps a non-2xx gateway reply into a failure.
    async fn reply_error(response: reqwest::Response) -> AuthError {
        let status = response.status().as_u16();
        match response.json::<ErrorReply>().await {
            Ok(reply) => {
                let message = reply
                    .error_description
                    .or(reply.error)
                    .unwrap_or_else(|| "gateway call failed".to_string());
                if status >= 500 {
                    AuthError::server_error(message)
                } else {
                    AuthError::oauth_with_status(
                        status,
                        crate::error::OAuthErrorCode::InvalidGrant,
                        message,
                    )
                }
            }
            Err(_) => AuthError::server_error(format!("gateway call returned {status}")),
        }
    }
}

#[async_trait]
impl TokenGateway for HttpTokenGateway {
    async fn authorize(&self, request: &GatewayAuthRequest) -> AuthResult<String> {
        let (info, _api) = self
            .resolve(&request.client_id, &request.api_id, &request.auth_method)
            .await?;
        let config = self.oauth2_config(&request.api_id).await?;
        check_response_type_enabled(&config, request.response_type)?;

        debug!(
            api_id = %request.api_id,
            client_id = %request.client_id,
            response_type = request.response_type.as_str(),
            "Delegating authorize to gateway"
        );
        let url = format!("{}/oauth2/authorize", self.admin_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "api_id": request.api_id,
                "client_id": request.client_id,
                "response_type": request.response_type.as_str(),
                "redirect_uri": request.redirect_uri,
                "scope": scope_string(&request.scope),
                "authenticated_userid": request.authenticated_userid,
                "provision_key_owner": info.application.id,
            }))
            .send()
            .await
            .map_err(|e| AuthError::server_error(format!("gateway authorize failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Self::reply_error(response).await);
        }
        let reply: AuthorizeReply = response
            .json()
            .await
            .map_err(|e| AuthError::server_error(format!("gateway authorize parse failed: {e}")))?;
        Ok(reply.redirect_uri)
    }

    async fn token(&self, request: &TokenRequest) -> AuthResult<AccessToken> {
        let (info, _api) = self
            .resolve(&request.client_id, &request.api_id, &request.auth_method)
            .await?;
        let config = self.oauth2_config(&request.api_id).await?;
        check_grant_type_enabled(&config, request)?;
        check_client_credentials(info.application.client_type, request)?;

        debug!(
            api_id = %request.api_id,
            client_id = %request.client_id,
            grant_type = %request.grant_type,
            "Delegating token request to gateway"
        );
        let url = format!("{}/oauth2/token", self.admin_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "api_id": request.api_id,
                "grant_type": request.grant_type.as_str(),
                "client_id": request.client_id,
                "client_secret": request.client_secret,
                "code": request.code,
                "refresh_token": request.refresh_token,
                "scope": scope_string(&request.scope),
                "authenticated_userid": request.authenticated_userid,
            }))
            .send()
            .await
            .map_err(|e| AuthError::server_error(format!("gateway token call failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Self::reply_error(response).await);
        }
        let mut token: AccessToken = response
            .json()
            .await
            .map_err(|e| AuthError::server_error(format!("gateway token parse failed: {e}")))?;

        scrub_public_spa_refresh_token(info.application.client_type, request.grant_type, &mut token);
        Ok(token)
    }

    async fn delete_tokens(
        &self,
        access_token: Option<&str>,
        authenticated_userid: Option<&str>,
    ) -> AuthResult<()> {
        let mut url = format!("{}/oauth2/tokens", self.admin_url);
        let mut sep = '?';
        if let Some(token) = access_token {
            url.push(sep);
            url.push_str("access_token=");
            url.push_str(token);
            sep = '&';
        }
        if let Some(userid) = authenticated_userid {
            url.push(sep);
            url.push_str("authenticated_userid=");
            url.push_str(userid);
        }

        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| AuthError::server_error(format!("gateway token delete failed: {e}")))?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "Gateway token delete returned non-success");
            return Err(AuthError::server_error(format!(
                "gateway token delete returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_request(grant_type: GrantType) -> TokenRequest {
        TokenRequest {
            api_id: "orders".to_string(),
            auth_method: "portauth:default".to_string(),
            grant_type,
            client_id: "client-1".to_string(),
            client_secret: None,
            code: None,
            code_verifier: None,
            refresh_token: None,
            scope: vec![],
            username: None,
            password: None,
            authenticated_userid: None,
            accept_password_grant: false,
        }
    }

    #[test]
    fn test_response_type_enablement() {
        let config = OAuth2Config {
            enable_authorization_code: true,
            ..OAuth2Config::default()
        };
        assert!(check_response_type_enabled(&config, ResponseType::Code).is_ok());
        let err = check_response_type_enabled(&config, ResponseType::Token).unwrap_err();
        assert_eq!(err.status(), 401);
        assert_eq!(
            err.oauth_error_code(),
            Some(crate::error::OAuthErrorCode::UnauthorizedClient)
        );
    }

    #[test]
    fn test_grant_type_enablement() {
        let config = OAuth2Config {
            enable_password_grant: true,
            ..OAuth2Config::default()
        };
        assert!(check_grant_type_enabled(&config, &token_request(GrantType::Password)).is_ok());
        assert!(
            check_grant_type_enabled(&config, &token_request(GrantType::ClientCredentials))
                .is_err()
        );
        // Refresh rides on password enablement
        assert!(
            check_grant_type_enabled(&config, &token_request(GrantType::RefreshToken)).is_ok()
        );
    }

    #[test]
    fn test_accept_password_grant_bypasses_enablement() {
        let config = OAuth2Config::default();
        let mut request = token_request(GrantType::Password);
        assert!(check_grant_type_enabled(&config, &request).is_err());
        request.accept_password_grant = true;
        assert!(check_grant_type_enabled(&config, &request).is_ok());
    }

    #[test]
    fn test_confidential_client_requires_secret() {
        let request = token_request(GrantType::ClientCredentials);
        let err = check_client_credentials(ClientType::Confidential, &request).unwrap_err();
        assert_eq!(err.status(), 401);

        let mut request = token_request(GrantType::ClientCredentials);
        request.client_secret = Some("s3cret".to_string());
        assert!(check_client_credentials(ClientType::Confidential, &request).is_ok());
    }

    #[test]
    fn test_public_client_rules() {
        // Public clients must not present a secret
        let mut request = token_request(GrantType::AuthorizationCode);
        request.client_secret = Some("s3cret".to_string());
        assert!(check_client_credentials(ClientType::PublicSpa, &request).is_err());

        // ... and must use PKCE for the authorization code grant
        let mut request = token_request(GrantType::AuthorizationCode);
        request.code = Some("abc".to_string());
        assert!(check_client_credentials(ClientType::PublicSpa, &request).is_err());
        request.code_verifier = Some("v".repeat(43));
        assert!(check_client_credentials(ClientType::PublicSpa, &request).is_ok());
    }

    #[test]
    fn test_spa_refresh_token_stripping() {
        let mut token = AccessToken::new("at-1", 3600).with_refresh_token("rt-1");
        scrub_public_spa_refresh_token(
            ClientType::PublicSpa,
            GrantType::AuthorizationCode,
            &mut token,
        );
        assert!(token.refresh_token.is_none());

        // Native clients keep their refresh token
        let mut token = AccessToken::new("at-1", 3600).with_refresh_token("rt-1");
        scrub_public_spa_refresh_token(
            ClientType::PublicNative,
            GrantType::AuthorizationCode,
            &mut token,
        );
        assert!(token.refresh_token.is_some());

        // SPA password-grant responses are untouched
        let mut token = AccessToken::new("at-1", 3600).with_refresh_token("rt-1");
        scrub_public_spa_refresh_token(ClientType::PublicSpa, GrantType::Password, &mut token);
        assert!(token.refresh_token.is_some());
    }
}
