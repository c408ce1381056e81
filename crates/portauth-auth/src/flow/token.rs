//! The token endpoint.
//!
//! Dispatches `POST /{auth_method}/api/{api_id}/token` by grant type. The
//! gateway does the actual issuance; this layer resolves the stored
//! profile for code exchanges (including the PKCE check), authenticates
//! resource-owner credentials through the identity provider, and
//! re-validates refresh requests against the provider and the grant
//! store before letting them through.

use portauth_core::{AllowedScopesMode, ApiInfo, OidcProfile, SubscriptionInfo, TokenRecord};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::AuthResult;
use crate::error::AuthError;
use crate::flow::FlowEngine;
use crate::idp::parse_authenticated_userid;
use crate::oauth::{
    AccessToken, GrantType, PkceChallengeMethod, PkceVerifier, TokenRequest, TokenRequestForm,
    make_token_request, merge_group_scopes, pkce, scope_string, strip_group_scopes,
    validate_scopes, validate_token_request,
};

impl FlowEngine {
    /// Handles a token-endpoint call.
    pub async fn token(
        &self,
        auth_method_id: &str,
        api_id: &str,
        basic_auth: Option<(String, String)>,
        form: &TokenRequestForm,
    ) -> AuthResult<AccessToken> {
        let api = self.load_api(api_id, auth_method_id).await?;
        let auth_method_ref = self.config().auth_method_ref(auth_method_id);
        let request = make_token_request(api_id, auth_method_ref, basic_auth, form)?;
        validate_token_request(&request)?;

        debug!(
            api_id,
            client_id = %request.client_id,
            grant_type = %request.grant_type,
            "Token request"
        );
        match request.grant_type {
            GrantType::ClientCredentials => self.token_client_credentials(&api, request).await,
            GrantType::AuthorizationCode => self.token_authorization_code(&api, request).await,
            GrantType::Password => self.token_password(auth_method_id, &api, request).await,
            GrantType::RefreshToken => self.token_refresh(auth_method_id, &api, request).await,
        }
    }

    async fn subscription_for(&self, client_id: &str) -> AuthResult<SubscriptionInfo> {
        self.services()
            .registry
            .get_subscription_by_client_id(client_id)
            .await?
            .ok_or_else(|| AuthError::invalid_client("unknown client_id"))
    }

    async fn token_client_credentials(
        &self,
        api: &ApiInfo,
        mut request: TokenRequest,
    ) -> AuthResult<AccessToken> {
        let info = self.subscription_for(&request.client_id).await?;
        let validated = validate_scopes(api, &request.scope, &info.subscription)?;
        request.scope.clone_from(&validated.validated_scopes);

        let mut token = self.services().gateway.token(&request).await?;
        if validated.scope_differs {
            token.scope = Some(scope_string(&validated.validated_scopes));
        }
        self.register_token(api, &info, &request, &token, None, validated.validated_scopes)
            .await?;
        Ok(token)
    }

    async fn token_authorization_code(
        &self,
        api: &ApiInfo,
        mut request: TokenRequest,
    ) -> AuthResult<AccessToken> {
        let code = request
            .code
            .clone()
            .ok_or_else(|| AuthError::invalid_request("code is missing"))?;
        let profile = self
            .services()
            .profiles
            .retrieve(&code)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("unknown or expired authorization code"))?;

        if let Some(challenge) = &profile.code_challenge {
            let verifier = request.code_verifier.clone().ok_or_else(|| {
                AuthError::invalid_request("code_verifier is required for this code")
            })?;
            let verifier = PkceVerifier::new(verifier)
                .map_err(|e| AuthError::invalid_request(e.to_string()))?;
            let method = profile
                .code_challenge_method
                .as_deref()
                .map(PkceChallengeMethod::parse)
                .transpose()
                .map_err(|e| AuthError::invalid_grant(e.to_string()))?
                .unwrap_or_default();
            pkce::verify(challenge, method, &verifier)
                .map_err(|e| AuthError::invalid_grant(e.to_string()))?;
        }

        request
            .authenticated_userid
            .clone_from(&profile.authenticated_userid);
        let info = self.subscription_for(&request.client_id).await?;
        let issued_scope = profile.authenticated_scope.clone().unwrap_or_default();

        let mut token = self.services().gateway.token(&request).await?;
        if profile.scope_differs == Some(true) {
            token.scope = Some(scope_string(&issued_scope));
        }

        // The profile moves from the code key to the access token key
        self.services()
            .profiles
            .store(&token.access_token, &profile.stripped(), api.settings.token_expiration)
            .await?;
        self.services().profiles.delete(&code).await?;
        self.register_token(
            api,
            &info,
            &request,
            &token,
            Some(profile.stripped()),
            issued_scope,
        )
        .await?;
        Ok(token)
    }

    async fn token_password(
        &self,
        auth_method_id: &str,
        api: &ApiInfo,
        mut request: TokenRequest,
    ) -> AuthResult<AccessToken> {
        let info = self.subscription_for(&request.client_id).await?;
        if !info.subscription.trusted && !api.passthrough_users {
            return Err(AuthError::unauthorized_client(
                "the password grant requires a trusted subscription",
            ));
        }

        let mut profile = None;
        if request.accept_password_grant {
            // Internal refresh rewrite; identity and scope are already set.
        } else {
            let provider = self.provider(auth_method_id)?;
            let username = request
                .username
                .clone()
                .ok_or_else(|| AuthError::invalid_request("username is missing"))?;
            let password = request
                .password
                .clone()
                .ok_or_else(|| AuthError::invalid_request("password is missing"))?;
            let mut response = match provider.authorize_by_user_pass(&username, &password).await {
                Ok(response) => response,
                Err(e) => {
                    tokio::time::sleep(std::time::Duration::from_millis(
                        self.config().login_failure_delay_ms,
                    ))
                    .await;
                    return Err(e);
                }
            };

            let validated = validate_scopes(api, &request.scope, &info.subscription)?;
            let mut scope = validated.validated_scopes;

            let mut user_profile = response.default_profile.clone();
            if api.passthrough_users {
                let upstream_id = response
                    .custom_id
                    .clone()
                    .unwrap_or_else(|| user_profile.sub.clone());
                request.authenticated_userid = Some(format!("sub={upstream_id}"));
            } else {
                let user = self.resolve_user(&mut response).await?;
                user_profile.sub.clone_from(&user.id);
                request.authenticated_userid = Some(format!("sub={}", user.id));
                scope = merge_group_scopes(&scope, &user.groups);
            }

            if let Some(url) = &api.passthrough_scope_url {
                let outcome = self
                    .passthrough_scope(url, &scope, &request.auth_method, &user_profile)
                    .await?;
                scope = outcome.scope;
                if let Some(userid) = outcome.authenticated_userid {
                    // The webhook owns the identity for passthrough APIs
                    user_profile.sub.clone_from(&userid);
                    request.authenticated_userid = Some(userid);
                }
            }
            request.scope = scope;
            profile = Some(user_profile);
        }

        let issued_scope = request.scope.clone();
        let mut token = self.services().gateway.token(&request).await?;
        if token.scope.is_none() && !issued_scope.is_empty() {
            token.scope = Some(scope_string(&issued_scope));
        }

        let stored_profile = profile.map(|mut p| {
            p.authenticated_userid
                .clone_from(&request.authenticated_userid);
            p.authenticated_scope = Some(issued_scope.clone());
            p.stripped()
        });
        if let Some(p) = &stored_profile {
            self.services()
                .profiles
                .store(&token.access_token, p, api.settings.token_expiration)
                .await?;
        }
        self.register_token(api, &info, &request, &token, stored_profile, issued_scope)
            .await?;
        Ok(token)
    }

    async fn token_refresh(
        &self,
        auth_method_id: &str,
        api: &ApiInfo,
        request: TokenRequest,
    ) -> AuthResult<AccessToken> {
        let refresh_token = request
            .refresh_token
            .clone()
            .ok_or_else(|| AuthError::invalid_request("refresh_token is missing"))?;
        let mut records = self
            .services()
            .tokens
            .get_by_refresh_token(&refresh_token)
            .await?;
        // A refresh is only valid when exactly one record matches
        if records.len() != 1 {
            warn!(
                matches = records.len(),
                "Refresh token lookup did not yield exactly one record"
            );
            return Err(AuthError::invalid_grant("unknown refresh token"));
        }
        let record = records.remove(0);
        if record.api_id != api.id {
            return Err(AuthError::invalid_grant(
                "refresh token was not issued for this API",
            ));
        }
        if let Some(expires_refresh) = record.expires_refresh {
            if OffsetDateTime::now_utc() >= expires_refresh {
                return Err(AuthError::invalid_grant("refresh token has expired"));
            }
        }
        let info = self.subscription_for(&request.client_id).await?;
        if info.application.id != record.application_id {
            return Err(AuthError::invalid_grant(
                "refresh token belongs to a different application",
            ));
        }

        let token = if api.passthrough_users {
            self.refresh_passthrough(api, &request, &record).await?
        } else {
            self.refresh_local(auth_method_id, api, &info, &request, &record)
                .await?
        };

        // New bookkeeping, then best-effort cleanup of the superseded token
        let new_refresh = token
            .refresh_token
            .clone()
            .or_else(|| Some(refresh_token.clone()));
        let (expires, expires_refresh) =
            TokenRecord::expiry_from_settings(&api.settings, new_refresh.is_some());
        self.services()
            .tokens
            .register(TokenRecord {
                access_token: token.access_token.clone(),
                refresh_token: new_refresh,
                api_id: api.id.clone(),
                plan_id: record.plan_id.clone(),
                application_id: record.application_id.clone(),
                auth_method: record.auth_method.clone(),
                authenticated_userid: record.authenticated_userid.clone(),
                scope: record.scope.clone(),
                expires,
                expires_refresh,
                profile: record.profile.clone(),
            })
            .await?;
        if let Some(profile) = &record.profile {
            self.services()
                .profiles
                .store(&token.access_token, profile, api.settings.token_expiration)
                .await?;
        }

        let tokens = self.services().tokens.clone();
        let profiles = self.services().profiles.clone();
        let old_access_token = record.access_token.clone();
        tokio::spawn(async move {
            // Fire and forget; a failed delete leaves a dead record behind
            if let Err(e) = tokens.delete_by_access_token(&old_access_token).await {
                warn!(error = %e, "Superseded token record cleanup failed");
            }
            if let Err(e) = profiles.delete(&old_access_token).await {
                warn!(error = %e, "Superseded profile cleanup failed");
            }
        });

        info!(api_id = %api.id, client_id = %request.client_id, "Refresh finished");
        Ok(token)
    }

    /// Passthrough refresh: re-run the scope webhook, then re-issue through
    /// a password-shaped gateway request carrying the recorded identity.
    async fn refresh_passthrough(
        &self,
        api: &ApiInfo,
        request: &TokenRequest,
        record: &TokenRecord,
    ) -> AuthResult<AccessToken> {
        let url = api
            .passthrough_scope_url
            .as_deref()
            .ok_or_else(|| AuthError::server_error("passthrough API without a scope URL"))?;
        let profile = record.profile.clone().unwrap_or_else(|| {
            OidcProfile::new(
                record
                    .authenticated_userid
                    .as_deref()
                    .and_then(parse_authenticated_userid)
                    .map(|(sub, _)| sub)
                    .unwrap_or_default(),
            )
        });
        let scope = strip_group_scopes(&record.scope);
        let outcome = self
            .passthrough_scope(url, &scope, &request.auth_method, &profile)
            .await?;
        let authenticated_userid = outcome
            .authenticated_userid
            .or_else(|| record.authenticated_userid.clone());

        let rewritten = TokenRequest {
            grant_type: GrantType::Password,
            code: None,
            code_verifier: None,
            refresh_token: None,
            username: None,
            password: None,
            scope: outcome.scope,
            authenticated_userid,
            accept_password_grant: true,
            ..request.clone()
        };
        self.services().gateway.token(&rewritten).await
    }

    /// Local refresh: the provider gets a veto, then non-trusted clients
    /// are re-checked against the grant store. A revoked grant fails the
    /// refresh; it never narrows the scope.
    async fn refresh_local(
        &self,
        auth_method_id: &str,
        api: &ApiInfo,
        info: &SubscriptionInfo,
        request: &TokenRequest,
        record: &TokenRecord,
    ) -> AuthResult<AccessToken> {
        let provider = self.provider(auth_method_id)?;
        match provider.check_refresh_token(record, api).await? {
            crate::idp::RefreshDecision::Allow => {}
            crate::idp::RefreshDecision::Deny(reason) => {
                info!(api_id = %api.id, reason, "Provider denied the refresh");
                return Err(AuthError::invalid_grant(reason));
            }
        }

        if !info.subscription.trusted {
            let user_id = record
                .authenticated_userid
                .as_deref()
                .and_then(parse_authenticated_userid)
                .map(|(sub, _)| sub)
                .ok_or_else(|| {
                    AuthError::invalid_grant("refresh token carries no user identity")
                })?;
            let granted_scope = strip_group_scopes(&record.scope);
            if !granted_scope.is_empty() {
                let grant = self
                    .services()
                    .grants
                    .get_grant(&user_id, &record.application_id, &api.id)
                    .await?;
                let missing = match grant {
                    Some(grant) => grant.missing_scopes(&granted_scope),
                    None => granted_scope.clone(),
                };
                if !missing.is_empty() {
                    return Err(AuthError::unauthorized_client(
                        "a previously granted scope has been revoked",
                    ));
                }
                // The subscription's scope policy may have been narrowed
                // since the token was issued
                match info.subscription.allowed_scopes_mode {
                    AllowedScopesMode::All => {}
                    AllowedScopesMode::None => {
                        return Err(AuthError::unauthorized_client(
                            "the application is no longer allowed any scopes",
                        ));
                    }
                    AllowedScopesMode::Select => {
                        if let Some(scope) = granted_scope
                            .iter()
                            .find(|s| !info.subscription.allowed_scopes.contains(s))
                        {
                            return Err(AuthError::unauthorized_client(format!(
                                "scope '{scope}' is no longer allowed for this application"
                            )));
                        }
                    }
                }
            }
        }
        self.services().gateway.token(request).await
    }

    async fn register_token(
        &self,
        api: &ApiInfo,
        info: &SubscriptionInfo,
        request: &TokenRequest,
        token: &AccessToken,
        profile: Option<OidcProfile>,
        scope: Vec<String>,
    ) -> AuthResult<()> {
        let (expires, expires_refresh) =
            TokenRecord::expiry_from_settings(&api.settings, token.refresh_token.is_some());
        self.services()
            .tokens
            .register(TokenRecord {
                access_token: token.access_token.clone(),
                refresh_token: token.refresh_token.clone(),
                api_id: api.id.clone(),
                plan_id: info.subscription.plan.clone(),
                application_id: info.application.id.clone(),
                auth_method: request.auth_method.clone(),
                authenticated_userid: request.authenticated_userid.clone(),
                scope,
                expires,
                expires_refresh,
                profile,
            })
            .await
    }
}
