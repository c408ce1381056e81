//! The interactive authorize flow.
//!
//! Entry point is [`FlowEngine::authorize`]; every form submission
//! (login, registration, namespace choice, consent) re-enters through its
//! own method and converges on [`FlowEngine::continue_authorize`], which
//! walks the remaining steps: user resolution, registration, scope
//! authorization, token issuance. The walk is restartable; a step that
//! needs user input returns a `Render` action and the next submission
//! picks up from the stored session.

use std::collections::BTreeMap;

use portauth_core::{
    ApiInfo, OidcProfile, Registration, RegistrationPool, TokenRecord, UserInfo,
};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::AuthResult;
use crate::error::AuthError;
use crate::flow::FlowEngine;
use crate::gateway::GatewayAuthRequest;
use crate::idp::{AuthResponse, UiAction};
use crate::oauth::{
    AuthRequest, AuthorizeQuery, ResponseType, merge_group_scopes, scope_string,
    validate_authorize_request,
};
use crate::profile::extract_token_or_code;
use crate::session::{GrantData, SessionState, generate_nonce};

impl FlowEngine {
    /// Handles `GET /{auth_method}/api/{api_id}/authorize`.
    ///
    /// Validates the request, applies the OIDC `prompt` parameter, and
    /// either continues a previously authenticated session or hands off to
    /// the identity provider.
    pub async fn authorize(
        &self,
        auth_method_id: &str,
        api_id: &str,
        query: &AuthorizeQuery,
        session: &mut SessionState,
    ) -> AuthResult<UiAction> {
        let api = self.load_api(api_id, auth_method_id).await?;
        let provider = self.provider(auth_method_id)?;

        let client_id = query
            .client_id
            .as_deref()
            .ok_or_else(|| AuthError::invalid_request("client_id is missing"))?;
        let subscription_info = self
            .services()
            .registry
            .get_subscription_by_client_id(client_id)
            .await?
            .ok_or_else(|| AuthError::invalid_request("unknown client_id"))?;
        let request = validate_authorize_request(&api, &subscription_info, query)?;

        debug!(
            api_id,
            client_id,
            response_type = request.response_type.as_str(),
            "Starting authorization"
        );
        session.auth_request = Some(request.clone());

        match request.prompt.as_deref() {
            Some("none") if !provider.supports_prompt() => {
                if !session.is_authenticated() {
                    return Err(AuthError::login_required(
                        "prompt=none but no session is established",
                    )
                    .with_redirect(&request.redirect_uri));
                }
            }
            Some("login") => {
                // Force re-authentication
                session.auth_response = None;
            }
            Some("none") | None => {}
            Some(other) => {
                warn!(prompt = other, "Ignoring unknown prompt value");
            }
        }

        if session.is_authenticated() {
            return self.continue_authorize(auth_method_id, session).await;
        }
        match provider.authorize_with_ui(&request).await? {
            UiAction::Authenticated(response) => {
                session.auth_response = Some(*response);
                self.continue_authorize(auth_method_id, session).await
            }
            action => Ok(action),
        }
    }

    /// Handles a headless `GET /{auth_method}/login` request: a plain
    /// login that redirects back to an internal URI and skips
    /// registration, scope handling and the token gateway.
    pub async fn plain_login(
        &self,
        auth_method_id: &str,
        redirect_uri: &str,
        prefill_username: Option<String>,
        session: &mut SessionState,
    ) -> AuthResult<UiAction> {
        let provider = self.provider(auth_method_id)?;
        let request = AuthRequest {
            api_id: String::new(),
            client_id: String::new(),
            response_type: ResponseType::Code,
            redirect_uri: redirect_uri.to_string(),
            state: None,
            requested_scope: Vec::new(),
            validated_scope: Vec::new(),
            scope_differs: false,
            namespace: None,
            prompt: None,
            code_challenge: None,
            code_challenge_method: None,
            trusted: false,
            plain: true,
            prefill_username,
        };
        session.auth_request = Some(request.clone());

        if session.is_authenticated() {
            return self.continue_authorize(auth_method_id, session).await;
        }
        provider.authorize_with_ui(&request).await
    }

    /// Handles a login form submission.
    ///
    /// Failures are reported only after the configured delay, so timing
    /// does not reveal whether the username exists.
    pub async fn login(
        &self,
        auth_method_id: &str,
        username: &str,
        password: &str,
        session: &mut SessionState,
    ) -> AuthResult<UiAction> {
        let provider = self.provider(auth_method_id)?;
        match provider.authorize_by_user_pass(username, password).await {
            Ok(response) => {
                session.auth_response = Some(response);
                self.continue_authorize(auth_method_id, session).await
            }
            Err(e) => {
                tokio::time::sleep(std::time::Duration::from_millis(
                    self.config().login_failure_delay_ms,
                ))
                .await;
                Err(e)
            }
        }
    }

    /// Handles a registration form submission.
    pub async fn submit_registration(
        &self,
        auth_method_id: &str,
        nonce: &str,
        properties: BTreeMap<String, Value>,
        session: &mut SessionState,
    ) -> AuthResult<UiAction> {
        self.check_nonce(nonce, session)?;
        let request = pending_request(session)?;
        let response = pending_response(session)?;
        let user_id = response
            .user_id
            .clone()
            .ok_or_else(|| AuthError::server_error("registration without a resolved user"))?;

        let api = self.load_api(&request.api_id, auth_method_id).await?;
        let pool = self.registration_pool(&api).await?;
        if pool.disable_register {
            return Err(AuthError::ui(403, "Registration is not allowed for this API"));
        }
        if pool.requires_namespace && request.namespace.is_none() {
            return Err(AuthError::ui(400, "A namespace is required to register"));
        }
        for property in pool.properties.iter().filter(|p| p.required) {
            let missing = !matches!(
                properties.get(&property.name),
                Some(Value::String(s)) if !s.is_empty()
            );
            if missing {
                return Err(AuthError::ui(
                    400,
                    format!("The field '{}' is required", property.name),
                ));
            }
        }

        self.services()
            .registry
            .upsert_registration(Registration {
                pool_id: pool.id.clone(),
                user_id,
                namespace: request.namespace.clone(),
                properties,
            })
            .await?;
        session.registration_nonce = None;
        self.continue_authorize(auth_method_id, session).await
    }

    /// Handles a namespace selection form submission.
    pub async fn select_namespace(
        &self,
        auth_method_id: &str,
        nonce: &str,
        namespace: &str,
        session: &mut SessionState,
    ) -> AuthResult<UiAction> {
        self.check_nonce(nonce, session)?;
        let request = session
            .auth_request
            .as_mut()
            .ok_or_else(|| AuthError::server_error("no pending authorization"))?;
        request.namespace = Some(namespace.to_string());
        session.registration_nonce = None;
        self.continue_authorize(auth_method_id, session).await
    }

    /// Handles a consent decision.
    pub async fn decide_grant(
        &self,
        auth_method_id: &str,
        nonce: &str,
        allow: bool,
        session: &mut SessionState,
    ) -> AuthResult<UiAction> {
        self.check_nonce(nonce, session)?;
        let request = pending_request(session)?;
        let response = pending_response(session)?;
        let grant_data = session
            .grant_data
            .take()
            .ok_or_else(|| AuthError::server_error("no pending consent"))?;
        session.registration_nonce = None;

        if !allow {
            info!(api_id = %request.api_id, "User denied the scope grant");
            session.auth_request = None;
            return Err(
                AuthError::access_denied("the user denied the requested scope")
                    .with_redirect(&request.redirect_uri),
            );
        }

        let user_id = response
            .user_id
            .clone()
            .ok_or_else(|| AuthError::server_error("consent without a resolved user"))?;
        let subscription_info = self
            .services()
            .registry
            .get_subscription_by_client_id(&request.client_id)
            .await?
            .ok_or_else(|| AuthError::invalid_request("unknown client_id"))?;

        let mut grant = self
            .services()
            .grants
            .get_grant(&user_id, &subscription_info.application.id, &request.api_id)
            .await?
            .unwrap_or_else(|| {
                portauth_core::Grant::new(
                    &user_id,
                    &subscription_info.application.id,
                    &request.api_id,
                )
            });
        grant.add_scopes(&grant_data.missing_grants);
        self.services().grants.put_grant(grant).await?;

        self.continue_authorize(auth_method_id, session).await
    }

    /// Re-enters the flow after authentication or a form submission and
    /// walks the remaining steps.
    pub async fn continue_authorize(
        &self,
        auth_method_id: &str,
        session: &mut SessionState,
    ) -> AuthResult<UiAction> {
        let request = pending_request(session)?;

        // A plain login never talks to the gateway; just send the user back.
        if request.plain {
            let location = request.redirect_uri;
            session.auth_request = None;
            return Ok(UiAction::Redirect { location });
        }

        let redirect_uri = request.redirect_uri.clone();
        // The redirect URI is validated; protocol errors past this point go
        // back to the client as error redirects (RFC 6749 section 4.1.2.1).
        match self.continue_authorize_inner(auth_method_id, request, session).await {
            Ok(action) => Ok(action),
            Err(e @ AuthError::OAuth { .. }) => Err(e.with_redirect(redirect_uri)),
            Err(e) => Err(e),
        }
    }

    async fn continue_authorize_inner(
        &self,
        auth_method_id: &str,
        mut request: AuthRequest,
        session: &mut SessionState,
    ) -> AuthResult<UiAction> {
        let api = self.load_api(&request.api_id, auth_method_id).await?;
        let mut response = pending_response(session)?;

        let mut profile = response.default_profile.clone();
        let mut authenticated_userid;
        let mut groups = Vec::new();

        if api.passthrough_users {
            // No local user record; identity is whatever the provider said.
            let upstream_id = response
                .custom_id
                .clone()
                .unwrap_or_else(|| profile.sub.clone());
            authenticated_userid = format!("sub={upstream_id}");
        } else {
            let user = self.resolve_user(&mut response).await?;
            session.auth_response = Some(response.clone());
            groups.clone_from(&user.groups);
            profile.sub.clone_from(&user.id);

            if api.registration_pool.is_some() {
                match self
                    .registration_step(&api, &mut request, &user, &mut profile, session)
                    .await?
                {
                    Some(action) => return Ok(action),
                    None => {
                        // The namespace may have been auto-selected
                        session.auth_request = Some(request.clone());
                    }
                }
            }

            authenticated_userid = match &request.namespace {
                Some(ns) => format!("sub={};namespace={ns}", user.id),
                None => format!("sub={}", user.id),
            };
        }

        let auth_method_ref = self.config().auth_method_ref(auth_method_id);
        let mut validated_scope = request.validated_scope.clone();

        if let Some(url) = &api.passthrough_scope_url {
            let outcome = self
                .passthrough_scope(url, &validated_scope, &auth_method_ref, &profile)
                .await?;
            validated_scope = outcome.scope;
            if let Some(userid) = outcome.authenticated_userid {
                // The webhook owns the identity; the verbose id it returns
                // supersedes the locally computed one, sub included
                profile.sub.clone_from(&userid);
                authenticated_userid = userid;
            }
        } else if !request.trusted && !validated_scope.is_empty() {
            if let Some(action) = self
                .consent_step(&request, &response, &validated_scope, session)
                .await?
            {
                return Ok(action);
            }
        }

        response.profile = Some(profile.clone());
        session.auth_response = Some(response);
        self.issue_tokens(
            &api,
            &request,
            &auth_method_ref,
            authenticated_userid,
            validated_scope,
            &groups,
            profile,
            session,
        )
        .await
    }

    /// Resolves or creates the local user for an authentication outcome and
    /// reconciles default groups.
    pub(crate) async fn resolve_user(&self, response: &mut AuthResponse) -> AuthResult<UserInfo> {
        let users = &self.services().users;
        let found = if let Some(user_id) = &response.user_id {
            users.get_user(user_id).await?
        } else if let Some(custom_id) = &response.custom_id {
            users.get_user_by_custom_id(custom_id).await?
        } else if let Some(email) = &response.default_profile.email {
            users.get_user_by_email(email).await?
        } else {
            None
        };

        let mut user = match found {
            Some(user) => user,
            None => {
                let mut user = UserInfo::new(
                    response.default_profile.email.clone(),
                    response.custom_id.clone(),
                );
                user.email_verified = response.default_profile.email_verified.unwrap_or(false);
                user.groups.clone_from(&response.groups);
                let user = users.create_user(user).await?;
                info!(user_id = %user.id, "Created user on first login");

                if let (Some(email), false) = (&user.email, user.email_verified) {
                    // Fire and forget; a delivery failure never fails the login
                    let verifications = self.services().verifications.clone();
                    let user_id = user.id.clone();
                    let email = email.clone();
                    tokio::spawn(async move {
                        if let Err(e) = verifications
                            .request_email_verification(&user_id, &email)
                            .await
                        {
                            warn!(user_id, error = %e, "Email verification request failed");
                        }
                    });
                }
                user
            }
        };

        if user.add_missing_groups(&response.default_groups) {
            self.services()
                .users
                .patch_user_groups(&user.id, &user.groups)
                .await?;
        }
        response.user_id = Some(user.id.clone());
        for group in &user.groups {
            if !response.groups.contains(group) {
                response.groups.push(group.clone());
            }
        }
        user.groups.clone_from(&response.groups);
        Ok(user)
    }

    async fn registration_pool(&self, api: &ApiInfo) -> AuthResult<RegistrationPool> {
        let pool_id = api
            .registration_pool
            .as_deref()
            .ok_or_else(|| AuthError::server_error("API has no registration pool"))?;
        self.services()
            .registry
            .get_pool(pool_id)
            .await?
            .ok_or_else(|| {
                AuthError::server_error(format!("unknown registration pool '{pool_id}'"))
            })
    }

    /// Runs the registration step. Returns an action when user input is
    /// needed; on `None`, the matched registration's claims have been
    /// merged into `profile` and the flow may proceed.
    async fn registration_step(
        &self,
        api: &ApiInfo,
        request: &mut AuthRequest,
        user: &UserInfo,
        profile: &mut OidcProfile,
        session: &mut SessionState,
    ) -> AuthResult<Option<UiAction>> {
        let pool = self.registration_pool(api).await?;
        let registrations = self
            .services()
            .registry
            .get_registrations(&pool.id, &user.id)
            .await?;

        let registration = if pool.requires_namespace {
            match &request.namespace {
                Some(ns) => registrations.iter().find(|r| r.namespace.as_deref() == Some(ns)),
                None => match registrations.as_slice() {
                    [] => {
                        return Err(AuthError::ui(
                            400,
                            "You are not registered in any namespace for this API",
                        ));
                    }
                    [only] => {
                        request.namespace.clone_from(&only.namespace);
                        Some(only)
                    }
                    many => {
                        let nonce = generate_nonce();
                        session.registration_nonce = Some(nonce.clone());
                        let namespaces: Vec<&str> = many
                            .iter()
                            .filter_map(|r| r.namespace.as_deref())
                            .collect();
                        return Ok(Some(UiAction::Render {
                            template: "select_namespace".to_string(),
                            view: json!({
                                "nonce": nonce,
                                "namespaces": namespaces,
                                "apiId": api.id,
                            }),
                        }));
                    }
                },
            }
        } else {
            registrations.first()
        };

        match registration {
            Some(registration) => {
                apply_registration_claims(profile, &pool, registration);
                Ok(None)
            }
            None => {
                if pool.disable_register {
                    return Err(AuthError::ui(
                        403,
                        "Registration is not allowed for this API",
                    ));
                }
                let nonce = generate_nonce();
                session.registration_nonce = Some(nonce.clone());
                let fields: Vec<Value> = pool
                    .properties
                    .iter()
                    .map(|p| {
                        let prefill = p
                            .oidc_claim
                            .as_deref()
                            .and_then(|c| claim_value(profile, c));
                        json!({
                            "name": p.name,
                            "required": p.required,
                            "prefill": prefill,
                        })
                    })
                    .collect();
                Ok(Some(UiAction::Render {
                    template: "register".to_string(),
                    view: json!({
                        "nonce": nonce,
                        "poolId": pool.id,
                        "apiId": api.id,
                        "namespace": request.namespace,
                        "fields": fields,
                    }),
                }))
            }
        }
    }

    /// Runs the consent step for non-trusted subscriptions. Returns the
    /// grant screen when scopes are missing from the stored grant record.
    async fn consent_step(
        &self,
        request: &AuthRequest,
        response: &AuthResponse,
        validated_scope: &[String],
        session: &mut SessionState,
    ) -> AuthResult<Option<UiAction>> {
        let user_id = response
            .user_id
            .as_deref()
            .ok_or_else(|| AuthError::server_error("consent check without a resolved user"))?;
        let subscription_info = self
            .services()
            .registry
            .get_subscription_by_client_id(&request.client_id)
            .await?
            .ok_or_else(|| AuthError::invalid_request("unknown client_id"))?;

        let grant = self
            .services()
            .grants
            .get_grant(user_id, &subscription_info.application.id, &request.api_id)
            .await?;
        let missing = match &grant {
            Some(grant) => grant.missing_scopes(validated_scope),
            None => validated_scope.to_vec(),
        };
        if missing.is_empty() {
            return Ok(None);
        }

        let existing = grant.map(|g| g.scope_names()).unwrap_or_default();
        let nonce = generate_nonce();
        session.registration_nonce = Some(nonce.clone());
        session.grant_data = Some(GrantData {
            missing_grants: missing.clone(),
            existing_grants: existing.clone(),
        });
        Ok(Some(UiAction::Render {
            template: "grant".to_string(),
            view: json!({
                "nonce": nonce,
                "apiId": request.api_id,
                "applicationName": subscription_info.application.display_name(),
                "missingGrants": missing,
                "existingGrants": existing,
            }),
        }))
    }

    /// The final step: delegate to the gateway, persist the profile under
    /// the issued code or token, and build the client redirect.
    #[allow(clippy::too_many_arguments)]
    async fn issue_tokens(
        &self,
        api: &ApiInfo,
        request: &AuthRequest,
        auth_method_ref: &str,
        authenticated_userid: String,
        validated_scope: Vec<String>,
        groups: &[String],
        mut profile: OidcProfile,
        session: &mut SessionState,
    ) -> AuthResult<UiAction> {
        let scope = merge_group_scopes(&validated_scope, groups);

        let location = self
            .services()
            .gateway
            .authorize(&GatewayAuthRequest {
                api_id: api.id.clone(),
                auth_method: auth_method_ref.to_string(),
                client_id: request.client_id.clone(),
                response_type: request.response_type,
                redirect_uri: request.redirect_uri.clone(),
                scope: scope.clone(),
                authenticated_userid: authenticated_userid.clone(),
            })
            .await?;

        profile.authenticated_userid = Some(authenticated_userid.clone());
        profile.authenticated_scope = Some(scope.clone());
        if request.scope_differs {
            profile.scope_differs = Some(true);
        }
        profile.code_challenge.clone_from(&request.code_challenge);
        profile
            .code_challenge_method
            .clone_from(&request.code_challenge_method);

        if let Some(key) = extract_token_or_code(&location) {
            self.services()
                .profiles
                .store(&key, &profile, api.settings.token_expiration)
                .await?;
            if request.response_type == ResponseType::Token {
                // The implicit grant issues the access token right here
                let (expires, expires_refresh) =
                    TokenRecord::expiry_from_settings(&api.settings, false);
                let subscription_info = self
                    .services()
                    .registry
                    .get_subscription_by_client_id(&request.client_id)
                    .await?
                    .ok_or_else(|| AuthError::invalid_request("unknown client_id"))?;
                self.services()
                    .tokens
                    .register(TokenRecord {
                        access_token: key,
                        refresh_token: None,
                        api_id: api.id.clone(),
                        plan_id: subscription_info.subscription.plan.clone(),
                        application_id: subscription_info.application.id.clone(),
                        auth_method: auth_method_ref.to_string(),
                        authenticated_userid: Some(authenticated_userid),
                        scope: scope.clone(),
                        expires,
                        expires_refresh,
                        profile: Some(profile.stripped()),
                    })
                    .await?;
            }
        } else {
            warn!(api_id = %api.id, "Gateway redirect carries neither code nor token");
        }

        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(state) = &request.state {
            params.push(("state", state.clone()));
        }
        if let Some(namespace) = &request.namespace {
            params.push(("namespace", namespace.clone()));
        }
        if request.response_type == ResponseType::Token && request.scope_differs {
            params.push(("scope", scope_string(&scope)));
        }
        let location = append_redirect_params(&location, request.response_type, &params)?;

        info!(
            api_id = %api.id,
            client_id = %request.client_id,
            response_type = request.response_type.as_str(),
            "Authorization finished"
        );
        // The session survives for single sign-on; only the request is done.
        session.auth_request = None;
        session.grant_data = None;
        Ok(UiAction::Redirect { location })
    }

    fn check_nonce(&self, nonce: &str, session: &SessionState) -> AuthResult<()> {
        match &session.registration_nonce {
            Some(expected) if expected == nonce => Ok(()),
            _ => Err(AuthError::ui(400, "The form has expired, please retry")),
        }
    }
}

fn pending_request(session: &SessionState) -> AuthResult<AuthRequest> {
    session
        .auth_request
        .clone()
        .ok_or_else(|| AuthError::server_error("no pending authorization"))
}

fn pending_response(session: &SessionState) -> AuthResult<AuthResponse> {
    session
        .auth_response
        .clone()
        .ok_or_else(|| AuthError::server_error("no authentication outcome in session"))
}

/// Copies registration property values onto their mapped OIDC claims.
fn apply_registration_claims(
    profile: &mut OidcProfile,
    pool: &RegistrationPool,
    registration: &Registration,
) {
    for property in &pool.properties {
        let Some(claim) = property.oidc_claim.as_deref() else {
            continue;
        };
        let Some(value) = registration.properties.get(&property.name) else {
            continue;
        };
        set_claim(profile, claim, value);
    }
}

fn claim_value(profile: &OidcProfile, claim: &str) -> Option<String> {
    match claim {
        "email" => profile.email.clone(),
        "name" => profile.name.clone(),
        "given_name" => profile.given_name.clone(),
        "family_name" => profile.family_name.clone(),
        "preferred_username" => profile.preferred_username.clone(),
        other => profile
            .extra
            .get(other)
            .and_then(|v| v.as_str().map(str::to_string)),
    }
}

fn set_claim(profile: &mut OidcProfile, claim: &str, value: &Value) {
    let as_string = value.as_str().map(str::to_string);
    match claim {
        "email" => profile.email = as_string,
        "name" => profile.name = as_string,
        "given_name" => profile.given_name = as_string,
        "family_name" => profile.family_name = as_string,
        "preferred_username" => profile.preferred_username = as_string,
        other => {
            profile.extra.insert(other.to_string(), value.clone());
        }
    }
}

/// Appends parameters to an issued redirect: into the query string for the
/// code grant, into the fragment for the implicit grant.
fn append_redirect_params(
    location: &str,
    response_type: ResponseType,
    params: &[(&str, String)],
) -> AuthResult<String> {
    if params.is_empty() {
        return Ok(location.to_string());
    }
    let mut url = url::Url::parse(location)
        .map_err(|e| AuthError::server_error(format!("gateway returned a bad redirect: {e}")))?;
    match response_type {
        ResponseType::Code => {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }
        ResponseType::Token => {
            let mut fragment: String = url.fragment().unwrap_or_default().to_string();
            for (k, v) in params {
                if !fragment.is_empty() {
                    fragment.push('&');
                }
                fragment.push_str(k);
                fragment.push('=');
                fragment.extend(url::form_urlencoded::byte_serialize(v.as_bytes()));
            }
            url.set_fragment(Some(&fragment));
        }
    }
    Ok(url.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use portauth_core::{
        AllowedScopesMode, ApiSettings, ApplicationInfo, ClientType, PoolProperty,
        ScopeDescription, Subscription, SubscriptionInfo,
    };

    use crate::config::AuthEngineConfig;
    use crate::flow::EngineServices;
    use crate::gateway::TokenGateway;
    use crate::idp::CredentialsProvider;
    use crate::oauth::{AccessToken, TokenRequest};
    use crate::profile::{MemoryProfileStore, ProfileStore};
    use crate::session::MemorySessionStore;
    use crate::storage::{
        GrantStore, MemoryGrantStore, MemoryRegistry, MemoryTokenRecordStore,
        MemoryUserDirectory, MemoryVerificationService, TokenRecordStore, UserDirectory,
    };

    use super::*;

    /// Gateway fake that hands out fixed codes/tokens.
    pub(crate) struct FakeGateway;

    #[async_trait]
    impl TokenGateway for FakeGateway {
        async fn authorize(&self, request: &GatewayAuthRequest) -> AuthResult<String> {
            Ok(match request.response_type {
                ResponseType::Code => format!("{}?code=code-1", request.redirect_uri),
                ResponseType::Token => {
                    format!("{}#access_token=at-1&token_type=bearer", request.redirect_uri)
                }
            })
        }

        async fn token(&self, request: &TokenRequest) -> AuthResult<AccessToken> {
            let _ = request;
            Ok(AccessToken::new("at-2", 3600).with_refresh_token("rt-2"))
        }

        async fn delete_tokens(
            &self,
            _access_token: Option<&str>,
            _authenticated_userid: Option<&str>,
        ) -> AuthResult<()> {
            Ok(())
        }
    }

    pub(crate) struct Harness {
        pub engine: FlowEngine,
        pub registry: Arc<MemoryRegistry>,
        pub users: Arc<MemoryUserDirectory>,
        pub grants: Arc<MemoryGrantStore>,
        pub tokens: Arc<MemoryTokenRecordStore>,
        pub profiles: Arc<MemoryProfileStore>,
        pub verifications: Arc<MemoryVerificationService>,
        pub user_id: String,
    }

    pub(crate) fn scoped_api(id: &str, scopes: &[&str]) -> ApiInfo {
        let mut map = BTreeMap::new();
        for s in scopes {
            map.insert(s.to_string(), ScopeDescription::default());
        }
        ApiInfo {
            id: id.to_string(),
            name: id.to_string(),
            auth_methods: vec!["portauth:default".to_string()],
            registration_pool: None,
            passthrough_users: false,
            passthrough_scope_url: None,
            settings: ApiSettings {
                scopes: map,
                ..ApiSettings::default()
            },
        }
    }

    pub(crate) fn subscription(api: &str, trusted: bool) -> SubscriptionInfo {
        SubscriptionInfo {
            subscription: Subscription {
                application: "my-app".to_string(),
                api: api.to_string(),
                plan: "basic".to_string(),
                client_id: "client-1".to_string(),
                client_secret: Some("s3cret".to_string()),
                trusted,
                allowed_scopes_mode: AllowedScopesMode::All,
                allowed_scopes: vec![],
            },
            application: ApplicationInfo {
                id: "my-app".to_string(),
                name: "My App".to_string(),
                redirect_uris: vec!["https://app.example.com/cb".to_string()],
                client_type: ClientType::Confidential,
            },
        }
    }

    pub(crate) fn harness() -> Harness {
        let registry = Arc::new(MemoryRegistry::new());
        let users = Arc::new(MemoryUserDirectory::new());
        let grants = Arc::new(MemoryGrantStore::new());
        let tokens = Arc::new(MemoryTokenRecordStore::new());
        let profiles = Arc::new(MemoryProfileStore::new());
        let verifications = Arc::new(MemoryVerificationService::new());

        let user = UserInfo::new(Some("a@example.com".to_string()), None);
        let user_id = user.id.clone();
        users.add_user(user);
        users.add_credentials("a@example.com", "hunter2", &user_id);

        let services = EngineServices {
            registry: registry.clone(),
            users: users.clone(),
            grants: grants.clone(),
            tokens: tokens.clone(),
            sessions: Arc::new(MemorySessionStore::new(3600)),
            profiles: profiles.clone(),
            gateway: Arc::new(FakeGateway),
            verifications: verifications.clone(),
        };
        let engine = FlowEngine::new(AuthEngineConfig::default(), services).unwrap();
        engine.register_provider(
            "default",
            Arc::new(CredentialsProvider::new("default", users.clone())),
        );
        Harness {
            engine,
            registry,
            users,
            grants,
            tokens,
            profiles,
            verifications,
            user_id,
        }
    }

    fn code_query(scope: &str) -> AuthorizeQuery {
        AuthorizeQuery {
            client_id: Some("client-1".to_string()),
            response_type: Some("code".to_string()),
            scope: Some(scope.to_string()),
            state: Some("xyz".to_string()),
            ..AuthorizeQuery::default()
        }
    }

    fn location(action: &UiAction) -> String {
        match action {
            UiAction::Redirect { location } => location.clone(),
            other => panic!("expected a redirect, got {other:?}"),
        }
    }

    /// Serves a fixed scope-webhook reply on an ephemeral port.
    pub(crate) async fn spawn_scope_webhook(reply: serde_json::Value) -> String {
        use axum::{Json, Router, routing::post};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route(
            "/scope",
            post(move || {
                let reply = reply.clone();
                async move { Json(reply) }
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/scope")
    }

    #[tokio::test]
    async fn test_scope_webhook_identity_overrides_local_userid() {
        let h = harness();
        let url = spawn_scope_webhook(serde_json::json!({
            "allow": true,
            "validatedScope": ["read"],
            "authenticatedUserid": "sub=remote-77;namespace=acme",
        }))
        .await;
        let mut api = scoped_api("orders", &["read"]);
        api.passthrough_users = true;
        api.passthrough_scope_url = Some(url);
        h.registry.add_api(api);
        h.registry.add_subscription(subscription("orders", true));

        let mut session = SessionState::default();
        h.engine
            .authorize("default", "orders", &code_query("read"), &mut session)
            .await
            .unwrap();
        let action = h
            .engine
            .login("default", "a@example.com", "hunter2", &mut session)
            .await
            .unwrap();
        assert!(location(&action).contains("code=code-1"));

        // The webhook's verbose id replaces the locally computed one, sub
        // included
        let profile = h.profiles.retrieve("code-1").await.unwrap().unwrap();
        assert_eq!(
            profile.authenticated_userid.as_deref(),
            Some("sub=remote-77;namespace=acme")
        );
        assert_eq!(profile.sub, "sub=remote-77;namespace=acme");
        assert_eq!(profile.authenticated_scope, Some(vec!["read".to_string()]));
    }

    #[tokio::test]
    async fn test_code_flow_for_trusted_client() {
        let h = harness();
        h.registry.add_api(scoped_api("orders", &["read", "write"]));
        h.registry.add_subscription(subscription("orders", true));

        let mut session = SessionState::default();
        let action = h
            .engine
            .authorize("default", "orders", &code_query("read"), &mut session)
            .await
            .unwrap();
        // Not yet authenticated: the login form comes first
        assert!(matches!(&action, UiAction::Render { template, .. } if template == "login"));

        let action = h
            .engine
            .login("default", "a@example.com", "hunter2", &mut session)
            .await
            .unwrap();
        let loc = location(&action);
        assert!(loc.contains("code=code-1"), "{loc}");
        assert!(loc.contains("state=xyz"), "{loc}");

        // The profile is stored under the code, with internal fields set
        let profile = h.profiles.retrieve("code-1").await.unwrap().unwrap();
        assert_eq!(
            profile.authenticated_userid,
            Some(format!("sub={}", h.user_id))
        );
        assert_eq!(profile.authenticated_scope, Some(vec!["read".to_string()]));
        // Trusted client with an explicit scope, nothing was granted
        assert!(h
            .grants
            .get_grant(&h.user_id, "my-app", "orders")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_consent_flow_for_untrusted_client() {
        let h = harness();
        h.registry.add_api(scoped_api("orders", &["read", "write"]));
        h.registry.add_subscription(subscription("orders", false));

        let mut session = SessionState::default();
        h.engine
            .authorize("default", "orders", &code_query("read write"), &mut session)
            .await
            .unwrap();
        let action = h
            .engine
            .login("default", "a@example.com", "hunter2", &mut session)
            .await
            .unwrap();

        let nonce = match &action {
            UiAction::Render { template, view } => {
                assert_eq!(template, "grant");
                assert_eq!(
                    view["missingGrants"],
                    serde_json::json!(["read", "write"])
                );
                view["nonce"].as_str().unwrap().to_string()
            }
            other => panic!("expected the grant screen, got {other:?}"),
        };

        let action = h
            .engine
            .decide_grant("default", &nonce, true, &mut session)
            .await
            .unwrap();
        assert!(location(&action).contains("code=code-1"));

        let grant = h
            .grants
            .get_grant(&h.user_id, "my-app", "orders")
            .await
            .unwrap()
            .unwrap();
        assert!(grant.contains_scope("read"));
        assert!(grant.contains_scope("write"));

        // Second authorization with the same scope skips the grant screen
        let mut session2 = SessionState::default();
        h.engine
            .authorize("default", "orders", &code_query("read"), &mut session2)
            .await
            .unwrap();
        let action = h
            .engine
            .login("default", "a@example.com", "hunter2", &mut session2)
            .await
            .unwrap();
        assert!(matches!(action, UiAction::Redirect { .. }));
    }

    #[tokio::test]
    async fn test_consent_denial_redirects_access_denied() {
        let h = harness();
        h.registry.add_api(scoped_api("orders", &["read"]));
        h.registry.add_subscription(subscription("orders", false));

        let mut session = SessionState::default();
        h.engine
            .authorize("default", "orders", &code_query("read"), &mut session)
            .await
            .unwrap();
        let action = h
            .engine
            .login("default", "a@example.com", "hunter2", &mut session)
            .await
            .unwrap();
        let nonce = match &action {
            UiAction::Render { view, .. } => view["nonce"].as_str().unwrap().to_string(),
            other => panic!("expected the grant screen, got {other:?}"),
        };

        let err = h
            .engine
            .decide_grant("default", &nonce, false, &mut session)
            .await
            .unwrap_err();
        assert_eq!(err.status(), 302);
        assert_eq!(
            err.oauth_error_code(),
            Some(crate::error::OAuthErrorCode::AccessDenied)
        );
    }

    #[tokio::test]
    async fn test_implicit_flow_registers_token_and_echoes_scope() {
        let h = harness();
        h.registry.add_api(scoped_api("orders", &["read", "write"]));
        h.registry.add_subscription(subscription("orders", true));

        let mut session = SessionState::default();
        let mut query = code_query("");
        query.response_type = Some("token".to_string());
        query.scope = None;
        h.engine
            .authorize("default", "orders", &query, &mut session)
            .await
            .unwrap();
        let action = h
            .engine
            .login("default", "a@example.com", "hunter2", &mut session)
            .await
            .unwrap();
        let loc = location(&action);

        // Trusted + empty scope expands to the declared set and is echoed
        // in the fragment
        assert!(loc.contains("access_token=at-1"), "{loc}");
        assert!(loc.contains("scope=read"), "{loc}");
        assert!(loc.contains("state=xyz"), "{loc}");

        let record = h.tokens.get_by_access_token("at-1").await.unwrap().unwrap();
        assert_eq!(record.api_id, "orders");
        assert!(record.refresh_token.is_none());
        assert!(record.profile.as_ref().is_some_and(|p| p.is_stripped()));
    }

    #[tokio::test]
    async fn test_prompt_none_without_session() {
        let h = harness();
        h.registry.add_api(scoped_api("orders", &["read"]));
        h.registry.add_subscription(subscription("orders", true));

        let mut query = code_query("read");
        query.prompt = Some("none".to_string());
        let err = h
            .engine
            .authorize("default", "orders", &query, &mut SessionState::default())
            .await
            .unwrap_err();
        assert_eq!(err.status(), 302);
        assert_eq!(
            err.oauth_error_code(),
            Some(crate::error::OAuthErrorCode::LoginRequired)
        );
    }

    #[tokio::test]
    async fn test_prompt_login_forces_reauthentication() {
        let h = harness();
        h.registry.add_api(scoped_api("orders", &["read"]));
        h.registry.add_subscription(subscription("orders", true));

        let mut session = SessionState::default();
        h.engine
            .authorize("default", "orders", &code_query("read"), &mut session)
            .await
            .unwrap();
        h.engine
            .login("default", "a@example.com", "hunter2", &mut session)
            .await
            .unwrap();
        assert!(session.is_authenticated());

        let mut query = code_query("read");
        query.prompt = Some("login".to_string());
        let action = h
            .engine
            .authorize("default", "orders", &query, &mut session)
            .await
            .unwrap();
        assert!(matches!(&action, UiAction::Render { template, .. } if template == "login"));
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_registration_flow() {
        let h = harness();
        let mut api = scoped_api("orders", &["read"]);
        api.registration_pool = Some("customers".to_string());
        h.registry.add_api(api);
        h.registry.add_subscription(subscription("orders", true));
        h.registry.add_pool(RegistrationPool {
            id: "customers".to_string(),
            name: "Customers".to_string(),
            requires_namespace: false,
            disable_register: false,
            properties: vec![PoolProperty {
                name: "name".to_string(),
                oidc_claim: Some("name".to_string()),
                required: true,
            }],
        });

        let mut session = SessionState::default();
        h.engine
            .authorize("default", "orders", &code_query("read"), &mut session)
            .await
            .unwrap();
        let action = h
            .engine
            .login("default", "a@example.com", "hunter2", &mut session)
            .await
            .unwrap();
        let nonce = match &action {
            UiAction::Render { template, view } => {
                assert_eq!(template, "register");
                view["nonce"].as_str().unwrap().to_string()
            }
            other => panic!("expected the registration form, got {other:?}"),
        };

        // Required field missing
        let err = h
            .engine
            .submit_registration("default", &nonce, BTreeMap::new(), &mut session)
            .await
            .unwrap_err();
        assert_eq!(err.status(), 400);

        let mut props = BTreeMap::new();
        props.insert("name".to_string(), json!("Ada Lovelace"));
        let action = h
            .engine
            .submit_registration("default", &nonce, props, &mut session)
            .await
            .unwrap();
        assert!(location(&action).contains("code=code-1"));

        // The registration claim made it onto the stored profile
        let profile = h.profiles.retrieve("code-1").await.unwrap().unwrap();
        assert_eq!(profile.name.as_deref(), Some("Ada Lovelace"));
    }

    #[tokio::test]
    async fn test_namespace_selection() {
        let h = harness();
        let mut api = scoped_api("orders", &["read"]);
        api.registration_pool = Some("tenants".to_string());
        h.registry.add_api(api);
        h.registry.add_subscription(subscription("orders", true));
        h.registry.add_pool(RegistrationPool {
            id: "tenants".to_string(),
            name: "Tenants".to_string(),
            requires_namespace: true,
            disable_register: false,
            properties: vec![],
        });
        for ns in ["acme", "globex"] {
            h.registry.add_registration(Registration {
                pool_id: "tenants".to_string(),
                user_id: h.user_id.clone(),
                namespace: Some(ns.to_string()),
                properties: BTreeMap::new(),
            });
        }

        let mut session = SessionState::default();
        h.engine
            .authorize("default", "orders", &code_query("read"), &mut session)
            .await
            .unwrap();
        let action = h
            .engine
            .login("default", "a@example.com", "hunter2", &mut session)
            .await
            .unwrap();
        let nonce = match &action {
            UiAction::Render { template, view } => {
                assert_eq!(template, "select_namespace");
                assert_eq!(view["namespaces"], json!(["acme", "globex"]));
                view["nonce"].as_str().unwrap().to_string()
            }
            other => panic!("expected namespace selection, got {other:?}"),
        };

        let action = h
            .engine
            .select_namespace("default", &nonce, "acme", &mut session)
            .await
            .unwrap();
        let loc = location(&action);
        assert!(loc.contains("namespace=acme"), "{loc}");

        // The namespace lands in the verbose authenticated user id
        let profile = h.profiles.retrieve("code-1").await.unwrap().unwrap();
        assert_eq!(
            profile.authenticated_userid,
            Some(format!("sub={};namespace=acme", h.user_id))
        );
    }

    #[tokio::test]
    async fn test_single_registration_autoselects_namespace() {
        let h = harness();
        let mut api = scoped_api("orders", &["read"]);
        api.registration_pool = Some("tenants".to_string());
        h.registry.add_api(api);
        h.registry.add_subscription(subscription("orders", true));
        h.registry.add_pool(RegistrationPool {
            id: "tenants".to_string(),
            name: "Tenants".to_string(),
            requires_namespace: true,
            disable_register: false,
            properties: vec![],
        });
        h.registry.add_registration(Registration {
            pool_id: "tenants".to_string(),
            user_id: h.user_id.clone(),
            namespace: Some("acme".to_string()),
            properties: BTreeMap::new(),
        });

        let mut session = SessionState::default();
        h.engine
            .authorize("default", "orders", &code_query("read"), &mut session)
            .await
            .unwrap();
        let action = h
            .engine
            .login("default", "a@example.com", "hunter2", &mut session)
            .await
            .unwrap();
        assert!(location(&action).contains("namespace=acme"));
    }

    #[tokio::test]
    async fn test_disabled_registration_rejects_unregistered_user() {
        let h = harness();
        let mut api = scoped_api("orders", &["read"]);
        api.registration_pool = Some("customers".to_string());
        h.registry.add_api(api);
        h.registry.add_subscription(subscription("orders", true));
        h.registry.add_pool(RegistrationPool {
            id: "customers".to_string(),
            name: "Customers".to_string(),
            requires_namespace: false,
            disable_register: true,
            properties: vec![],
        });

        let mut session = SessionState::default();
        h.engine
            .authorize("default", "orders", &code_query("read"), &mut session)
            .await
            .unwrap();
        let err = h
            .engine
            .login("default", "a@example.com", "hunter2", &mut session)
            .await
            .unwrap_err();
        assert_eq!(err.status(), 403);
        assert_eq!(err.kind(), crate::error::FailureKind::Ui);
    }

    #[tokio::test]
    async fn test_federated_first_login_creates_user_and_requests_verification() {
        let h = harness();
        h.registry.add_api(scoped_api("orders", &["read"]));
        h.registry.add_subscription(subscription("orders", true));

        let mut session = SessionState::default();
        h.engine
            .authorize("default", "orders", &code_query("read"), &mut session)
            .await
            .unwrap();

        // Simulate a federated provider outcome for an unseen identity
        let mut profile = OidcProfile::new("upstream-42");
        profile.email = Some("new@example.com".to_string());
        profile.email_verified = Some(false);
        session.auth_response = Some(AuthResponse {
            user_id: None,
            custom_id: Some("github:upstream-42".to_string()),
            groups: vec![],
            default_groups: vec!["dev".to_string()],
            default_profile: profile,
            profile: None,
        });
        let action = h
            .engine
            .continue_authorize("default", &mut session)
            .await
            .unwrap();
        assert!(matches!(action, UiAction::Redirect { .. }));

        let user = h
            .users
            .get_user_by_custom_id("github:upstream-42")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.groups, vec!["dev"]);

        // The verification request is spawned; yield so it runs
        tokio::task::yield_now().await;
        let requests = h.verifications.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].1, "new@example.com");

        // The dev group rides along as a pseudo-scope
        let profile = h.profiles.retrieve("code-1").await.unwrap().unwrap();
        assert!(profile
            .authenticated_scope
            .unwrap()
            .contains(&"portal:dev".to_string()));
    }

    #[tokio::test]
    async fn test_plain_login_short_circuits() {
        let h = harness();
        let mut session = SessionState::default();
        let action = h
            .engine
            .plain_login("default", "/account", None, &mut session)
            .await
            .unwrap();
        assert!(matches!(&action, UiAction::Render { template, .. } if template == "login"));

        let action = h
            .engine
            .login("default", "a@example.com", "hunter2", &mut session)
            .await
            .unwrap();
        assert_eq!(location(&action), "/account");
        assert!(session.is_authenticated());
    }

    #[tokio::test]
    async fn test_stale_nonce_rejected() {
        let h = harness();
        let mut session = SessionState::default();
        session.registration_nonce = Some("fresh".to_string());
        let err = h
            .engine
            .decide_grant("default", "stale", true, &mut session)
            .await
            .unwrap_err();
        assert_eq!(err.status(), 400);
        assert_eq!(err.kind(), crate::error::FailureKind::Ui);
    }
}
