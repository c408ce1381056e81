//! Wires the configured services into a running HTTP server.

use std::sync::Arc;

use portauth_auth::flow::EngineServices;
use portauth_auth::http::AppState;
use portauth_auth::session::MemorySessionStore;
use portauth_auth::profile::MemoryProfileStore;
use portauth_auth::storage::{
    MemoryGrantStore, MemoryRegistry, MemoryTokenRecordStore, MemoryUserDirectory,
    MemoryVerificationService, Registry, UserDirectory,
};
use portauth_auth::{
    AuthError, CredentialsProvider, FlowEngine, GrantManager, HttpTokenGateway, IdentityProvider,
    IdpRegistry,
};
use portauth_core::UserInfo;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;

/// Startup and runtime failures of the server binary.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or serving the listener failed.
    #[error("server IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Engine or gateway construction failed.
    #[error("engine setup failed: {0}")]
    Engine(#[from] AuthError),
}

/// Builds the engine from the configuration and serves it until the
/// process is stopped.
pub async fn run(config: ServerConfig) -> Result<(), ServerError> {
    let registry = Arc::new(build_registry(&config));
    let users = Arc::new(build_users(&config));

    let gateway_registry: Arc<dyn Registry> = registry.clone();
    let gateway = HttpTokenGateway::new(
        config.gateway.admin_url.clone(),
        gateway_registry,
        config.engine.clone(),
    )?;

    let grants = Arc::new(MemoryGrantStore::new());
    let services = EngineServices {
        registry: registry.clone(),
        users: users.clone(),
        grants: grants.clone(),
        tokens: Arc::new(MemoryTokenRecordStore::new()),
        sessions: Arc::new(MemorySessionStore::new(config.engine.session_ttl_secs)),
        profiles: Arc::new(MemoryProfileStore::new()),
        gateway: Arc::new(gateway),
        verifications: Arc::new(MemoryVerificationService::new()),
    };

    let engine = FlowEngine::new(config.engine.clone(), services)?;
    let providers = identity_providers(users);
    for method in config.auth_methods.iter().filter(|m| m.enabled) {
        let provider = providers.construct(method)?;
        info!(
            auth_method_id = %method.id,
            provider_type = %provider.provider_type(),
            "Auth method mounted"
        );
        engine.register_provider(method.id.clone(), provider);
    }

    let state = AppState {
        engine: Arc::new(engine),
        grant_manager: Arc::new(GrantManager::new(grants, registry)),
    };
    let router = portauth_auth::http::router(state).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.server.listen).await?;
    info!(
        listen = %config.server.listen,
        gateway = %config.gateway.admin_url,
        "portauth listening"
    );
    axum::serve(listener, router).await?;
    Ok(())
}

/// The built-in identity provider constructors.
fn identity_providers(users: Arc<dyn UserDirectory>) -> IdpRegistry {
    let mut registry = IdpRegistry::new();
    registry.register(
        "credentials",
        Box::new(move |config| {
            Ok(Arc::new(CredentialsProvider::new(config.id.clone(), users.clone()))
                as Arc<dyn IdentityProvider>)
        }),
    );
    registry
}

fn build_registry(config: &ServerConfig) -> MemoryRegistry {
    let registry = MemoryRegistry::new();
    for api in &config.apis {
        registry.add_api(api.clone());
    }
    for info in &config.subscriptions {
        registry.add_subscription(info.clone());
    }
    for pool in &config.pools {
        registry.add_pool(pool.clone());
    }
    info!(
        apis = config.apis.len(),
        subscriptions = config.subscriptions.len(),
        pools = config.pools.len(),
        "Registry seeded"
    );
    registry
}

fn build_users(config: &ServerConfig) -> MemoryUserDirectory {
    let directory = MemoryUserDirectory::new();
    for seed in &config.users {
        let mut user = UserInfo::new(Some(seed.email.clone()), None);
        user.groups = seed.groups.clone();
        user.email_verified = seed.email_verified;
        let user_id = user.id.clone();
        directory.add_user(user);
        directory.add_credentials(&seed.email, &seed.password, &user_id);
    }
    if !config.users.is_empty() {
        info!(users = config.users.len(), "User directory seeded");
    }
    directory
}
