//! OAuth2/OIDC authorization front-end for APIs behind a credential
//! gateway.
//!
//! The engine implements the interactive authorization code and implicit
//! flows plus the password, client credentials and refresh grants, with
//! registration pools, namespace selection, scope consent and passthrough
//! modes. Token minting itself is delegated to a backend gateway through
//! the [`gateway::TokenGateway`] trait; identity verification is delegated
//! to pluggable [`idp::IdentityProvider`] implementations.
//!
//! The crate is transport-complete: [`http::router`] serves the whole
//! surface, while the [`flow::FlowEngine`] stays HTTP-free and is driven
//! directly in tests.

pub mod config;
pub mod error;
pub mod flow;
pub mod gateway;
pub mod grants;
pub mod http;
pub mod idp;
pub mod oauth;
pub mod profile;
pub mod session;
pub mod storage;

/// Result alias using [`error::AuthError`].
pub type AuthResult<T> = Result<T, error::AuthError>;

pub use config::{AuthEngineConfig, AuthMethodConfig};
pub use error::{AuthError, FailureKind, OAuthErrorCode};
pub use flow::{EngineServices, FlowEngine};
pub use gateway::{HttpTokenGateway, TokenGateway};
pub use grants::GrantManager;
pub use idp::{AuthResponse, CredentialsProvider, IdentityProvider, IdpRegistry, UiAction};
pub use session::{SessionState, SessionStore};
