//! # portauth-core
//!
//! Shared domain types for the portauth authorization server.
//!
//! These types describe metadata that is owned by external collaborators
//! (the API/application registry, the user directory, the grant store) and
//! merely consumed by the protocol engine:
//!
//! - [`api`] - API descriptors, declared scopes, token lifetimes
//! - [`application`] - Applications, client types, redirect URIs
//! - [`subscription`] - Application/API subscriptions and scope policy
//! - [`user`] - User directory records
//! - [`pool`] - Registration pools and registrations
//! - [`grant`] - Persisted scope-consent records
//! - [`profile`] - OIDC profiles and internal transport claims
//! - [`token_record`] - Issued-token bookkeeping records

pub mod api;
pub mod application;
pub mod grant;
pub mod pool;
pub mod profile;
pub mod subscription;
pub mod token_record;
pub mod user;

pub use api::{ApiInfo, ApiSettings, ScopeDescription};
pub use application::{ApplicationInfo, ClientType};
pub use grant::{Grant, ScopeGrant};
pub use pool::{PoolProperty, Registration, RegistrationPool};
pub use profile::OidcProfile;
pub use subscription::{AllowedScopesMode, Subscription, SubscriptionInfo};
pub use token_record::TokenRecord;
pub use user::UserInfo;
