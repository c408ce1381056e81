//! OAuth 2.0 protocol building blocks.
//!
//! - [`authorize`] - authorize-request parsing and validation
//! - [`token`] - token-endpoint wire types and validation
//! - [`pkce`] - RFC 7636 challenge/verifier handling
//! - [`scope`] - scope parsing and policy validation

pub mod authorize;
pub mod pkce;
pub mod scope;
pub mod token;

pub use authorize::{
    AuthRequest, AuthorizeQuery, ResponseType, normalize_redirect_uri, resolve_redirect_uri,
    validate_authorize_request,
};
pub use pkce::{PkceChallengeMethod, PkceError, PkceVerifier, s256_challenge, verify};
pub use scope::{
    GROUP_SCOPE_PREFIX, ValidatedScopes, merge_group_scopes, parse_scope, scope_string,
    strip_group_scopes, validate_scopes,
};
pub use token::{
    AccessToken, GrantType, TokenRequest, TokenRequestForm, decode_basic_auth, make_token_request,
    validate_token_request,
};
