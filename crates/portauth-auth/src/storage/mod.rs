//! Storage traits for the engine's external collaborators.
//!
//! The protocol engine never owns user, subscription, grant, or token data;
//! it talks to these collaborators through per-concern traits so the
//! backing services (user directory, registry, grant store, token
//! registry) stay pluggable. In-memory implementations back the tests and
//! single-node deployments.

pub mod grants;
pub mod memory;
pub mod registry;
pub mod tokens;
pub mod users;
pub mod verifications;

pub use grants::GrantStore;
pub use memory::{
    MemoryGrantStore, MemoryRegistry, MemoryTokenRecordStore, MemoryUserDirectory,
    MemoryVerificationService,
};
pub use registry::Registry;
pub use tokens::TokenRecordStore;
pub use users::UserDirectory;
pub use verifications::VerificationService;
