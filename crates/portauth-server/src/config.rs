//! Server configuration, loaded from a TOML file.
//!
//! Besides the listen address and gateway settings, the file carries the
//! deployment's static registry: APIs, subscriptions, registration pools
//! and seeded users. A production deployment would point the engine at an
//! external registry instead; the file-based registry covers single-node
//! setups and local development.

use std::fs;

use portauth_auth::{AuthEngineConfig, AuthMethodConfig};
use portauth_core::{ApiInfo, RegistrationPool, SubscriptionInfo};
use serde::Deserialize;
use thiserror::Error;

/// Configuration load failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read configuration file '{path}': {source}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or has the wrong shape.
    #[error("cannot parse configuration file '{path}': {source}")]
    Parse {
        /// Path that failed.
        path: String,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Socket address to bind.
    pub listen: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3010".to_string(),
        }
    }
}

/// Credential gateway settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    /// Base URL of the gateway admin API.
    pub admin_url: String,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            admin_url: "http://localhost:8001".to_string(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level or filter directive, overridable by `RUST_LOG`.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// A user seeded into the in-memory directory at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedUser {
    /// Login email.
    pub email: String,
    /// Plain password; seeded users are a development convenience.
    pub password: String,
    /// Group memberships.
    #[serde(default)]
    pub groups: Vec<String>,
    /// Whether the email counts as verified.
    #[serde(default)]
    pub email_verified: bool,
}

/// The full server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    /// Listener settings.
    #[serde(default)]
    pub server: ServerSection,

    /// Gateway settings.
    #[serde(default)]
    pub gateway: GatewaySection,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingSection,

    /// Protocol engine settings.
    #[serde(default)]
    pub engine: AuthEngineConfig,

    /// Mounted auth methods.
    #[serde(default)]
    pub auth_methods: Vec<AuthMethodConfig>,

    /// Registered APIs.
    #[serde(default)]
    pub apis: Vec<ApiInfo>,

    /// Application subscriptions.
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionInfo>,

    /// Registration pools.
    #[serde(default)]
    pub pools: Vec<RegistrationPool>,

    /// Seeded users.
    #[serde(default)]
    pub users: Vec<SeedUser>,
}

/// Loads and parses the configuration file.
///
/// # Errors
///
/// Fails when the file cannot be read or parsed.
pub fn load_config(path: &str) -> Result<ServerConfig, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_string(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:3010");
        assert_eq!(config.gateway.admin_url, "http://localhost:8001");
        assert_eq!(config.logging.level, "info");
        assert!(config.auth_methods.is_empty());
        assert!(config.apis.is_empty());
    }

    #[test]
    fn test_full_config_parses() {
        let toml = r#"
            [server]
            listen = "127.0.0.1:3010"

            [gateway]
            admin_url = "http://gateway:8001"

            [logging]
            level = "debug"

            [engine]
            server_name = "portauth"
            login_failure_delay_ms = 100

            [[auth_methods]]
            id = "default"
            type = "credentials"

            [[apis]]
            id = "orders"
            name = "Orders"
            authMethods = ["portauth:default"]

            [apis.settings.scopes.read]
            description = "Read your orders"

            [[subscriptions]]
            [subscriptions.subscription]
            application = "my-app"
            api = "orders"
            clientId = "abc123"
            clientSecret = "s3cret"
            trusted = true
            [subscriptions.application]
            id = "my-app"
            name = "My App"
            redirectUris = ["https://app.example.com/callback"]

            [[users]]
            email = "a@example.com"
            password = "hunter2"
            groups = ["dev"]
            emailVerified = true
        "#;
        let config: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:3010");
        assert_eq!(config.engine.login_failure_delay_ms, 100);
        assert_eq!(config.auth_methods[0].method_type, "credentials");
        assert_eq!(config.apis[0].declared_scopes(), vec!["read"]);
        assert!(config.subscriptions[0].subscription.trusted);
        assert_eq!(config.users[0].groups, vec!["dev"]);
        assert!(config.users[0].email_verified);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_config("/nonexistent/portauth.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
