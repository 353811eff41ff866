//! Configuration management for the warden server.
//!
//! This module provides configuration loading with multiple sources:
//! 1. Default values (hardcoded)
//! 2. Configuration file (YAML)
//! 3. Environment variables (override)
//!
//! Environment variables take precedence over config file values, which
//! take precedence over defaults.
//!
//! # Example
//!
//! ```ignore
//! use warden_server::config::ServerConfig;
//!
//! // Load from file with env overrides
//! let config = ServerConfig::load("config.yaml")?;
//!
//! // Or load from environment only
//! let config = ServerConfig::from_env()?;
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

/// Server configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ServerConfig {
    /// Admin API settings
    #[serde(default)]
    pub server: ServerSettings,

    /// Reverse proxy services
    #[serde(default)]
    pub proxy: ProxySettings,

    /// Relationship-graph backend settings
    #[serde(default)]
    pub authz: AuthzSettings,

    /// Request identity and rule refresh settings
    #[serde(default)]
    pub app: AppSettings,

    /// Schema definitions and seed data
    #[serde(default)]
    pub bootstrap: BootstrapSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Metrics settings
    #[serde(default)]
    pub metrics: MetricsSettings,
}

/// Admin API network settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum buffered request body, also applied to proxied requests
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,

    /// Expose internal error details in responses
    #[serde(default)]
    pub detailed_errors: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            body_limit_bytes: default_body_limit(),
            detailed_errors: false,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_body_limit() -> usize {
    1024 * 1024
}

/// Reverse proxy settings.
///
/// ```yaml
/// proxy:
///   services:
///     - name: base
///       port: 5556
///       ruleset: /etc/warden/rules
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ProxySettings {
    #[serde(default)]
    pub services: Vec<ProxyServiceSettings>,
}

/// One listening proxy with its own rule set.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ProxyServiceSettings {
    pub name: String,

    #[serde(default = "default_host")]
    pub host: String,

    pub port: u16,

    /// Directory holding the rule documents
    pub ruleset: String,
}

/// Relationship-graph backend settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AuthzSettings {
    /// Backend type: "memory" or "spicedb"
    #[serde(default = "default_authz_backend")]
    pub backend: String,

    /// SpiceDB HTTP endpoint (required if backend is "spicedb")
    pub endpoint: Option<String>,

    #[serde(default)]
    pub preshared_key: String,

    /// Per-call timeout in seconds
    #[serde(default = "default_authz_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub fully_consistent: bool,
}

impl Default for AuthzSettings {
    fn default() -> Self {
        Self {
            backend: default_authz_backend(),
            endpoint: None,
            preshared_key: String::new(),
            timeout_secs: default_authz_timeout(),
            fully_consistent: false,
        }
    }
}

impl AuthzSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_authz_backend() -> String {
    "memory".to_string()
}

fn default_authz_timeout() -> u64 {
    5
}

/// Request identity and rule refresh settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AppSettings {
    /// Header carrying the authenticated caller's email
    #[serde(default = "default_identity_header")]
    pub identity_header: String,

    /// Header set on forwarded requests with the caller's user id
    #[serde(default = "default_user_id_header")]
    pub user_id_header: String,

    /// Interval between rule set refreshes
    #[serde(default = "default_rule_refresh")]
    pub rule_refresh_secs: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            identity_header: default_identity_header(),
            user_id_header: default_user_id_header(),
            rule_refresh_secs: default_rule_refresh(),
        }
    }
}

impl AppSettings {
    pub fn rule_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.rule_refresh_secs)
    }
}

fn default_identity_header() -> String {
    "X-Warden-Email".to_string()
}

fn default_user_id_header() -> String {
    "X-Warden-User-Id".to_string()
}

fn default_rule_refresh() -> u64 {
    120
}

/// Schema definitions and seed data.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct BootstrapSettings {
    /// YAML definitions document appended to the system namespaces
    pub definitions_path: Option<String>,

    /// YAML seed document (users, organizations, projects, groups)
    pub seed_path: Option<String>,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format (true for production, false for development)
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MetricsSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_metrics_path(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

fn invalid(message: impl Into<String>) -> ConfigLoadError {
    ConfigLoadError::Invalid {
        message: message.into(),
    }
}

fn environment() -> Environment {
    // WARDEN_SERVER__PORT -> server.port
    Environment::with_prefix("WARDEN")
        .prefix_separator("_")
        .separator("__")
}

impl ServerConfig {
    /// Load configuration from a YAML file with environment variable overrides.
    ///
    /// Environment variables are prefixed with `WARDEN_` and use `__` as separator:
    /// - `WARDEN_SERVER__PORT=9090` overrides `server.port`
    /// - `WARDEN_AUTHZ__ENDPOINT=...` overrides `authz.endpoint`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(environment())
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(environment())
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.server.port == 0 {
            return Err(invalid("server.port must be greater than 0"));
        }

        let valid_backends = ["memory", "spicedb"];
        if !valid_backends.contains(&self.authz.backend.as_str()) {
            return Err(invalid(format!(
                "authz.backend must be one of: {:?}, got: {}",
                valid_backends, self.authz.backend
            )));
        }
        if self.authz.backend == "spicedb"
            && self
                .authz
                .endpoint
                .as_deref()
                .map_or(true, |s| s.trim().is_empty())
        {
            return Err(invalid("authz.endpoint is required when backend is 'spicedb'"));
        }

        let mut names = HashSet::new();
        let mut ports = HashSet::from([self.server.port]);
        for service in &self.proxy.services {
            if service.name.trim().is_empty() {
                return Err(invalid("proxy.services[].name cannot be empty"));
            }
            if !names.insert(service.name.as_str()) {
                return Err(invalid(format!(
                    "proxy service '{}' is declared twice",
                    service.name
                )));
            }
            if service.port == 0 || !ports.insert(service.port) {
                return Err(invalid(format!(
                    "proxy service '{}' needs a unique, non-zero port",
                    service.name
                )));
            }
            if service.ruleset.trim().is_empty() {
                return Err(invalid(format!(
                    "proxy service '{}' has no ruleset",
                    service.name
                )));
            }
        }

        if self.app.identity_header.trim().is_empty() {
            return Err(invalid("app.identity_header cannot be empty"));
        }
        if self.app.rule_refresh_secs == 0 {
            return Err(invalid("app.rule_refresh_secs must be greater than 0"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(invalid(format!(
                "logging.level must be one of: {:?}, got: {}",
                valid_levels, self.logging.level
            )));
        }

        Ok(())
    }
}
