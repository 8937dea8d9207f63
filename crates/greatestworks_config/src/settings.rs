//! Configuration snapshot types.
//!
//! A [`Config`] is an immutable, fully-resolved view of every service
//! setting. It is produced by the [`Loader`](crate::Loader) from layered
//! sources and shared as `Arc<Config>`; a change never mutates an existing
//! snapshot, it produces a new one.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;

/// Deployment environments a service may run in.
pub const VALID_ENVIRONMENTS: [&str; 3] = ["development", "staging", "production"];

/// Log levels accepted by `logging.level`.
pub const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Root configuration snapshot.
///
/// Every section has defaults, so a missing file or a partial file is
/// never an error by itself. Required values are enforced by
/// [`Config::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Application identity and deployment environment
    pub app: AppSettings,
    /// Runtime environment toggles (hot reload)
    pub environment: EnvironmentSettings,
    /// Service identity reported in logs and on reload
    pub service: ServiceSettings,
    /// Network and session settings
    pub server: ServerSettings,
    /// Named feature flags
    pub features: FeatureFlags,
    /// Logging output settings
    pub logging: LoggingSettings,
}

/// Application identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Human-readable application name
    pub name: String,
    /// Deployment environment (development, staging, production)
    pub environment: String,
}

/// Runtime environment toggles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentSettings {
    /// Whether the config manager watches its sources for changes
    pub hot_reload: bool,
    /// How often watched sources are polled, in milliseconds
    pub watch_interval_ms: u64,
}

/// Service identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name, also used to locate service-specific config files
    pub name: String,
    /// Service version, logged whenever a new snapshot is applied
    pub version: String,
}

/// Network listener and session settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Network address to bind the listener to (e.g., "127.0.0.1:9000")
    pub bind_address: String,
    /// Maximum number of concurrent client connections
    pub max_connections: usize,
    /// Seconds a connection may stay silent before it is closed (0 disables)
    pub idle_timeout_secs: u64,
    /// How long `stop` waits for in-flight handlers before forcing sessions closed
    pub shutdown_grace_period_ms: u64,
    /// Largest accepted frame (header + payload) in bytes
    pub max_frame_size: usize,
    /// Outbound frames buffered per session before `send` waits
    pub send_queue_capacity: usize,
}

/// Named boolean feature flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureFlags(pub BTreeMap<String, bool>);

impl FeatureFlags {
    /// Returns whether the named feature is switched on. Unknown names are off.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.0.get(name).copied().unwrap_or(false)
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app: AppSettings::default(),
            environment: EnvironmentSettings::default(),
            service: ServiceSettings::default(),
            server: ServerSettings::default(),
            features: FeatureFlags::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: "greatestworks".to_string(),
            environment: "development".to_string(),
        }
    }
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            hot_reload: false,
            watch_interval_ms: 2000,
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: "0.1.0".to_string(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:9000".to_string(),
            max_connections: 1000,
            idle_timeout_secs: 300,
            shutdown_grace_period_ms: 5000,
            max_frame_size: 1024 * 1024,
            send_queue_capacity: 256,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Config {
    /// Parses the configured bind address.
    pub fn bind_address(&self) -> Result<SocketAddr, ConfigError> {
        self.server.bind_address.parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "Invalid bind address: {}",
                &self.server.bind_address
            ))
        })
    }

    /// Validates the snapshot for consistency and required fields.
    ///
    /// Only snapshots that pass validation are ever published to the
    /// service.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.name.trim().is_empty() {
            return Err(ConfigError::Invalid("service.name is required".to_string()));
        }
        if self.service.version.trim().is_empty() {
            return Err(ConfigError::Invalid("service.version is required".to_string()));
        }

        if !VALID_ENVIRONMENTS.contains(&self.app.environment.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid environment: {}. Must be one of: {VALID_ENVIRONMENTS:?}",
                &self.app.environment
            )));
        }

        self.bind_address()?;

        if self.server.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "server.max_connections must be greater than 0".to_string(),
            ));
        }
        if self.server.send_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "server.send_queue_capacity must be greater than 0".to_string(),
            ));
        }
        // A frame must at least hold the fixed header.
        if self.server.max_frame_size < 64 {
            return Err(ConfigError::Invalid(
                "server.max_frame_size must be at least 64 bytes".to_string(),
            ));
        }

        if self.environment.hot_reload && self.environment.watch_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "environment.watch_interval_ms must be greater than 0 when hot_reload is on"
                    .to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level: {}. Must be one of: {VALID_LOG_LEVELS:?}",
                &self.logging.level
            )));
        }

        Ok(())
    }
}
