//! Error types for configuration loading and hot reload.

use std::path::PathBuf;

/// Errors that can occur while loading, validating, or watching configuration.
///
/// At startup every variant is fatal. During a watch-triggered reload the
/// error is logged and the previously published snapshot stays current.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A source marked as required does not exist
    #[error("Required configuration file not found: {0}")]
    MissingSource(PathBuf),
    /// A source exists but could not be read
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A source is not valid TOML
    #[error("Failed to parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    /// The merged layers do not deserialize into a `Config`
    #[error("Configuration has invalid structure: {0}")]
    Structure(String),
    /// The merged snapshot deserialized but failed validation
    #[error("Configuration validation failed: {0}")]
    Invalid(String),
    /// The manager is not in a state that allows the operation
    #[error("Configuration manager error: {0}")]
    Manager(String),
}
