//! # Greatestworks Config
//!
//! Layered configuration for greatestworks services, with validation and
//! hot reload.
//!
//! ## Core Features
//!
//! - **Layered Sources**: defaults, TOML files and `GW__SECTION__KEY`
//!   environment overrides, merged in a fixed order
//! - **Validation**: a snapshot is published only after [`Config::validate`]
//!   accepts it
//! - **Hot Reload**: [`ConfigManager`] polls its sources and swaps the
//!   snapshot atomically when they change
//! - **Ordered Subscribers**: change callbacks run sequentially, in
//!   registration order, off the watch loop
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use greatestworks_config::{ConfigManager, Loader};
//!
//! # async fn run() -> Result<(), greatestworks_config::ConfigError> {
//! let manager = ConfigManager::new(Loader::new().with_service("auth-service"))?;
//! manager
//!     .on_change(|config| println!("now running {}", config.service.version))
//!     .await;
//!
//! let (_cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
//! manager.start_watching(cancel_rx)?;
//! # Ok(())
//! # }
//! ```

mod error;
mod loader;
mod manager;
mod settings;

pub use error::ConfigError;
pub use loader::{ConfigSource, Loader, DEFAULT_CONFIG_DIR, DEFAULT_ENV_PREFIX};
pub use manager::{ConfigCallback, ConfigManager};
pub use settings::{
    AppSettings, Config, EnvironmentSettings, FeatureFlags, LoggingSettings, ServerSettings,
    ServiceSettings, VALID_ENVIRONMENTS, VALID_LOG_LEVELS,
};
