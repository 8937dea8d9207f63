//! Command-line interface for the auth service.
//!
//! Every flag is optional. Flags that mirror a config key are applied as
//! loader overrides, so they win over files and the environment and keep
//! winning across hot reloads.

use clap::{Arg, ArgAction, ArgMatches, Command};
use greatestworks_config::Loader;
use std::path::PathBuf;

/// Service name used to locate `config/<service>.toml` when none is given.
pub const DEFAULT_SERVICE_NAME: &str = "auth-service";

/// Command line arguments parsed from user input.
#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    /// Extra configuration file that must exist
    pub config_path: Option<PathBuf>,
    /// Service name, selects service-specific config files
    pub service: String,
    /// Optional override for `server.bind_address`
    pub bind_address: Option<String>,
    /// Optional override for `logging.level`
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

impl CliArgs {
    /// Parses the process arguments. Exits with usage on invalid input.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches.get_one::<String>("config").map(PathBuf::from),
            service: matches
                .get_one::<String>("service")
                .cloned()
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            bind_address: matches.get_one::<String>("bind").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }

    /// Builds the configuration loader these arguments describe.
    pub fn loader(&self) -> Loader {
        let mut loader = Loader::new().with_service(&self.service);

        if let Some(path) = &self.config_path {
            loader = loader.with_required_file(path);
        }
        if let Some(bind) = &self.bind_address {
            loader = loader.with_override("server.bind_address", bind);
        }
        if let Some(level) = &self.log_level {
            loader = loader.with_override("logging.level", level);
        }
        if self.json_logs {
            loader = loader.with_override("logging.json_format", "true");
        }

        loader
    }
}

fn command() -> Command {
    Command::new("auth-service")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Game server front door: framed TCP sessions, layered config and hot reload")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Additional configuration file (must exist)"),
        )
        .arg(
            Arg::new("service")
                .short('s')
                .long("service")
                .value_name("NAME")
                .help("Service name used to select config files")
                .default_value(DEFAULT_SERVICE_NAME),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDRESS")
                .help("Bind address (e.g., 127.0.0.1:9000)"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(ArgAction::SetTrue),
        )
}
