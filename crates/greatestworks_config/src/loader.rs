//! Layered configuration loading.
//!
//! Sources are applied in a fixed order and later layers win on
//! conflicting keys:
//!
//! 1. Built-in defaults ([`Config::default`])
//! 2. `<dir>/config.toml`
//! 3. `<dir>/<service>.toml`
//! 4. Files added with [`Loader::with_file`] / [`Loader::with_required_file`]
//! 5. `<dir>/<service>.<environment>.toml`
//! 6. Environment variables such as `GW__SERVER__BIND_ADDRESS=0.0.0.0:9000`
//! 7. Explicit overrides added with [`Loader::with_override`] (command line)
//!
//! Optional files that do not exist are skipped. A required file that is
//! missing, or any file that is malformed, fails the whole load.

use crate::{Config, ConfigError};
use std::fmt;
use std::path::PathBuf;
use toml::{Table, Value};
use tracing::debug;

/// Default directory searched for configuration files.
pub const DEFAULT_CONFIG_DIR: &str = "config";

/// Default prefix for environment variable overrides.
pub const DEFAULT_ENV_PREFIX: &str = "GW";

/// One layer that contributed to a loaded snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Built-in defaults
    Defaults,
    /// A TOML file that existed and was merged
    File(PathBuf),
    /// At least one environment variable override
    Environment,
    /// At least one explicit override
    Overrides,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::Defaults => write!(f, "defaults"),
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Environment => write!(f, "env"),
            ConfigSource::Overrides => write!(f, "overrides"),
        }
    }
}

#[derive(Debug, Clone)]
struct FileSource {
    path: PathBuf,
    required: bool,
}

#[derive(Debug, Clone)]
enum EnvSource {
    Process,
    Fixed(Vec<(String, String)>),
}

/// Builder-style loader producing validated [`Config`] snapshots.
#[derive(Debug, Clone)]
pub struct Loader {
    config_dir: PathBuf,
    service: Option<String>,
    files: Vec<FileSource>,
    env_prefix: String,
    env: EnvSource,
    overrides: Vec<(Vec<String>, String)>,
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

impl Loader {
    /// Creates a loader that searches [`DEFAULT_CONFIG_DIR`] and reads
    /// overrides from the process environment.
    pub fn new() -> Self {
        Self {
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            service: None,
            files: Vec::new(),
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            env: EnvSource::Process,
            overrides: Vec::new(),
        }
    }

    /// Sets the service name. It becomes the default `service.name` and
    /// selects the service-specific files.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Sets the directory searched for the conventional files.
    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = dir.into();
        self
    }

    /// Adds an optional file layer.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(FileSource {
            path: path.into(),
            required: false,
        });
        self
    }

    /// Adds a file layer that must exist.
    pub fn with_required_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(FileSource {
            path: path.into(),
            required: true,
        });
        self
    }

    /// Sets the environment variable prefix (without the trailing `__`).
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Uses a fixed set of variables instead of the process environment.
    pub fn with_env_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = EnvSource::Fixed(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Adds an override applied after every other layer, e.g.
    /// `with_override("server.bind_address", "0.0.0.0:9000")`.
    ///
    /// Overrides are re-applied on every load, so they survive hot reloads.
    pub fn with_override(mut self, key: &str, value: impl Into<String>) -> Self {
        let path = key.split('.').map(str::to_string).collect::<Vec<_>>();
        self.overrides.push((path, value.into()));
        self
    }

    /// Service name this loader was built for, if any.
    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    /// Every file path this loader may read for the given environment,
    /// whether or not it currently exists. Used by the watcher.
    pub fn candidate_paths(&self, environment: &str) -> Vec<PathBuf> {
        let mut paths = self.base_files().into_iter().map(|f| f.path).collect::<Vec<_>>();
        if let Some(env_file) = self.environment_file(environment) {
            paths.push(env_file.path);
        }
        paths
    }

    /// Loads, merges and validates every layer.
    ///
    /// # Returns
    ///
    /// The validated snapshot and the list of sources that contributed to
    /// it, in application order.
    pub fn load(&self) -> Result<(Config, Vec<ConfigSource>), ConfigError> {
        let mut defaults = Config::default();
        if let Some(service) = &self.service {
            defaults.service.name = service.clone();
        }

        let mut merged = match Value::try_from(&defaults) {
            Ok(Value::Table(table)) => table,
            Ok(_) => return Err(ConfigError::Structure("defaults are not a table".to_string())),
            Err(e) => return Err(ConfigError::Structure(e.to_string())),
        };
        let mut sources = vec![ConfigSource::Defaults];

        for file in self.base_files() {
            if let Some(table) = read_table(&file)? {
                merge_tables(&mut merged, table);
                sources.push(ConfigSource::File(file.path));
            }
        }

        let env_vars = self.env_vars();
        let overrides = self.env_overrides(&env_vars);

        // The environment-specific file is chosen after the base layers and
        // any APP__ENVIRONMENT override are known.
        let environment = self
            .overrides
            .iter()
            .rev()
            .chain(overrides.iter().rev())
            .find(|(path, _)| path.len() == 2 && path[0] == "app" && path[1] == "environment")
            .map(|(_, raw)| raw.clone())
            .or_else(|| lookup_string(&merged, &["app", "environment"]))
            .unwrap_or_else(|| defaults.app.environment.clone());

        if let Some(file) = self.environment_file(&environment) {
            if let Some(table) = read_table(&file)? {
                merge_tables(&mut merged, table);
                sources.push(ConfigSource::File(file.path));
            }
        }

        if !overrides.is_empty() {
            for (path, raw) in &overrides {
                apply_override(&mut merged, path, raw);
            }
            sources.push(ConfigSource::Environment);
        }

        if !self.overrides.is_empty() {
            for (path, raw) in &self.overrides {
                apply_override(&mut merged, path, raw);
            }
            sources.push(ConfigSource::Overrides);
        }

        let config: Config = Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Structure(e.to_string()))?;
        config.validate()?;

        debug!("Configuration loaded from {} source(s)", sources.len());
        Ok((config, sources))
    }

    fn base_files(&self) -> Vec<FileSource> {
        let mut files = vec![FileSource {
            path: self.config_dir.join("config.toml"),
            required: false,
        }];
        if let Some(service) = &self.service {
            files.push(FileSource {
                path: self.config_dir.join(format!("{service}.toml")),
                required: false,
            });
        }
        files.extend(self.files.iter().cloned());
        files
    }

    fn environment_file(&self, environment: &str) -> Option<FileSource> {
        let service = self.service.as_ref()?;
        Some(FileSource {
            path: self.config_dir.join(format!("{service}.{environment}.toml")),
            required: false,
        })
    }

    fn env_vars(&self) -> Vec<(String, String)> {
        match &self.env {
            EnvSource::Process => std::env::vars().collect(),
            EnvSource::Fixed(vars) => vars.clone(),
        }
    }

    /// Extracts `(key path, raw value)` pairs for variables carrying the prefix.
    fn env_overrides(&self, vars: &[(String, String)]) -> Vec<(Vec<String>, String)> {
        let prefix = format!("{}__", self.env_prefix);
        let mut overrides = vars
            .iter()
            .filter_map(|(key, value)| {
                let rest = key.strip_prefix(&prefix)?;
                let path = rest
                    .split("__")
                    .map(|segment| segment.to_ascii_lowercase())
                    .collect::<Vec<_>>();
                if path.iter().any(|segment| segment.is_empty()) {
                    return None;
                }
                Some((path, value.clone()))
            })
            .collect::<Vec<_>>();
        // Deterministic application order regardless of environment iteration order.
        overrides.sort();
        overrides
    }
}

fn read_table(file: &FileSource) -> Result<Option<Table>, ConfigError> {
    let content = match std::fs::read_to_string(&file.path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if file.required {
                return Err(ConfigError::MissingSource(file.path.clone()));
            }
            debug!("Optional configuration file not found: {}", file.path.display());
            return Ok(None);
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: file.path.clone(),
                source,
            })
        }
    };

    let table = toml::from_str::<Table>(&content).map_err(|source| ConfigError::Parse {
        path: file.path.clone(),
        source,
    })?;
    Ok(Some(table))
}

/// Deep-merges `overlay` into `base`; nested tables merge, everything else replaces.
fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Table(existing)), Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn lookup_string(table: &Table, path: &[&str]) -> Option<String> {
    let (last, parents) = path.split_last()?;
    let mut current = table;
    for segment in parents {
        current = current.get(*segment)?.as_table()?;
    }
    current.get(*last)?.as_str().map(str::to_string)
}

fn apply_override(table: &mut Table, path: &[String], raw: &str) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };

    let mut current = table;
    for segment in parents {
        let entry = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Table(Table::new()));
        if !entry.is_table() {
            *entry = Value::Table(Table::new());
        }
        let Value::Table(next) = entry else {
            return;
        };
        current = next;
    }

    let value = parse_override(current.get(last), raw);
    current.insert(last.clone(), value);
}

/// Parses a raw override using the type of the value it replaces, falling
/// back to bool, integer, float, then string.
fn parse_override(existing: Option<&Value>, raw: &str) -> Value {
    match existing {
        Some(Value::String(_)) => return Value::String(raw.to_string()),
        Some(Value::Boolean(_)) => {
            if let Ok(b) = raw.parse::<bool>() {
                return Value::Boolean(b);
            }
        }
        Some(Value::Integer(_)) => {
            if let Ok(i) = raw.parse::<i64>() {
                return Value::Integer(i);
            }
        }
        Some(Value::Float(_)) => {
            if let Ok(f) = raw.parse::<f64>() {
                return Value::Float(f);
            }
        }
        _ => {}
    }

    if let Ok(b) = raw.parse::<bool>() {
        Value::Boolean(b)
    } else if let Ok(i) = raw.parse::<i64>() {
        Value::Integer(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        Value::Float(f)
    } else {
        Value::String(raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn loader(dir: &TempDir) -> Loader {
        Loader::new()
            .with_service("auth-service")
            .with_config_dir(dir.path())
            .with_env_vars(Vec::<(String, String)>::new())
    }

    #[test]
    fn test_load_defaults_only() {
        let dir = TempDir::new().unwrap();
        let (config, sources) = loader(&dir).load().unwrap();

        assert_eq!(config.service.name, "auth-service");
        assert_eq!(config.server.bind_address, "127.0.0.1:9000");
        assert_eq!(sources, vec![ConfigSource::Defaults]);
    }

    #[test]
    fn test_later_layers_win() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config.toml"),
            r#"
[server]
bind_address = "0.0.0.0:7000"
max_connections = 50

[logging]
level = "debug"
"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("auth-service.toml"),
            r#"
[server]
max_connections = 75

[service]
version = "2.0.0"
"#,
        )
        .unwrap();

        let (config, sources) = loader(&dir).load().unwrap();

        assert_eq!(config.server.bind_address, "0.0.0.0:7000");
        assert_eq!(config.server.max_connections, 75);
        assert_eq!(config.service.version, "2.0.0");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(sources.len(), 3);
        assert_eq!(sources[1], ConfigSource::File(dir.path().join("config.toml")));
    }

    #[test]
    fn test_environment_file_follows_selected_environment() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config.toml"),
            "[app]\nenvironment = \"staging\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("auth-service.staging.toml"),
            "[environment]\nhot_reload = true\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("auth-service.production.toml"),
            "[server]\nmax_connections = 9\n",
        )
        .unwrap();

        let (config, _) = loader(&dir).load().unwrap();
        assert!(config.environment.hot_reload);
        assert_eq!(config.server.max_connections, 1000);
    }

    #[test]
    fn test_env_overrides_are_typed_by_existing_value() {
        let dir = TempDir::new().unwrap();
        let (config, sources) = loader(&dir)
            .with_env_vars(vec![
                ("GW__SERVER__MAX_CONNECTIONS", "12"),
                ("GW__SERVICE__VERSION", "1.5"),
                ("GW__ENVIRONMENT__HOT_RELOAD", "true"),
                ("GW__FEATURES__DOUBLE_XP", "true"),
                ("OTHER__SERVER__MAX_CONNECTIONS", "99"),
            ])
            .load()
            .unwrap();

        assert_eq!(config.server.max_connections, 12);
        assert_eq!(config.service.version, "1.5");
        assert!(config.environment.hot_reload);
        assert!(config.features.is_enabled("double_xp"));
        assert_eq!(sources.last(), Some(&ConfigSource::Environment));
    }

    #[test]
    fn test_explicit_overrides_win_over_env() {
        let dir = TempDir::new().unwrap();
        let (config, sources) = loader(&dir)
            .with_env_vars(vec![("GW__SERVER__BIND_ADDRESS", "0.0.0.0:7000")])
            .with_override("server.bind_address", "127.0.0.1:7100")
            .with_override("logging.json_format", "true")
            .load()
            .unwrap();

        assert_eq!(config.server.bind_address, "127.0.0.1:7100");
        assert!(config.logging.json_format);
        assert_eq!(
            sources,
            vec![
                ConfigSource::Defaults,
                ConfigSource::Environment,
                ConfigSource::Overrides
            ]
        );
    }

    #[test]
    fn test_missing_required_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = loader(&dir)
            .with_required_file(dir.path().join("nope.toml"))
            .load();

        assert!(matches!(result, Err(ConfigError::MissingSource(_))));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("config.toml"), "[server\nbind_address = ").unwrap();

        let result = loader(&dir).load();
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config.toml"),
            "[server]\nmax_connections = \"lots\"\n",
        )
        .unwrap();

        let result = loader(&dir).load();
        assert!(matches!(result, Err(ConfigError::Structure(_))));
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config.toml"),
            "[service]\nversion = \"\"\n",
        )
        .unwrap();

        let result = loader(&dir).load();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_candidate_paths() {
        let dir = TempDir::new().unwrap();
        let paths = loader(&dir)
            .with_file(dir.path().join("extra.toml"))
            .candidate_paths("production");

        assert_eq!(
            paths,
            vec![
                dir.path().join("config.toml"),
                dir.path().join("auth-service.toml"),
                dir.path().join("extra.toml"),
                dir.path().join("auth-service.production.toml"),
            ]
        );
    }
}
