//! Configuration management for the davgate daemon.
//!
//! Configuration is read from a TOML, JSON or YAML file, chosen by extension.
//! Without an explicit path the daemon looks for `config.{toml,json,yaml,yml}`
//! in the working directory, then in `/etc/davgate/`, then in the platform
//! config directory (`~/.config/davgate/` on Linux).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("no user defined")]
    NoUsers,

    #[error("user #{0} needs a username")]
    EmptyUsername(usize),

    #[error("user {0} needs a password")]
    EmptyPassword(String),

    #[error("user {0} is defined more than once")]
    DuplicateUser(String),

    #[error("realm must be non-empty and must not contain '\"', got {0:?}")]
    InvalidRealm(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("unsupported config file extension: {0}")]
    UnsupportedFormat(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// File names tried when no config path is given.
const CONFIG_FILE_NAMES: &[&str] = &["config.toml", "config.json", "config.yaml", "config.yml"];

/// System-wide config directory.
const SYSTEM_CONFIG_DIR: &str = "/etc/davgate";

/// Username of the fallback identity.
pub const DEFAULT_USERNAME: &str = "default";

/// Main configuration structure for the davgate daemon.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Address to listen on.
    pub address: String,

    /// Port to listen on (0 picks an ephemeral port).
    #[serde(deserialize_with = "deserialize_port")]
    pub port: u16,

    /// Default root directory for users without their own scope.
    pub scope: PathBuf,

    /// Default modify permission for users without their own setting.
    pub modify: bool,

    /// Realm announced in the `WWW-Authenticate` challenge.
    pub realm: String,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Append audit records to this file instead of the log.
    pub audit_log: Option<PathBuf>,

    /// Known users.
    pub users: Vec<UserConfig>,
}

/// A configured user.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct UserConfig {
    /// Login name.
    pub username: String,

    /// Plaintext password.
    pub password: String,

    /// Root directory override.
    #[serde(default)]
    pub scope: Option<PathBuf>,

    /// Modify permission override.
    #[serde(default)]
    pub modify: Option<bool>,
}

impl UserConfig {
    /// Create a user inheriting the default scope and modify flag.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            scope: None,
            modify: None,
        }
    }

    /// Override the root directory.
    pub fn with_scope(mut self, scope: impl Into<PathBuf>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Override the modify permission.
    pub fn with_modify(mut self, modify: bool) -> Self {
        self.modify = Some(modify);
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 0,
            scope: PathBuf::from("./"),
            modify: true,
            realm: "Restricted".to_string(),
            log_level: "info".to_string(),
            audit_log: None,
            users: Vec::new(),
        }
    }
}

/// Serialization format of a config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
    Yaml,
}

impl ConfigFormat {
    /// Pick the format from the file extension.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "toml" => Ok(Self::Toml),
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Ports may be written as numbers or as strings.
fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Candidate config files, in lookup order.
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut search_dirs = vec![PathBuf::new(), PathBuf::from(SYSTEM_CONFIG_DIR)];
    if let Some(config_dir) = dirs::config_dir() {
        search_dirs.push(config_dir.join("davgate"));
    }

    search_dirs
        .iter()
        .flat_map(|dir| CONFIG_FILE_NAMES.iter().map(move |name| dir.join(name)))
        .collect()
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - DAVGATE_ADDRESS: Override listen address
    /// - DAVGATE_PORT: Override listen port
    /// - DAVGATE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(address) = std::env::var("DAVGATE_ADDRESS") {
            if !address.is_empty() {
                tracing::info!("Overriding address from environment: {}", address);
                self.address = address;
            }
        }

        if let Ok(port) = std::env::var("DAVGATE_PORT") {
            if !port.is_empty() {
                match port.trim().parse::<u16>() {
                    Ok(port) => {
                        tracing::info!("Overriding port from environment: {}", port);
                        self.port = port;
                    }
                    Err(e) => {
                        tracing::warn!("Ignoring invalid DAVGATE_PORT {:?}: {}", port, e);
                    }
                }
            }
        }

        if let Ok(level) = std::env::var("DAVGATE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.users.is_empty() {
            return Err(ConfigError::NoUsers);
        }

        let mut seen = std::collections::HashSet::new();
        for (index, user) in self.users.iter().enumerate() {
            if user.username.is_empty() {
                return Err(ConfigError::EmptyUsername(index + 1));
            }
            if user.password.is_empty() {
                return Err(ConfigError::EmptyPassword(user.username.clone()));
            }
            if !seen.insert(user.username.as_str()) {
                return Err(ConfigError::DuplicateUser(user.username.clone()));
            }
        }

        if self.realm.is_empty() || self.realm.contains('"') {
            return Err(ConfigError::InvalidRealm(self.realm.clone()));
        }

        let level = self.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.log_level.clone()));
        }

        Ok(())
    }

    /// `address:port` to bind.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Load configuration from a file, picking the parser by extension.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents, format)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Find the first existing default config file.
    pub fn discover() -> Option<PathBuf> {
        default_config_paths().into_iter().find(|p| p.is_file())
    }

    /// Load configuration from the first default location that exists.
    pub fn load_default() -> Result<Self> {
        let path = Self::discover().ok_or_else(|| {
            anyhow::anyhow!("no config file specified; couldn't find any config.{{toml,json,yaml,yml}}")
        })?;
        tracing::debug!("Using config file {:?}", path);
        Self::load(path)
    }

    /// Parse configuration text in the given format.
    pub fn parse(contents: &str, format: ConfigFormat) -> Result<Self> {
        match format {
            ConfigFormat::Toml => Self::from_toml(contents),
            ConfigFormat::Json => Self::from_json(contents),
            ConfigFormat::Yaml => Self::from_yaml(contents),
        }
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| anyhow::anyhow!("Invalid JSON configuration: {}", e))
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml_str: &str) -> Result<Self> {
        // an empty document deserializes as null, which means "all defaults"
        if yaml_str.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml_str)
            .map_err(|e| anyhow::anyhow!("Invalid YAML configuration: {}", e))
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
