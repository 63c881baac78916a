//! Configuration for the Telecare consultation relay.
//!
//! Values are merged from four layers, highest priority first:
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`<config_dir>/telecare-relay/config.toml`)
//! 4. Compiled defaults
//!
//! ```toml
//! [server]
//! bind_addr = "0.0.0.0:5000"
//! max_payload_size = 16384
//!
//! [log]
//! level = "info,telecare_relay=debug"
//! ```

use std::path::{Path, PathBuf};

use crate::relay::DEFAULT_MAX_PAYLOAD_SIZE;

/// Default listen address for the relay.
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";

/// Default tracing filter.
const DEFAULT_LOG_LEVEL: &str = "info";

/// Errors that can occur when loading relay configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

/// On-disk layout of the config file. Every key is optional.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RelayConfigFile {
    server: ServerSection,
    log: LogSection,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerSection {
    bind_addr: Option<String>,
    max_payload_size: Option<usize>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct LogSection {
    level: Option<String>,
}

/// CLI arguments for the relay server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Telecare consultation chat relay")]
pub struct RelayCliArgs {
    /// Address to bind the relay server to.
    #[arg(short, long, env = "RELAY_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `<config_dir>/telecare-relay/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum inbound frame size in bytes.
    #[arg(long)]
    pub max_payload_size: Option<usize>,

    /// Tracing filter (e.g. `info`, `debug`, `warn,telecare_relay=trace`).
    #[arg(long, env = "RELAY_LOG")]
    pub log_level: Option<String>,
}

/// Fully resolved relay server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Address to bind the server to.
    pub bind_addr: String,
    /// Inbound frames larger than this many bytes are rejected.
    pub max_payload_size: usize,
    /// Tracing filter used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl RelayConfig {
    /// Loads configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// An explicit `--config` path must exist. Without one, the default
    /// path is tried and a missing file counts as empty.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a config file cannot be read or parsed.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = match cli.config.as_deref() {
            Some(path) => read_config_file(path)?,
            None => match default_config_path() {
                Some(path) => read_optional_config_file(&path)?,
                None => RelayConfigFile::default(),
            },
        };
        Ok(Self::resolve(cli, file))
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &RelayCliArgs, file: RelayConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or(file.server.bind_addr)
                .unwrap_or(defaults.bind_addr),
            max_payload_size: cli
                .max_payload_size
                .or(file.server.max_payload_size)
                .unwrap_or(defaults.max_payload_size),
            log_level: cli
                .log_level
                .clone()
                .or(file.log.level)
                .unwrap_or(defaults.log_level),
        }
    }
}

/// The config file [`RelayConfig::load`] reads: the `--config` path if
/// given, else the default location.
#[must_use]
pub fn config_file_path(cli: &RelayCliArgs) -> Option<PathBuf> {
    cli.config.clone().or_else(default_config_path)
}

/// `<config_dir>/telecare-relay/config.toml`, if the platform has a
/// config directory.
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("telecare-relay").join("config.toml"))
}

/// Reads a config file that must exist.
fn read_config_file(path: &Path) -> Result<RelayConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&contents)?)
}

/// Reads a config file, treating a missing file as empty.
fn read_optional_config_file(path: &Path) -> Result<RelayConfigFile, ConfigError> {
    match read_config_file(path) {
        Err(ConfigError::ReadFile { source, .. })
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            Ok(RelayConfigFile::default())
        }
        other => other,
    }
}
