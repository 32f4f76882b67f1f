//! Configuration module for the readyhttp server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::error::ConfigError;
use crate::http::Version;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the HTTP server
#[derive(Parser, Debug, Default)]
#[command(name = "readyhttp")]
#[command(author = "readyhttp authors")]
#[command(version = "0.1.0")]
#[command(about = "A minimal multi-threaded HTTP server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Number of worker threads
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Listener and pool configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Fixed number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Pending connection queue length passed to listen(2)
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Protocol version requests must declare
    #[serde(default = "default_http_version")]
    pub http_version: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: default_workers(),
            backlog: default_backlog(),
            http_version: default_http_version(),
        }
    }
}

/// Event loop configuration
#[derive(Debug, Deserialize)]
pub struct RuntimeSection {
    /// Maximum live connections per worker
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Maximum readiness events drained per poll
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    /// Fixed per-connection buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Upper bound on a single poll wait, in milliseconds
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_events: default_max_events(),
            buffer_size: default_buffer_size(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    5
}

fn default_backlog() -> i32 {
    1000
}

fn default_http_version() -> String {
    "HTTP/1.1".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_events() -> usize {
    1024
}

fn default_buffer_size() -> usize {
    4096
}

fn default_poll_timeout_ms() -> u64 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub backlog: i32,
    pub http_version: Version,
    pub max_connections: usize,
    pub max_events: usize,
    pub buffer_size: usize,
    pub poll_timeout: Duration,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: default_workers(),
            backlog: default_backlog(),
            http_version: Version::Http11,
            max_connections: default_max_connections(),
            max_events: default_max_events(),
            buffer_size: default_buffer_size(),
            poll_timeout: Duration::from_millis(default_poll_timeout_ms()),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path).map_err(|source| {
                ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                }
            })?;
            toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
                path: config_path.clone(),
                source,
            })?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over TOML values and validate the result.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let http_version = toml_config
            .server
            .http_version
            .parse::<Version>()
            .map_err(|_| {
                ConfigError::Invalid(format!(
                    "unknown http_version '{}'",
                    toml_config.server.http_version
                ))
            })?;

        let config = Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            workers: cli.workers.unwrap_or(toml_config.server.workers),
            backlog: toml_config.server.backlog,
            http_version,
            max_connections: toml_config.runtime.max_connections,
            max_events: toml_config.runtime.max_events,
            buffer_size: toml_config.runtime.buffer_size,
            poll_timeout: Duration::from_millis(toml_config.runtime.poll_timeout_ms),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be non-zero".into()));
        }
        if self.max_events == 0 {
            return Err(ConfigError::Invalid("max_events must be non-zero".into()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be non-zero".into(),
            ));
        }
        if self.backlog <= 0 {
            return Err(ConfigError::Invalid("backlog must be positive".into()));
        }
        Ok(())
    }
}
