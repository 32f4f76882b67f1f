//! Error types for server lifecycle and configuration.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the server's setup API.
///
/// Per-connection failures never appear here; workers close the affected
/// connection and keep serving.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid listen address '{0}'")]
    InvalidAddress(String),

    /// Listening socket creation, option, bind or listen failure.
    #[error("listening socket error: {0}")]
    Socket(#[source] io::Error),

    /// Readiness multiplexer creation or registration failure.
    #[error("multiplexer error: {0}")]
    Multiplex(#[source] io::Error),

    #[error("failed to spawn thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("server is already running")]
    AlreadyRunning,

    #[error("server is not running")]
    NotRunning,

    /// Handlers cannot be added once the routing table is shared with
    /// running threads.
    #[error("routing table is frozen while the server is running")]
    RoutesFrozen,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
