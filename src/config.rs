//! Configuration module for hello-bench.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values, and every default
//! reproduces the plain benchmark behavior: port 8080 on all interfaces,
//! 1024-byte reads, no idle timeout, no connection limit.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the benchmark server
#[derive(Parser, Debug, Default)]
#[command(name = "hello-bench")]
#[command(version)]
#[command(about = "TCP benchmark server answering every read with a canned HTTP response", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:8080)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Runtime layout: one shared multi-threaded runtime, or one
    /// single-threaded runtime and listener per worker
    #[arg(short = 'r', long, value_enum)]
    pub runtime: Option<RuntimeType>,

    /// Number of worker threads, or shards in sharded mode (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Listen backlog
    #[arg(long)]
    pub backlog: Option<u32>,

    /// Set SO_REUSEPORT on the listening socket
    #[arg(long)]
    pub reuse_port: bool,

    /// Maximum number of concurrent connections (unlimited if unset)
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Pause after an accept error caused by resource exhaustion, in milliseconds
    #[arg(long)]
    pub accept_backoff_ms: Option<u64>,

    /// Read buffer size per connection in bytes
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Set TCP_NODELAY on accepted sockets
    #[arg(long)]
    pub nodelay: Option<bool>,

    /// Close connections idle for this many seconds (0 = never)
    #[arg(long)]
    pub idle_timeout_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// How connections are spread over threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// One multi-threaded tokio runtime, one accept loop.
    #[default]
    Shared,
    /// One thread per worker, each with a current-thread runtime and its own
    /// SO_REUSEPORT listener on the same address.
    Sharded,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and accept loop configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub runtime: RuntimeType,
    /// Number of worker threads or shards
    pub workers: Option<usize>,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    #[serde(default)]
    pub reuse_port: bool,
    pub max_connections: Option<usize>,
    #[serde(default = "default_accept_backoff_ms")]
    pub accept_backoff_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            runtime: RuntimeType::default(),
            workers: None,
            backlog: default_backlog(),
            reuse_port: false,
            max_connections: None,
            accept_backoff_ms: default_accept_backoff_ms(),
        }
    }
}

/// Per-connection configuration
#[derive(Debug, Deserialize)]
pub struct ConnectionConfig {
    /// Read buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
    /// Idle timeout in seconds, 0 disables it
    #[serde(default)]
    pub idle_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            nodelay: default_nodelay(),
            idle_timeout_secs: 0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Port the benchmark clients expect
pub const DEFAULT_PORT: u16 = 8080;

fn default_listen() -> String {
    format!("0.0.0.0:{DEFAULT_PORT}")
}

fn default_backlog() -> u32 {
    1024
}

fn default_accept_backoff_ms() -> u64 {
    100
}

fn default_buffer_size() -> usize {
    1024
}

fn default_nodelay() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub runtime: RuntimeType,
    pub workers: Option<usize>,
    pub backlog: u32,
    pub reuse_port: bool,
    pub max_connections: Option<usize>,
    pub accept_backoff: Duration,
    pub buffer_size: usize,
    pub nodelay: bool,
    pub idle_timeout: Option<Duration>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            runtime: RuntimeType::default(),
            workers: None,
            backlog: default_backlog(),
            reuse_port: false,
            max_connections: None,
            accept_backoff: Duration::from_millis(default_accept_backoff_ms()),
            buffer_size: default_buffer_size(),
            nodelay: default_nodelay(),
            idle_timeout: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = match cli.config {
            Some(ref config_path) => {
                let contents = std::fs::read_to_string(config_path)
                    .map_err(|source| ConfigError::FileRead {
                        path: config_path.clone(),
                        source,
                    })?;
                toml::from_str(&contents)
                    .map_err(|source| ConfigError::TomlParse {
                        path: config_path.clone(),
                        source,
                    })?
            }
            None => TomlConfig::default(),
        };

        Self::resolve(cli, toml_config)
    }

    /// Merge CLI args over TOML values and validate the result.
    pub fn resolve(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let TomlConfig {
            server,
            connection,
            logging,
        } = toml_config;

        let listen_str = cli.listen.unwrap_or(server.listen);
        let listen = listen_str
            .parse()
            .map_err(|_| ConfigError::InvalidListen(listen_str.clone()))?;

        let backlog = cli.backlog.unwrap_or(server.backlog);
        if backlog == 0 {
            return Err(ConfigError::Invalid("backlog must be greater than zero"));
        }

        let buffer_size = cli.buffer_size.unwrap_or(connection.buffer_size);
        if buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be greater than zero"));
        }

        let max_connections = cli.max_connections.or(server.max_connections);
        if max_connections == Some(0) {
            return Err(ConfigError::Invalid(
                "max_connections must be greater than zero",
            ));
        }

        let idle_timeout_secs = cli
            .idle_timeout_secs
            .unwrap_or(connection.idle_timeout_secs);

        Ok(Config {
            listen,
            runtime: cli.runtime.unwrap_or(server.runtime),
            // 0 workers means "let the runtime decide"
            workers: cli.workers.or(server.workers).filter(|&n| n > 0),
            backlog,
            reuse_port: cli.reuse_port || server.reuse_port,
            max_connections,
            accept_backoff: Duration::from_millis(
                cli.accept_backoff_ms.unwrap_or(server.accept_backoff_ms),
            ),
            buffer_size,
            nodelay: cli.nodelay.unwrap_or(connection.nodelay),
            idle_timeout: (idle_timeout_secs > 0).then(|| Duration::from_secs(idle_timeout_secs)),
            log_level: cli.log_level.unwrap_or(logging.level),
        })
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid listen address '{0}'")]
    InvalidListen(String),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
