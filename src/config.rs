//! Configuration for redframe servers.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values, which take
//! precedence over built-in defaults. Library users can skip both and start
//! from `Config::default()`.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// How a connection's request dialect is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DialectPolicy {
    /// Detect the dialect of every request from its first byte.
    #[default]
    Redetect,
    /// Fix the dialect from the first byte a connection sends.
    Pinned,
}

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "redframe")]
#[command(author = "redframe authors")]
#[command(version = "0.1.0")]
#[command(about = "A Redis-protocol server framework", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:6380)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Number of worker threads (0 = number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum concurrent connections per worker
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Give each worker its own SO_REUSEPORT listener
    #[arg(long)]
    pub reuse_port: Option<bool>,

    /// Maximum unframed bytes held per connection (0 = unlimited)
    #[arg(long)]
    pub max_buffer_size: Option<usize>,

    /// Request dialect policy
    #[arg(long, value_enum)]
    pub dialect_policy: Option<DialectPolicy>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Number of worker threads (0 = number of CPU cores)
    #[serde(default)]
    pub workers: usize,
    /// Maximum concurrent connections per worker
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Events processed per poll
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: 0,
            max_connections: default_max_connections(),
            batch_size: default_batch_size(),
            backlog: default_backlog(),
        }
    }
}

/// Socket-level configuration
#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_true")]
    pub reuse_port: bool,
    #[serde(default = "default_true")]
    pub tcp_nodelay: bool,
    /// Keep-alive idle time in seconds (0 = disabled)
    #[serde(default)]
    pub tcp_keepalive: u64,
    /// Keep-alive probe interval in seconds (0 = system default)
    #[serde(default)]
    pub tcp_keep_interval: u64,
    /// Keep-alive probe count (0 = system default)
    #[serde(default)]
    pub tcp_keep_count: u32,
    /// SO_RCVBUF in bytes (0 = system default)
    #[serde(default)]
    pub socket_recv_buffer: usize,
    /// SO_SNDBUF in bytes (0 = system default)
    #[serde(default)]
    pub socket_send_buffer: usize,
    /// Size of the per-worker read buffer
    #[serde(default = "default_read_buffer_cap")]
    pub read_buffer_cap: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            reuse_port: true,
            tcp_nodelay: true,
            tcp_keepalive: 0,
            tcp_keep_interval: 0,
            tcp_keep_count: 0,
            socket_recv_buffer: 0,
            socket_send_buffer: 0,
            read_buffer_cap: default_read_buffer_cap(),
        }
    }
}

/// Per-connection session configuration
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    /// Maximum unframed bytes held per connection (0 = unlimited)
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
    #[serde(default)]
    pub dialect_policy: DialectPolicy,
    /// Close a connection after replying to a protocol error
    #[serde(default = "default_true")]
    pub close_on_protocol_error: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: default_max_buffer_size(),
            dialect_policy: DialectPolicy::default(),
            close_on_protocol_error: true,
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

fn default_listen() -> String {
    "127.0.0.1:6380".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_batch_size() -> usize {
    1024
}

fn default_backlog() -> i32 {
    1024
}

fn default_read_buffer_cap() -> usize {
    64 * 1024 // 64 KB
}

fn default_max_buffer_size() -> usize {
    1024 * 1024 * 1024 // 1 GB
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub workers: usize,
    pub max_connections: usize,
    pub batch_size: usize,
    pub backlog: i32,
    pub reuse_port: bool,
    pub tcp_nodelay: bool,
    pub tcp_keepalive: u64,
    pub tcp_keep_interval: u64,
    pub tcp_keep_count: u32,
    pub socket_recv_buffer: usize,
    pub socket_send_buffer: usize,
    pub read_buffer_cap: usize,
    pub max_buffer_size: usize,
    pub dialect_policy: DialectPolicy,
    pub close_on_protocol_error: bool,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config::from_toml(TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Resolve configuration from already-parsed CLI args.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        // Merge CLI args with TOML config (CLI takes precedence)
        let mut config = Config::from_toml(toml_config);
        if let Some(listen) = cli.listen {
            config.listen = listen;
        }
        if let Some(workers) = cli.workers {
            config.workers = workers;
        }
        if let Some(max_connections) = cli.max_connections {
            config.max_connections = max_connections;
        }
        if let Some(reuse_port) = cli.reuse_port {
            config.reuse_port = reuse_port;
        }
        if let Some(max_buffer_size) = cli.max_buffer_size {
            config.max_buffer_size = max_buffer_size;
        }
        if let Some(policy) = cli.dialect_policy {
            config.dialect_policy = policy;
        }
        if cli.log_level != "info" {
            config.log_level = cli.log_level;
        }

        config.validate()?;
        Ok(config)
    }

    fn from_toml(toml: TomlConfig) -> Self {
        Config {
            listen: toml.server.listen,
            workers: toml.server.workers,
            max_connections: toml.server.max_connections,
            batch_size: toml.server.batch_size,
            backlog: toml.server.backlog,
            reuse_port: toml.network.reuse_port,
            tcp_nodelay: toml.network.tcp_nodelay,
            tcp_keepalive: toml.network.tcp_keepalive,
            tcp_keep_interval: toml.network.tcp_keep_interval,
            tcp_keep_count: toml.network.tcp_keep_count,
            socket_recv_buffer: toml.network.socket_recv_buffer,
            socket_send_buffer: toml.network.socket_send_buffer,
            read_buffer_cap: toml.network.read_buffer_cap,
            max_buffer_size: toml.session.max_buffer_size,
            dialect_policy: toml.session.dialect_policy,
            close_on_protocol_error: toml.session.close_on_protocol_error,
            log_level: toml.logging.level,
        }
    }

    /// Check values the event loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_buffer_cap == 0 {
            return Err(ConfigError::Invalid("read_buffer_cap must be non-zero"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be non-zero"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be non-zero"));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}", path = .0.display(), source = .1)]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{path}': {source}", path = .0.display(), source = .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
