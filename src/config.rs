//! Configuration for the server and the bundled binary.
//!
//! The library is configured through [`ServerConfig`]. The binary
//! resolves its settings from command-line arguments and an optional
//! TOML file; CLI arguments take precedence over config file values.

use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

use crate::acl::Policy;

/// Immutable settings for a [`TcpServer`](crate::TcpServer).
///
/// Set at construction and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on.
    pub port: u16,
    /// Interface address to bind; all interfaces when `None`.
    pub bind_address: Option<IpAddr>,
    /// Admission decision for peers matching no ACL rule.
    pub default_policy: Policy,
    /// Ceiling on concurrently served sessions; defaults to the number
    /// of available processing units.
    pub max_concurrency: Option<NonZeroUsize>,
}

impl ServerConfig {
    /// Settings for a server on `port` admitting everyone by default.
    pub fn new(port: u16) -> Self {
        ServerConfig {
            port,
            bind_address: None,
            default_policy: Policy::Allow,
            max_concurrency: None,
        }
    }
}

/// Command-line arguments for the echo server binary.
#[derive(Parser, Debug)]
#[command(name = "lineserver")]
#[command(version = "0.1.0")]
#[command(about = "A line-oriented TCP echo server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Interface address to bind (e.g. 127.0.0.1)
    #[arg(short, long)]
    pub bind: Option<IpAddr>,

    /// Admission decision for peers matching no ACL rule
    #[arg(long, value_enum)]
    pub default_policy: Option<Policy>,

    /// Maximum number of concurrently served sessions
    #[arg(short = 'n', long)]
    pub max_connections: Option<NonZeroUsize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Interface address to bind
    pub bind: Option<IpAddr>,
    /// Default admission policy
    #[serde(default = "default_policy")]
    pub default_policy: Policy,
    /// Maximum number of concurrently served sessions
    pub max_connections: Option<NonZeroUsize>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: None,
            default_policy: default_policy(),
            max_connections: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    /// Log level
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

fn default_port() -> u16 {
    2000
}

fn default_policy() -> Policy {
    Policy::Allow
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration for the binary
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind_address: Option<IpAddr>,
    pub default_policy: Policy,
    pub max_connections: Option<NonZeroUsize>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

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
        Ok(Config {
            port: cli.port.unwrap_or(toml_config.server.port),
            bind_address: cli.bind.or(toml_config.server.bind),
            default_policy: cli
                .default_policy
                .unwrap_or(toml_config.server.default_policy),
            max_connections: cli.max_connections.or(toml_config.server.max_connections),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }

    /// The [`ServerConfig`] slice of the resolved configuration.
    pub fn server(&self) -> ServerConfig {
        ServerConfig {
            port: self.port,
            bind_address: self.bind_address,
            default_policy: self.default_policy,
            max_concurrency: self.max_connections,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, std::io::Error),
    #[error("failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, toml::de::Error),
}
