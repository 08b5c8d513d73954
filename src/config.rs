//! Configuration for the frame-ingest binary.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::server::{default_workers, ServerOptions};
use clap::Parser;
use serde::Deserialize;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the ingest server
#[derive(Parser, Debug, Default)]
#[command(name = "frame-ingest")]
#[command(version)]
#[command(about = "A TCP server for NUL-terminated binary messages", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0)
    #[arg(long)]
    pub host: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Accept backlog of the listening socket
    #[arg(short, long)]
    pub backlog: Option<u32>,

    /// Maximum number of connections served at once
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Seconds to wait for connections to finish on shutdown
    #[arg(long)]
    pub shutdown_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Defaults to `max_connections`
    pub backlog: Option<u32>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Seconds to wait for connections to finish on shutdown
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backlog: None,
            max_connections: default_max_connections(),
            workers: None,
            shutdown_timeout: default_shutdown_timeout(),
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

fn default_host() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn default_port() -> u16 {
    8087
}

fn default_max_connections() -> usize {
    16
}

fn default_shutdown_timeout() -> u64 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub backlog: u32,
    pub max_connections: usize,
    pub workers: usize,
    pub shutdown_timeout: Duration,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Merge CLI args over the TOML file they point at, if any.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let server = toml_config.server;
        let max_connections = cli.max_connections.unwrap_or(server.max_connections);

        Config {
            host: cli.host.unwrap_or(server.host),
            port: cli.port.unwrap_or(server.port),
            backlog: cli
                .backlog
                .or(server.backlog)
                .unwrap_or_else(|| max_connections.try_into().unwrap_or(u32::MAX)),
            max_connections,
            workers: cli.workers.or(server.workers).unwrap_or_else(default_workers),
            shutdown_timeout: Duration::from_secs(
                cli.shutdown_timeout.unwrap_or(server.shutdown_timeout),
            ),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }

    /// Server options for this configuration, validated later by `Server::new`.
    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            host: self.host,
            port: self.port,
            backlog: self.backlog,
            max_connections: self.max_connections,
            workers: self.workers,
            shutdown_timeout: self.shutdown_timeout,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {1}", path = .0.display())]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file '{path}': {1}", path = .0.display())]
    TomlParse(PathBuf, #[source] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.host, IpAddr::from([127, 0, 0, 1]));
        assert_eq!(config.server.port, 8087);
        assert_eq!(config.server.max_connections, 16);
        assert_eq!(config.server.shutdown_timeout, 3);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "0.0.0.0"
            port = 9000
            backlog = 64
            max_connections = 128
            workers = 4
            shutdown_timeout = 10

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, IpAddr::from([0, 0, 0, 0]));
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.backlog, Some(64));
        assert_eq!(config.server.max_connections, 128);
        assert_eq!(config.server.workers, Some(4));
        assert_eq!(config.server.shutdown_timeout, 10);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_out_of_range_port_rejected() {
        let result: Result<TomlConfig, _> = toml::from_str("[server]\nport = 70000\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: TomlConfig = toml::from_str(
            r#"
            [server]
            port = 9000
            max_connections = 8

            [logging]
            level = "warn"
            "#,
        )
        .unwrap();
        let cli = CliArgs {
            port: Some(9100),
            log_level: Some("trace".to_string()),
            ..CliArgs::default()
        };

        let config = Config::merge(cli, file);
        assert_eq!(config.port, 9100);
        assert_eq!(config.max_connections, 8);
        // Backlog follows max connections unless set
        assert_eq!(config.backlog, 8);
        assert_eq!(config.log_level, "trace");
        assert_eq!(config.shutdown_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_cli_parsing() {
        let cli = CliArgs::parse_from([
            "frame-ingest",
            "--port",
            "7000",
            "--max-connections",
            "2",
            "--backlog",
            "0",
        ]);
        let config = Config::from_args(cli).unwrap();
        let options = config.server_options();
        assert_eq!(options.port, 7000);
        assert_eq!(options.max_connections, 2);
        assert_eq!(options.backlog, 0);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_missing_file_reported() {
        let cli = CliArgs {
            config: Some(PathBuf::from("/nonexistent/frame-ingest.toml")),
            ..CliArgs::default()
        };
        assert!(matches!(
            Config::from_args(cli),
            Err(ConfigError::FileRead(_, _))
        ));
    }
}
