//! Configuration module for the slow-digest server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Default number of client slots.
pub const DEFAULT_MAX_CLIENTS: usize = 50;

/// Command-line arguments for the digest server
#[derive(Parser, Debug)]
#[command(name = "slow-digest")]
#[command(author = "slow-digest authors")]
#[command(version = "0.1.0")]
#[command(about = "A concurrent TCP digest server with a bounded FIFO cache", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Port to listen on (0 picks an ephemeral port)
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Number of recent digests to remember (0 disables the cache)
    #[arg(short = 'C', long = "cache")]
    pub cache: Option<usize>,

    /// Address to bind to
    #[arg(short = 'l', long)]
    pub host: Option<String>,

    /// Number of client slots
    #[arg(long)]
    pub max_clients: Option<usize>,

    /// Listen backlog
    #[arg(long)]
    pub backlog: Option<i32>,

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
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    pub port: Option<u16>,
    /// Number of client slots
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            max_clients: default_max_clients(),
            backlog: default_backlog(),
        }
    }
}

/// Digest cache configuration
#[derive(Debug, Deserialize, Default)]
pub struct CacheConfig {
    /// Number of entries kept (0 = disabled)
    #[serde(default)]
    pub capacity: usize,
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

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_max_clients() -> usize {
    DEFAULT_MAX_CLIENTS
}

fn default_backlog() -> i32 {
    128
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub cache_capacity: usize,
    pub max_clients: usize,
    pub backlog: i32,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 0,
            cache_capacity: 0,
            max_clients: DEFAULT_MAX_CLIENTS,
            backlog: default_backlog(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence) and validate.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let port = cli
            .port
            .or(toml_config.server.port)
            .ok_or(ConfigError::MissingPort)?;

        let config = Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port,
            cache_capacity: cli.cache.unwrap_or(toml_config.cache.capacity),
            max_clients: cli.max_clients.unwrap_or(toml_config.server.max_clients),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };

        if config.max_clients == 0 {
            return Err(ConfigError::Invalid("max_clients must be at least 1"));
        }
        if config.backlog <= 0 {
            return Err(ConfigError::Invalid("backlog must be positive"));
        }

        Ok(config)
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    MissingPort,
    Invalid(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::MissingPort => write!(f, "ERROR, no valid port value"),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        let mut argv = vec!["slow-digest"];
        argv.extend_from_slice(args);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, None);
        assert_eq!(config.server.max_clients, 50);
        assert_eq!(config.cache.capacity, 0);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_cli_short_flags() {
        let config = Config::merge(cli(&["-p", "3456", "-C", "10"]), TomlConfig::default()).unwrap();
        assert_eq!(config.port, 3456);
        assert_eq!(config.cache_capacity, 10);
        assert_eq!(config.max_clients, DEFAULT_MAX_CLIENTS);
    }

    #[test]
    fn test_cache_defaults_to_disabled() {
        let config = Config::merge(cli(&["-p", "0"]), TomlConfig::default()).unwrap();
        assert_eq!(config.port, 0);
        assert_eq!(config.cache_capacity, 0);
    }

    #[test]
    fn test_invalid_cli_values_rejected() {
        assert!(CliArgs::try_parse_from(["slow-digest", "-p", "70000"]).is_err());
        assert!(CliArgs::try_parse_from(["slow-digest", "-p", "abc"]).is_err());
        assert!(CliArgs::try_parse_from(["slow-digest", "-p", "1", "-C", "-3"]).is_err());
    }

    #[test]
    fn test_missing_port() {
        let err = Config::merge(cli(&["-C", "3"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingPort));
    }

    #[test]
    fn test_zero_max_clients_rejected() {
        let err = Config::merge(cli(&["-p", "1", "--max-clients", "0"]), TomlConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            port = 9000
            max_clients = 8

            [cache]
            capacity = 32

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, Some(9000));
        assert_eq!(config.server.max_clients, 8);
        assert_eq!(config.server.backlog, 128);
        assert_eq!(config.cache.capacity, 32);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let file: TomlConfig = toml::from_str(
            r#"
            [server]
            port = 9000
            [cache]
            capacity = 32
        "#,
        )
        .unwrap();

        let config = Config::merge(cli(&["-C", "4"]), file).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.cache_capacity, 4);
    }
}
