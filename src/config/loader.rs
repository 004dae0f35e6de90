use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::types::Config;

/// Lowest port the GDB stub may not use; valid ports are above it.
const GDB_PORT_FLOOR: u16 = 1024;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid peripheral configuration provided: '{0}'")]
    MalformedPeripheral(String),

    #[error("Invalid peripheral name supplied '{0}'")]
    UnknownPeripheral(String),

    #[error("Invalid supplied GDB port '{0}'. Must be 1024 < port <= 65535")]
    InvalidGdbPort(String),

    #[error("Invalid MAC address '{0}'. Expected xx:xx:xx:xx:xx:xx")]
    InvalidMac(String),

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

/// Parses a GDB port, accepting only `1024 < port <= 65535`.
pub fn parse_gdb_port(value: &str) -> Result<u16, ConfigError> {
    let port: i64 = value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidGdbPort(value.to_string()))?;
    match u16::try_from(port) {
        Ok(port) if port > GDB_PORT_FLOOR => Ok(port),
        _ => Err(ConfigError::InvalidGdbPort(value.to_string())),
    }
}

fn is_valid_mac(mac: &str) -> bool {
    let octets: Vec<&str> = mac.split(':').collect();
    octets.len() == 6
        && octets
            .iter()
            .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit()))
}

impl Config {
    /// Returns the path to the configuration file.
    ///
    /// Uses `~/.config/drumfish/config.toml` on Linux, or the platform
    /// equivalent via `dirs::config_dir()`. Falls back to the current
    /// directory if config_dir is unavailable.
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("drumfish").join("config.toml")
    }

    /// Loads configuration from the default config file.
    ///
    /// A missing file yields `Config::default()`.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();

        if !path.exists() {
            return Ok(Config::default());
        }

        Self::load_from(&path)
    }

    /// Loads and validates configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// Checks:
    /// - The GDB port, if any, is above 1024
    /// - The MAC address, if any, is six colon-separated hex octets
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(port) = self.gdb_port {
            if port <= GDB_PORT_FLOOR {
                return Err(ConfigError::InvalidGdbPort(port.to_string()));
            }
        }

        if let Some(mac) = &self.mac {
            if !is_valid_mac(mac) {
                return Err(ConfigError::InvalidMac(mac.clone()));
            }
        }

        Ok(())
    }
}
