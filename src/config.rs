//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::Deserialize;
use serde::de::Error;
use std::fs;
use std::path::Path;

use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub serial: SerialConfig,
    pub transaction: TransactionSettings,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// Request/reply timing configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TransactionSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_frame_grace_ms")]
    pub frame_grace_ms: u64,
}

/// Monitoring server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server root, also the prefix of the upload URL
    pub base_url: String,

    /// Container (monitor) number, part of the specifications path
    pub container: String,

    /// Path appended after the container number
    pub spec_uri: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Local storage configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_readings_file")]
    pub readings_file: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily log files; empty logs to the console only
    #[serde(default)]
    pub log_dir: String,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 19200 }

fn default_poll_interval_ms() -> u64 { 50 }
fn default_response_timeout_ms() -> u64 { 2500 }
fn default_max_attempts() -> u32 { 4 }
fn default_retry_delay_ms() -> u64 { 50 }
fn default_frame_grace_ms() -> u64 { 500 }

fn default_request_timeout_ms() -> u64 { 10000 }

fn default_readings_file() -> String { "lastread.json".to_string() }

fn default_log_level() -> String { "info".to_string() }

const VALID_BAUD_RATES: [u32; 5] = [9600, 19200, 38400, 57600, 115200];
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tempmon::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Full URL of the runtime specifications endpoint
    pub fn specifications_url(&self) -> String {
        format!(
            "{}{}{}",
            self.server.base_url, self.server.container, self.server.spec_uri
        )
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        // Validate serial port configuration
        if self.serial.port.is_empty() {
            return Err(crate::error::TempmonError::Config(
                toml::de::Error::custom("serial port cannot be empty")
            ));
        }

        if !VALID_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(crate::error::TempmonError::Config(
                toml::de::Error::custom("baud_rate must be one of: 9600, 19200, 38400, 57600, 115200")
            ));
        }

        // Validate timing fields
        if self.transaction.poll_interval_ms == 0 || self.transaction.poll_interval_ms > 1000 {
            return Err(crate::error::TempmonError::Config(
                toml::de::Error::custom("poll_interval_ms must be between 1 and 1000")
            ));
        }

        if self.transaction.response_timeout_ms == 0 || self.transaction.response_timeout_ms > 60000 {
            return Err(crate::error::TempmonError::Config(
                toml::de::Error::custom("response_timeout_ms must be between 1 and 60000")
            ));
        }

        if self.transaction.poll_interval_ms > self.transaction.response_timeout_ms {
            return Err(crate::error::TempmonError::Config(
                toml::de::Error::custom("poll_interval_ms must not exceed response_timeout_ms")
            ));
        }

        if self.transaction.max_attempts == 0 || self.transaction.max_attempts > 10 {
            return Err(crate::error::TempmonError::Config(
                toml::de::Error::custom("max_attempts must be between 1 and 10")
            ));
        }

        if self.transaction.retry_delay_ms > 10000 {
            return Err(crate::error::TempmonError::Config(
                toml::de::Error::custom("retry_delay_ms must be at most 10000")
            ));
        }

        if self.transaction.frame_grace_ms > 60000 {
            return Err(crate::error::TempmonError::Config(
                toml::de::Error::custom("frame_grace_ms must be at most 60000")
            ));
        }

        // Validate server configuration
        for (name, value) in [
            ("base_url", &self.server.base_url),
            ("container", &self.server.container),
            ("spec_uri", &self.server.spec_uri),
        ] {
            if value.is_empty() {
                return Err(crate::error::TempmonError::Config(
                    toml::de::Error::custom(format!("server {} cannot be empty", name))
                ));
            }
        }

        if !self.server.base_url.starts_with("http://") && !self.server.base_url.starts_with("https://") {
            return Err(crate::error::TempmonError::Config(
                toml::de::Error::custom("base_url must start with http:// or https://")
            ));
        }

        if self.server.password.is_empty() != self.server.username.is_empty() {
            return Err(crate::error::TempmonError::Config(
                toml::de::Error::custom("username and password must be set together")
            ));
        }

        if self.server.request_timeout_ms == 0 || self.server.request_timeout_ms > 120000 {
            return Err(crate::error::TempmonError::Config(
                toml::de::Error::custom("request_timeout_ms must be between 1 and 120000")
            ));
        }

        // Validate storage
        if self.storage.readings_file.is_empty() {
            return Err(crate::error::TempmonError::Config(
                toml::de::Error::custom("readings_file cannot be empty")
            ));
        }

        // Validate log level
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(crate::error::TempmonError::Config(
                toml::de::Error::custom("log level must be one of: trace, debug, info, warn, error")
            ));
        }

        Ok(())
    }
}
