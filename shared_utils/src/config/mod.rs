//! Configuration management for the tunnel monitor.
//!
//! Settings are read from a TOML file, then environment variables with the
//! `TUNNELMON_` prefix are applied on top. Every section and field is
//! optional in the file; missing values take their defaults.

use monitor_ipc::ChannelKind;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading or writing the configuration file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] io::Error),

    /// Error parsing TOML configuration
    #[error("Failed to parse TOML config: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Error serializing configuration to TOML
    #[error("Failed to serialize config to TOML: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    /// Invalid configuration value
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),
}

/// Log levels accepted in `log_level`.
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Which channel the controller uses to reach the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    /// Unix domain socket to `monitor_helper`
    #[default]
    Socket,
    /// In-process loop-back double
    Loopback,
}

/// Channel settings for the controller.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    /// Channel implementation (default: socket)
    #[serde(default)]
    pub mode: ChannelMode,

    /// Provider socket to connect to in socket mode
    #[serde(default = "default_socket_path")]
    pub socket_path: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            mode: ChannelMode::default(),
            socket_path: default_socket_path(),
        }
    }
}

fn default_socket_path() -> String {
    "/var/run/tunnelmon/provider.sock".to_string()
}

/// Polling and I/O timing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// Interval between status polls in milliseconds (default: 1000)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Per-frame socket read/write timeout in milliseconds (default: 5000)
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_io_timeout_ms() -> u64 {
    5000
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            poll_interval_ms: default_poll_interval_ms(),
            io_timeout_ms: default_io_timeout_ms(),
        }
    }
}

/// Settings for the provider host daemon.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HelperConfig {
    /// Socket the helper listens on
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Version string reported in service status replies
    #[serde(default = "default_provider_version")]
    pub provider_version: String,
}

fn default_provider_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for HelperConfig {
    fn default() -> Self {
        HelperConfig {
            socket_path: default_socket_path(),
            provider_version: default_provider_version(),
        }
    }
}

/// Log output settings. The level is the top-level `log_level`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Also write logs to a daily rolling file (default: false)
    #[serde(default)]
    pub file: bool,

    /// Directory for log files (default: "./logs")
    #[serde(default = "default_log_dir")]
    pub dir: String,

    /// Base name of log files (default: "tunnelmon")
    #[serde(default = "default_log_file_name")]
    pub file_name: String,

    /// Emit logs as JSON (default: false)
    #[serde(default)]
    pub json: bool,
}

fn default_log_dir() -> String {
    "./logs".to_string()
}

fn default_log_file_name() -> String {
    "tunnelmon".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            file: false,
            dir: default_log_dir(),
            file_name: default_log_file_name(),
            json: false,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Log level (default: "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Controller channel configuration
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Polling configuration
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Helper daemon configuration
    #[serde(default)]
    pub helper: HelperConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            logging: LoggingConfig::default(),
            channel: ChannelConfig::default(),
            monitor: MonitorConfig::default(),
            helper: HelperConfig::default(),
        }
    }
}

impl Config {
    /// Create a new default configuration
    pub fn new() -> Self {
        Config::default()
    }

    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.validate()?;

        // Environment variables take precedence over the file
        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(invalid(
                "log_level",
                format!("must be one of {}", LOG_LEVELS.join(", ")),
            ));
        }

        if self.logging.file
            && (self.logging.dir.trim().is_empty() || self.logging.file_name.trim().is_empty())
        {
            return Err(invalid(
                "logging",
                "dir and file_name cannot be empty when file logging is on",
            ));
        }

        if self.channel.mode == ChannelMode::Socket && self.channel.socket_path.trim().is_empty() {
            return Err(invalid(
                "channel.socket_path",
                "socket path cannot be empty in socket mode",
            ));
        }

        if self.monitor.poll_interval_ms == 0 {
            return Err(invalid("monitor.poll_interval_ms", "must be greater than 0"));
        }

        if self.monitor.io_timeout_ms == 0 {
            return Err(invalid("monitor.io_timeout_ms", "must be greater than 0"));
        }

        if self.helper.socket_path.trim().is_empty() {
            return Err(invalid(
                "helper.socket_path",
                "helper socket path cannot be empty",
            ));
        }

        Ok(())
    }

    /// Apply environment variable overrides (prefix: TUNNELMON_)
    ///
    /// - `TUNNELMON_LOG_LEVEL`
    /// - `TUNNELMON_CHANNEL_MODE`: `socket` or `loopback`
    /// - `TUNNELMON_SOCKET_PATH`: both the controller's and the helper's socket
    /// - `TUNNELMON_POLL_INTERVAL_MS`
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Apply overrides read through `lookup`. Unparseable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TUNNELMON_LOG_LEVEL") {
            if !v.is_empty() {
                self.log_level = v;
            }
        }
        if let Some(v) = lookup("TUNNELMON_CHANNEL_MODE") {
            match v.to_ascii_lowercase().as_str() {
                "socket" => self.channel.mode = ChannelMode::Socket,
                "loopback" => self.channel.mode = ChannelMode::Loopback,
                _ => {}
            }
        }
        if let Some(v) = lookup("TUNNELMON_SOCKET_PATH") {
            if !v.is_empty() {
                self.channel.socket_path = v.clone();
                self.helper.socket_path = v;
            }
        }
        if let Some(v) = lookup("TUNNELMON_POLL_INTERVAL_MS") {
            if let Ok(n) = v.parse() {
                self.monitor.poll_interval_ms = n;
            }
        }
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("tunnelmon").join("config.toml")
        } else {
            PathBuf::from("config.toml")
        }
    }

    /// The channel the controller should create.
    pub fn channel_kind(&self) -> ChannelKind {
        match self.channel.mode {
            ChannelMode::Loopback => ChannelKind::Loopback,
            ChannelMode::Socket => ChannelKind::Socket {
                path: PathBuf::from(&self.channel.socket_path),
            },
        }
    }

    /// Interval between status polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.monitor.poll_interval_ms)
    }

    /// Per-frame socket I/O timeout.
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.monitor.io_timeout_ms)
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.channel.mode, ChannelMode::Socket);
        assert_eq!(config.monitor.poll_interval_ms, 1000);
        assert_eq!(config.monitor.io_timeout_ms, 5000);
        assert_eq!(config.helper.socket_path, config.channel.socket_path);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config() {
        let mut file = NamedTempFile::new().unwrap();
        let config_str = r#"
            log_level = "debug"

            [channel]
            mode = "loopback"

            [monitor]
            poll_interval_ms = 250
        "#;
        file.write_all(config_str.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.channel.mode, ChannelMode::Loopback);
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.io_timeout(), Duration::from_millis(5000));
        assert_eq!(config.channel_kind(), ChannelKind::Loopback);
    }

    #[test]
    fn test_load_logging_section() {
        let mut file = NamedTempFile::new().unwrap();
        let config_str = r#"
            [logging]
            file = true
            dir = "/tmp/tunnelmon-logs"
            json = true
        "#;
        file.write_all(config_str.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert!(config.logging.file);
        assert!(config.logging.json);
        assert_eq!(config.logging.dir, "/tmp/tunnelmon-logs");
        assert_eq!(config.logging.file_name, "tunnelmon");

        let mut config = Config::default();
        config.logging.file = true;
        config.logging.dir = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.monitor.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.log_level = "verbose".to_string();
        assert!(config.validate().is_err());

        // An empty socket path only matters in socket mode
        let mut config = Config::default();
        config.channel.socket_path = String::new();
        assert!(config.validate().is_err());
        config.channel.mode = ChannelMode::Loopback;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TUNNELMON_LOG_LEVEL", "trace"),
            ("TUNNELMON_SOCKET_PATH", "/tmp/override.sock"),
            ("TUNNELMON_POLL_INTERVAL_MS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.log_level, "trace");
        assert_eq!(config.channel.socket_path, "/tmp/override.sock");
        assert_eq!(config.helper.socket_path, "/tmp/override.sock");
        assert_eq!(config.monitor.poll_interval_ms, 1000);
        assert_eq!(
            config.channel_kind(),
            ChannelKind::Socket {
                path: PathBuf::from("/tmp/override.sock")
            }
        );
    }
}
