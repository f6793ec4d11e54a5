//! Shared utilities for the tunnel monitor binaries.
//!
//! This crate provides the configuration file format and logging setup used
//! by both `monitor_helper` and `monitorctl`.

pub mod config;
pub mod logging;

// Re-export commonly used types for convenience
pub use config::{ChannelMode, Config, ConfigError, LoggingConfig};
