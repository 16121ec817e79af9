//! Configuration management for Seedbox
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use seedbox::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Server listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `SEEDBOX__<section>__<key>`
//!
//! Examples:
//! - `SEEDBOX__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `SEEDBOX__DOWNLOADS__DOWNLOAD_DIR=/srv/downloads`
//! - `SEEDBOX__DOWNLOADS__METADATA_TIMEOUT_SECS=600`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/seedbox.toml`.
//! This can be overridden using the `SEEDBOX_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

// Re-export public types
pub use crate::humanize::ByteSize;
pub use models::{
    ApiLimits, Config, DownloadsConfig, EngineConfig, EngineKind, RetentionConfig, ServerConfig,
    TelemetryConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`SEEDBOX__*`)
    /// 2. TOML file (default: `config/seedbox.toml`)
    /// 3. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Effective configuration rendered as TOML, loadable as a config file
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
