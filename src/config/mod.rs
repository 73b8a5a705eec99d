//! Configuration management for hako
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use hako::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Server listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `HAKO__<section>__<key>`
//!
//! Examples:
//! - `HAKO__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `HAKO__STORAGE__MAX_FILE_SIZE=1GB`
//! - `HAKO__RETENTION__MAX_TTL=30d`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/hako.toml`.
//! This can be overridden using the `HAKO_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::{ByteSize, Ttl};
pub use models::{Config, LedgerConfig, RetentionConfig, ServerConfig, StorageConfig};
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
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or a value
    /// fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");
        fs::write(&config_path, "[storage]\nroot = \"blobs\"\n").unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.storage.root.to_str(), Some("blobs"));
        assert_eq!(config.ledger.node_id, 1);
    }

    #[test]
    fn test_validation_runs_after_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");
        fs::write(
            &config_path,
            "[retention]\ndefault_ttl = \"10d\"\nmax_ttl = \"1d\"\n",
        )
        .unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::DefaultTtlExceedsMax { .. })
        ));
    }

    #[test]
    fn test_out_of_range_node_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");
        fs::write(&config_path, "[ledger]\nnode_id = 4096\n").unwrap();

        assert!(matches!(
            Config::load_from_path(config_path).unwrap_err(),
            ConfigError::ValidationError(ValidationError::NodeIdOutOfRange { .. })
        ));
    }
}
