//! Configuration management for backup runs.
//!
//! This module provides configuration loading through TOML files and
//! environment variable management via `.env` files.
//!
//! # Example
//!
//! ```no_run
//! use brk::config::{ConfigurationLoader, EnvironmentLoader};
//! use std::path::Path;
//!
//! // Load environment variables
//! let env = EnvironmentLoader::new(None);
//!
//! // Load configuration from TOML
//! let config_loader = ConfigurationLoader::new(Some(Path::new("brk.toml"))).unwrap();
//! let config = &config_loader.config;
//!
//! println!("Store: {}", config_loader.store_path().display());
//! println!("Retention days: {:?}", config.retention.days);
//! println!("Recipient key set: {}", env.recipient_key().is_some());
//! ```

pub mod config;
pub mod environment;

// Re-export main types for convenience
pub use self::config::{
    expand_path, CompressionConfig, Configuration, ConfigurationLoader, EncryptionConfig,
    LoggingConfig, RetentionConfig, SourceConfig, StorageConfig, TargetConfig, TimeoutsConfig,
    TypeRetentionConfig,
};
pub use self::environment::EnvironmentLoader;
