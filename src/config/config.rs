//! TOML configuration parsing and management.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "brk.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
    /// Producers keyed by artifact type name (`database`, `application_state`, `secrets`, `logs`)
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
    /// Restore targets keyed by artifact type name
    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Artifact store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `file` or `memory`
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_store_path")]
    pub path: String,
    /// Directory for cross-process lock files; defaults to `<path>/locks`
    pub lock_dir: Option<String>,
}

fn default_backend() -> String {
    "file".to_string()
}

fn default_store_path() -> String {
    "~/.brk/store".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_store_path(),
            lock_dir: None,
        }
    }
}

/// Retention window and size limit
///
/// Neither value has a default. A backup fails unless the window and limit
/// come from here or from command-line flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub days: Option<u32>,
    pub max_size_gb: Option<f64>,
    /// Per-type overrides keyed by artifact type name
    #[serde(default)]
    pub types: BTreeMap<String, TypeRetentionConfig>,
}

/// Per-type retention override
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeRetentionConfig {
    pub days: Option<u32>,
    pub max_size_gb: Option<f64>,
}

impl RetentionConfig {
    /// Effective `(days, max_size_gb)` for a type, override first
    pub fn for_type(&self, artifact_type: &str) -> (Option<u32>, Option<f64>) {
        let specific = self.types.get(artifact_type);
        (
            specific.and_then(|t| t.days).or(self.days),
            specific.and_then(|t| t.max_size_gb).or(self.max_size_gb),
        )
    }
}

/// Encryption configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Encrypt non-secret artifact types
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Path to a file holding the recipient key (hex or base64)
    pub key_file: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_file: None,
        }
    }
}

/// Compression configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// gzip level 1-9, 0 for none
    #[serde(default)]
    pub level: u32,
}

/// A backup source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Stream a subprocess's stdout
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default)]
        best_effort: bool,
    },
    /// Stream a file
    File {
        path: String,
        #[serde(default)]
        best_effort: bool,
    },
}

/// A restore destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetConfig {
    /// Pipe the payload into a subprocess; `{target}` in args is substituted
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        default_target: Option<String>,
    },
    /// Write the payload to a file
    File {
        base_dir: Option<String>,
        default_target: Option<String>,
    },
}

impl TargetConfig {
    /// Descriptor used when the operator names no target
    pub fn default_target(&self) -> Option<&str> {
        match self {
            TargetConfig::Command { default_target, .. } => default_target.as_deref(),
            TargetConfig::File { default_target, .. } => default_target.as_deref(),
        }
    }
}

/// Stage timeouts in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_produce_seconds")]
    pub produce_seconds: u64,
    #[serde(default = "default_encrypt_seconds")]
    pub encrypt_seconds: u64,
    #[serde(default = "default_store_seconds")]
    pub store_seconds: u64,
    #[serde(default = "default_apply_seconds")]
    pub apply_seconds: u64,
    /// 0 rejects immediately when a lock is held
    #[serde(default = "default_lock_wait_seconds")]
    pub lock_wait_seconds: u64,
}

fn default_produce_seconds() -> u64 {
    3600
}

fn default_encrypt_seconds() -> u64 {
    600
}

fn default_store_seconds() -> u64 {
    600
}

fn default_apply_seconds() -> u64 {
    3600
}

fn default_lock_wait_seconds() -> u64 {
    30
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            produce_seconds: default_produce_seconds(),
            encrypt_seconds: default_encrypt_seconds(),
            store_seconds: default_store_seconds(),
            apply_seconds: default_apply_seconds(),
            lock_wait_seconds: default_lock_wait_seconds(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Markdown operation log; disabled when unset
    pub log_file: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_file: None,
            log_level: default_log_level(),
        }
    }
}

/// Expand `~` and environment variables in a configured path
pub fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(path).as_ref()),
    }
}

/// Loads and manages TOML configuration.
#[derive(Debug)]
pub struct ConfigurationLoader {
    pub config_path: PathBuf,
    pub config: Configuration,
}

impl ConfigurationLoader {
    /// Initialize configuration loader.
    ///
    /// # Arguments
    /// * `config_path` - Path to TOML config file. If None, uses `brk.toml` when
    ///   present and defaults otherwise. An explicit path must exist.
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let (config_path, config) = match config_path {
            Some(path) => (path.to_path_buf(), Self::load_config(path)?),
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_FILE);
                let config = if path.exists() {
                    Self::load_config(&path)?
                } else {
                    Configuration::default()
                };
                (path, config)
            }
        };

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Create a configuration loader from a pre-parsed Configuration.
    pub fn from_config(config: Configuration) -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_FILE),
            config,
        }
    }

    /// Load configuration from TOML file.
    fn load_config(path: &Path) -> Result<Configuration> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))
    }

    /// Resolved artifact store root
    pub fn store_path(&self) -> PathBuf {
        expand_path(&self.config.storage.path)
    }

    /// Resolved directory for cross-process lock files
    pub fn lock_dir(&self) -> PathBuf {
        match &self.config.storage.lock_dir {
            Some(dir) => expand_path(dir),
            None => self.store_path().join("locks"),
        }
    }

    /// Get configuration value by dot-notation key.
    pub fn get_string(&self, key: &str) -> Option<String> {
        match key {
            "storage.backend" => Some(self.config.storage.backend.clone()),
            "storage.path" => Some(self.config.storage.path.clone()),
            "encryption.key_file" => self.config.encryption.key_file.clone(),
            "logging.log_file" => self.config.logging.log_file.clone(),
            "logging.log_level" => Some(self.config.logging.log_level.clone()),
            _ => None,
        }
    }

    /// Get numeric configuration value.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        let timeouts = &self.config.timeouts;
        match key {
            "retention.days" => self.config.retention.days.map(u64::from),
            "compression.level" => Some(u64::from(self.config.compression.level)),
            "timeouts.produce_seconds" => Some(timeouts.produce_seconds),
            "timeouts.encrypt_seconds" => Some(timeouts.encrypt_seconds),
            "timeouts.store_seconds" => Some(timeouts.store_seconds),
            "timeouts.apply_seconds" => Some(timeouts.apply_seconds),
            "timeouts.lock_wait_seconds" => Some(timeouts.lock_wait_seconds),
            _ => None,
        }
    }

    /// Get boolean configuration value.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match key {
            "encryption.enabled" => Some(self.config.encryption.enabled),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
[storage]
path = "/var/backups/brk"

[retention]
days = 7
max_size_gb = 10

[retention.types.secrets]
days = 90
max_size_gb = 0.5

[encryption]
enabled = false
key_file = "~/.brk/recipient.key"

[compression]
level = 6

[sources.database]
kind = "command"
program = "pg_dump"
args = ["--format=custom", "appdb"]

[sources.logs]
kind = "file"
path = "/var/log/app/app.log"
best_effort = true

[targets.database]
kind = "command"
program = "pg_restore"
args = ["--clean", "--dbname={target}"]
default_target = "appdb"

[timeouts]
produce_seconds = 120
lock_wait_seconds = 0

[logging]
log_file = "/var/log/brk/operations.md"
log_level = "debug"
"#;

    #[test]
    fn test_default_config_has_no_policy() {
        let config = Configuration::default();
        assert_eq!(config.storage.backend, "file");
        assert!(config.retention.days.is_none());
        assert!(config.retention.max_size_gb.is_none());
        assert!(config.encryption.enabled);
        assert_eq!(config.timeouts.lock_wait_seconds, 30);
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_load_sample_config() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), SAMPLE).unwrap();

        let loader = ConfigurationLoader::new(Some(file.path())).unwrap();
        let config = &loader.config;

        assert_eq!(loader.store_path(), PathBuf::from("/var/backups/brk"));
        assert_eq!(loader.lock_dir(), PathBuf::from("/var/backups/brk/locks"));
        assert_eq!(config.retention.for_type("secrets"), (Some(90), Some(0.5)));
        assert_eq!(config.retention.for_type("database"), (Some(7), Some(10.0)));
        assert_eq!(
            config.sources.get("logs"),
            Some(&SourceConfig::File {
                path: "/var/log/app/app.log".to_string(),
                best_effort: true
            })
        );
        assert_eq!(
            config.targets.get("database").and_then(|t| t.default_target()),
            Some("appdb")
        );
        assert_eq!(config.timeouts.produce_seconds, 120);
        assert_eq!(config.timeouts.store_seconds, 600);
        assert_eq!(loader.get_u64("compression.level"), Some(6));
        assert_eq!(loader.get_bool("encryption.enabled"), Some(false));
        assert_eq!(
            loader.get_string("logging.log_level"),
            Some("debug".to_string())
        );
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let result = ConfigurationLoader::new(Some(Path::new("/nonexistent/brk.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), "[sources.database]\nkind = \"ftp\"\n").unwrap();
        let err = ConfigurationLoader::new(Some(file.path())).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse TOML config"));
    }

    #[test]
    fn test_expand_path_tilde() {
        assert_eq!(expand_path("/srv/brk"), PathBuf::from("/srv/brk"));
        if let Ok(home) = std::env::var("HOME") {
            assert_eq!(expand_path("~/backups"), PathBuf::from(home).join("backups"));
        }
    }
}
