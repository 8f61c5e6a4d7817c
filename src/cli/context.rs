//! Command context: configuration, environment and the wired orchestrator
//!
//! Every command builds one `CommandContext` from the global `--config` and
//! `--env-file` arguments. It owns the operation log and knows how to turn
//! configured sources and targets into producers and restore targets.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::backup::{
    default_creator_identity, ArtifactStoreBuilder, ArtifactType, BackupContext, BackupError,
    BackupPolicy, CommandProducer, CommandTarget, EncryptionMode, FileProducer, FileTarget,
    LockWait, OperationTimeouts, Orchestrator, OrchestratorBuilder, ProcessLock, RecipientKey,
};
use crate::cli::error::{CliError, CliResult};
use crate::config::{
    expand_path, ConfigurationLoader, EnvironmentLoader, SourceConfig, TargetConfig,
};
use crate::observability::OperationLog;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Policy settings supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct PolicyOverrides {
    pub retention_days: Option<u32>,
    pub max_size_gb: Option<f64>,
    pub no_encrypt: bool,
    pub compression: Option<u32>,
}

/// Everything a command needs to run
pub struct CommandContext {
    loader: ConfigurationLoader,
    env: EnvironmentLoader,
    log: Option<OperationLog>,
}

impl CommandContext {
    /// Load configuration and environment
    ///
    /// The `.env` file is applied before anything reads the environment.
    pub fn load(config_path: Option<&Path>, env_file: Option<&Path>) -> CliResult<Self> {
        let env = EnvironmentLoader::new(env_file);
        let loader = ConfigurationLoader::new(config_path)?;
        let log = match &loader.config.logging.log_file {
            Some(path) => Some(OperationLog::new(
                Some(expand_path(path).as_path()),
                Some(loader.config.logging.log_level.as_str()),
            )?),
            None => None,
        };
        Ok(Self { loader, env, log })
    }

    /// Build a context around an already loaded configuration
    pub fn from_parts(
        loader: ConfigurationLoader,
        env: EnvironmentLoader,
        log: Option<OperationLog>,
    ) -> Self {
        Self { loader, env, log }
    }

    pub fn loader(&self) -> &ConfigurationLoader {
        &self.loader
    }

    pub fn env(&self) -> &EnvironmentLoader {
        &self.env
    }

    /// Configured log level for the tracing subscriber
    pub fn log_level(&self) -> &str {
        &self.loader.config.logging.log_level
    }

    /// Run `f` against the operation log, if one is configured
    ///
    /// Audit write failures are reported but never fail the command.
    pub fn audit<F>(&self, f: F)
    where
        F: FnOnce(&OperationLog) -> anyhow::Result<()>,
    {
        if let Some(log) = &self.log {
            if let Err(e) = f(log) {
                tracing::warn!(error = %e, log_file = %log.log_file().display(), "operation log write failed");
            }
        }
    }

    /// Stage timeouts from configuration
    pub fn timeouts(&self) -> OperationTimeouts {
        let t = &self.loader.config.timeouts;
        OperationTimeouts {
            produce: Duration::from_secs(t.produce_seconds),
            encrypt: Duration::from_secs(t.encrypt_seconds),
            store: Duration::from_secs(t.store_seconds),
            apply: Duration::from_secs(t.apply_seconds),
            lock_wait: if t.lock_wait_seconds == 0 {
                LockWait::Reject
            } else {
                LockWait::Wait(Duration::from_secs(t.lock_wait_seconds))
            },
        }
    }

    /// Recipient key from the environment, falling back to the configured key file
    ///
    /// A key that is present but malformed is an error, never silently ignored.
    pub fn recipient_key(&self) -> CliResult<Option<RecipientKey>> {
        if let Some(encoded) = self.env.recipient_key() {
            return RecipientKey::parse(&encoded)
                .map(Some)
                .map_err(|e| CliError::ConfigError(format!("BRK_RECIPIENT_KEY: {}", e)));
        }
        let file = self
            .env
            .recipient_key_file()
            .or_else(|| self.loader.config.encryption.key_file.as_deref().map(expand_path));
        match file {
            Some(path) => RecipientKey::from_file(&path)
                .map(Some)
                .map_err(|e| CliError::ConfigError(e.to_string())),
            None => Ok(None),
        }
    }

    /// Wire the orchestrator from configured storage, sources and targets
    pub fn build_orchestrator(&self) -> CliResult<Orchestrator> {
        let config = &self.loader.config;
        let store = ArtifactStoreBuilder::new(&config.storage.backend)
            .with_base_path(self.loader.store_path())
            .build()?;

        let mut builder = OrchestratorBuilder::new(store).with_timeouts(self.timeouts());

        for (name, source) in &config.sources {
            let artifact_type = parse_type(name, "sources")?;
            builder = match source {
                SourceConfig::Command {
                    program,
                    args,
                    env,
                    best_effort,
                } => {
                    let mut producer = CommandProducer::new(artifact_type, program, args)
                        .with_best_effort(*best_effort);
                    if artifact_type == ArtifactType::Database {
                        if let Some(url) = self.env.database_url() {
                            producer = producer.with_env("DATABASE_URL", url);
                        }
                    }
                    for (k, v) in env {
                        producer = producer.with_env(k, v);
                    }
                    builder.with_producer(Arc::new(producer))
                }
                SourceConfig::File { path, best_effort } => builder.with_producer(Arc::new(
                    FileProducer::new(artifact_type, expand_path(path))
                        .with_best_effort(*best_effort),
                )),
            };
        }

        for (name, target) in &config.targets {
            let artifact_type = parse_type(name, "targets")?;
            builder = match target {
                TargetConfig::Command {
                    program, args, env, ..
                } => {
                    let mut target = CommandTarget::new(artifact_type, program, args);
                    if artifact_type == ArtifactType::Database {
                        if let Some(url) = self.env.database_url() {
                            target = target.with_env("DATABASE_URL", url);
                        }
                    }
                    for (k, v) in env {
                        target = target.with_env(k, v);
                    }
                    builder.with_target(Arc::new(target))
                }
                TargetConfig::File { base_dir, .. } => {
                    let mut target = FileTarget::new(artifact_type);
                    if let Some(dir) = base_dir {
                        target = target.with_base_dir(expand_path(dir));
                    }
                    builder.with_target(Arc::new(target))
                }
            };
        }

        if let Some(key) = self.recipient_key()? {
            builder = builder.with_recipient_key(key);
        }

        Ok(builder.build())
    }

    /// Assemble the policy for one type from flags and configuration
    ///
    /// `strict_encryption` marks an explicit single-type command, where
    /// `--no-encrypt` is a hard request rather than a preference.
    pub fn policy_for(
        &self,
        artifact_type: ArtifactType,
        overrides: &PolicyOverrides,
        strict_encryption: bool,
    ) -> CliResult<BackupPolicy> {
        let config = &self.loader.config;
        let (days, max_gb) = config.retention.for_type(artifact_type.as_str());

        let days = overrides.retention_days.or(days).ok_or_else(|| {
            BackupError::policy(format!(
                "no retention window for {}: pass --retention-days or set retention.days",
                artifact_type
            ))
        })?;
        let max_gb = overrides.max_size_gb.or(max_gb).ok_or_else(|| {
            BackupError::policy(format!(
                "no size limit for {}: pass --max-size-gb or set retention.max_size_gb",
                artifact_type
            ))
        })?;
        if !max_gb.is_finite() || max_gb <= 0.0 {
            return Err(CliError::InvalidInput(format!(
                "max size must be a positive number of GB, got {}",
                max_gb
            )));
        }

        let encryption = match (overrides.no_encrypt, strict_encryption) {
            (true, true) => EncryptionMode::ForceDisabled,
            (true, false) => EncryptionMode::Disabled,
            (false, _) if config.encryption.enabled => EncryptionMode::Enabled,
            (false, _) => EncryptionMode::Disabled,
        };

        Ok(BackupPolicy::new(
            chrono::Duration::days(i64::from(days)),
            (max_gb * BYTES_PER_GB) as u64,
        )
        .with_encryption(encryption)
        .with_compression_level(overrides.compression.unwrap_or(config.compression.level)))
    }

    /// Per-call backup settings
    pub fn backup_context(&self, revision: Option<&str>) -> BackupContext {
        let revision = revision
            .map(str::to_string)
            .or_else(|| self.env.source_revision())
            .unwrap_or_else(|| "unknown".to_string());
        BackupContext::new(revision, default_creator_identity()).with_timeouts(self.timeouts())
    }

    /// Restore descriptor used when the operator names none
    pub fn default_target(&self, artifact_type: ArtifactType) -> Option<String> {
        let configured = self
            .loader
            .config
            .targets
            .iter()
            .find(|(name, _)| ArtifactType::from_str(name).ok() == Some(artifact_type))
            .and_then(|(_, t)| t.default_target().map(str::to_string));
        match (configured, artifact_type) {
            (Some(t), _) => Some(t),
            (None, ArtifactType::Database) => self.env.database_url(),
            (None, _) => None,
        }
    }

    /// Take the cross-process lock named `name` in the lock directory
    pub async fn process_lock(&self, name: &str) -> CliResult<ProcessLock> {
        let path = self.lock_path(name);
        let lock = match self.timeouts().lock_wait {
            LockWait::Reject => ProcessLock::try_acquire(&path)?.ok_or_else(|| {
                let holder = ProcessLock::holder_pid(&path)
                    .map(|pid| format!(" (held by pid {})", pid))
                    .unwrap_or_default();
                BackupError::contention(format!("{} is locked{}", path.display(), holder))
            })?,
            LockWait::Wait(timeout) => ProcessLock::acquire(&path, timeout).await?,
        };
        Ok(lock)
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.loader.lock_dir().join(format!("{}.lock", name))
    }

    /// Settings recorded at DEBUG level in the operation log
    pub fn settings_snapshot(&self) -> BTreeMap<String, serde_json::Value> {
        let config = &self.loader.config;
        let mut settings = BTreeMap::new();
        settings.insert(
            "config_path".to_string(),
            serde_json::json!(self.loader.config_path.display().to_string()),
        );
        settings.insert(
            "store".to_string(),
            serde_json::json!(self.loader.store_path().display().to_string()),
        );
        settings.insert(
            "encryption_enabled".to_string(),
            serde_json::json!(config.encryption.enabled),
        );
        settings.insert(
            "sources".to_string(),
            serde_json::json!(config.sources.keys().collect::<Vec<_>>()),
        );
        settings
    }
}

fn parse_type(name: &str, section: &str) -> CliResult<ArtifactType> {
    ArtifactType::from_str(name).map_err(|_| {
        CliError::ConfigError(format!(
            "[{}.{}] does not name an artifact type (database, application_state, secrets, logs)",
            section, name
        ))
    })
}
