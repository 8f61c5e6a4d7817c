//! Error types for backup and recovery operations

use super::models::{ArtifactId, ArtifactType};
use super::store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Result type for backup operations
pub type BackupResult<T> = Result<T, BackupError>;

/// Error taxonomy for backup, retention and restore operations
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Source unavailable for {artifact_type} backup: {cause}")]
    SourceUnavailable {
        artifact_type: ArtifactType,
        cause: String,
    },

    #[error("Size limit exceeded for {artifact_type} backup: produced more than {limit} bytes")]
    SizeExceeded {
        artifact_type: ArtifactType,
        limit: u64,
        observed: u64,
    },

    #[error("Encryption error: {message}")]
    Encryption { message: String },

    #[error("Recorder error: {message}")]
    Recorder { message: String },

    #[error("Integrity check failed for {artifact_id}: expected checksum {expected}, found {actual}")]
    Integrity {
        artifact_id: ArtifactId,
        expected: String,
        actual: String,
    },

    #[error("Corrupted artifact {artifact_id}: {message}")]
    Corruption {
        artifact_id: ArtifactId,
        message: String,
    },

    #[error("Confirmation required to restore {artifact_id}: {message}")]
    ConfirmationRequired {
        artifact_id: ArtifactId,
        message: String,
    },

    #[error("Timed out after {}s during {stage}", .elapsed.as_secs_f64())]
    Timeout { stage: String, elapsed: Duration },

    #[error("Policy violation: {message}")]
    PolicyViolation { message: String },

    #[error("Lock contention: {message}")]
    LockContention { message: String },

    #[error("Restore into target failed for {artifact_id}: {message}")]
    ApplyFailed {
        artifact_id: ArtifactId,
        message: String,
    },

    #[error("Artifact not found: {artifact_id}")]
    NotFound { artifact_id: ArtifactId },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid artifact id '{value}': {reason}")]
    InvalidArtifactId { value: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackupError {
    /// Create an encryption error
    pub fn encryption<S: Into<String>>(message: S) -> Self {
        Self::Encryption {
            message: message.into(),
        }
    }

    /// Create a recorder error
    pub fn recorder<S: Into<String>>(message: S) -> Self {
        Self::Recorder {
            message: message.into(),
        }
    }

    /// Create a corruption error for an artifact
    pub fn corrupted<S: Into<String>>(artifact_id: &ArtifactId, message: S) -> Self {
        Self::Corruption {
            artifact_id: artifact_id.clone(),
            message: message.into(),
        }
    }

    /// Create a policy violation error
    pub fn policy<S: Into<String>>(message: S) -> Self {
        Self::PolicyViolation {
            message: message.into(),
        }
    }

    /// Create a lock contention error
    pub fn contention<S: Into<String>>(message: S) -> Self {
        Self::LockContention {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a timeout error for a named stage
    pub fn timeout<S: Into<String>>(stage: S, elapsed: Duration) -> Self {
        Self::Timeout {
            stage: stage.into(),
            elapsed,
        }
    }

    /// Short, stable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            BackupError::SourceUnavailable { .. } => "SourceUnavailable",
            BackupError::SizeExceeded { .. } => "SizeExceeded",
            BackupError::Encryption { .. } => "EncryptionError",
            BackupError::Recorder { .. } => "RecorderError",
            BackupError::Integrity { .. } => "IntegrityError",
            BackupError::Corruption { .. } => "Corruption",
            BackupError::ConfirmationRequired { .. } => "ConfirmationRequired",
            BackupError::Timeout { .. } => "Timeout",
            BackupError::PolicyViolation { .. } => "PolicyViolation",
            BackupError::LockContention { .. } => "LockContention",
            BackupError::ApplyFailed { .. } => "ApplyFailed",
            BackupError::NotFound { .. } => "NotFound",
            BackupError::Config { .. } => "ConfigError",
            BackupError::InvalidArtifactId { .. } => "InvalidArtifactId",
            BackupError::Storage(_) => "StorageError",
            BackupError::Io(_) => "IoError",
        }
    }

    /// Whether this error means stored data can no longer be trusted
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            BackupError::Integrity { .. } | BackupError::Corruption { .. }
        )
    }

    /// Check if this error is recoverable (operator can fix it and retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BackupError::Config { .. }
                | BackupError::ConfirmationRequired { .. }
                | BackupError::LockContention { .. }
                | BackupError::Timeout { .. }
                | BackupError::SourceUnavailable { .. }
                | BackupError::InvalidArtifactId { .. }
                | BackupError::NotFound { .. }
        )
    }

    /// Get a user-friendly error message with recovery suggestions
    pub fn user_friendly_message(&self) -> String {
        match self {
            BackupError::ConfirmationRequired { artifact_id, .. } => format!(
                "{}. Re-run with '--confirm {}' to acknowledge that the target will be overwritten.",
                self, artifact_id
            ),
            BackupError::SizeExceeded { .. } => format!(
                "{}. Nothing was stored. Raise '--max-size-gb' if the source has legitimately grown.",
                self
            ),
            BackupError::Integrity { .. } | BackupError::Corruption { .. } => format!(
                "{}. Do not restore this artifact; pick an older backup from 'list-backups'.",
                self
            ),
            BackupError::LockContention { .. } => format!(
                "{}. Another backup, restore or cleanup holds the lock; retry once it finishes.",
                self
            ),
            BackupError::NotFound { .. } => {
                format!("{}. Use 'list-backups' to see available artifacts.", self)
            }
            _ => self.to_string(),
        }
    }
}
