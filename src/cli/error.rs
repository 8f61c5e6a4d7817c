//! Error types for CLI operations

use crate::backup::BackupError;
use thiserror::Error;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// Process exit code for success
pub const EXIT_SUCCESS: i32 = 0;
/// Process exit code for operational failures
pub const EXIT_FAILURE: i32 = 1;
/// Process exit code for integrity or verification failures
pub const EXIT_INTEGRITY: i32 = 2;

/// Errors that can occur during CLI command execution
#[derive(Error, Debug)]
pub enum CliError {
    /// Error from the backup core
    #[error("{0}")]
    Backup(#[from] BackupError),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Invalid argument or input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Some artifact types in a multi-type run failed
    #[error("{failed} of {total} backups failed")]
    PartialFailure { failed: usize, total: usize },

    /// Stored data failed verification
    #[error("Integrity failure: {0}")]
    IntegrityFailure(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerdeError(String),

    /// Error executing a command or operation
    #[error("Execution error: {0}")]
    ExecutionError(String),
}

impl CliError {
    /// Exit code: 2 for integrity/verification failures, 1 for everything else
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Backup(e) if e.is_integrity_failure() => EXIT_INTEGRITY,
            CliError::IntegrityFailure(_) => EXIT_INTEGRITY,
            _ => EXIT_FAILURE,
        }
    }

    /// Short name of the error kind, printed alongside the message
    pub fn kind(&self) -> &'static str {
        match self {
            CliError::Backup(e) => e.kind(),
            CliError::ConfigError(_) => "ConfigError",
            CliError::InvalidInput(_) => "InvalidInput",
            CliError::PartialFailure { .. } => "PartialFailure",
            CliError::IntegrityFailure(_) => "IntegrityError",
            CliError::IoError(_) => "IoError",
            CliError::SerdeError(_) => "SerializationError",
            CliError::ExecutionError(_) => "ExecutionError",
        }
    }

    /// Message with recovery hints where the core provides them
    pub fn user_friendly_message(&self) -> String {
        match self {
            CliError::Backup(e) => e.user_friendly_message(),
            other => other.to_string(),
        }
    }
}

// Conversions from common error types
impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::SerdeError(err.to_string())
    }
}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::ConfigError(format!("{:#}", err))
    }
}

impl From<crate::backup::StoreError> for CliError {
    fn from(err: crate::backup::StoreError) -> Self {
        CliError::Backup(BackupError::Storage(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::ArtifactId;

    #[test]
    fn test_exit_codes() {
        let id = ArtifactId::parse("database_1").unwrap();
        let tampered = CliError::from(BackupError::Integrity {
            artifact_id: id.clone(),
            expected: "aa".into(),
            actual: "bb".into(),
        });
        assert_eq!(tampered.exit_code(), EXIT_INTEGRITY);
        assert_eq!(
            CliError::from(BackupError::corrupted(&id, "blob missing")).exit_code(),
            EXIT_INTEGRITY
        );
        assert_eq!(
            CliError::from(BackupError::policy("no window")).exit_code(),
            EXIT_FAILURE
        );
        assert_eq!(
            CliError::PartialFailure { failed: 1, total: 4 }.exit_code(),
            EXIT_FAILURE
        );
    }

    #[test]
    fn test_kind_passthrough() {
        let err = CliError::from(BackupError::encryption(
            "no recipient key configured for Secrets encryption",
        ));
        assert_eq!(err.kind(), "EncryptionError");
        assert!(err.to_string().contains("Secrets encryption"));
    }
}
