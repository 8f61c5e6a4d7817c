//! Data models for backup artifacts, policies and reports

use super::errors::{BackupError, BackupResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Class of data held by an artifact
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Database,
    ApplicationState,
    Secrets,
    Logs,
}

impl ArtifactType {
    /// Every artifact type, in the order multi-type runs report them
    pub const ALL: [ArtifactType; 4] = [
        ArtifactType::Database,
        ArtifactType::ApplicationState,
        ArtifactType::Secrets,
        ArtifactType::Logs,
    ];

    /// Stable lowercase name, used in ids and persisted records
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::Database => "database",
            ArtifactType::ApplicationState => "application_state",
            ArtifactType::Secrets => "secrets",
            ArtifactType::Logs => "logs",
        }
    }

    /// Secrets are never stored in plaintext
    pub fn requires_encryption(&self) -> bool {
        matches!(self, ArtifactType::Secrets)
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactType {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "database" | "db" => Ok(ArtifactType::Database),
            "application_state" | "application" | "app" => Ok(ArtifactType::ApplicationState),
            "secrets" => Ok(ArtifactType::Secrets),
            "logs" => Ok(ArtifactType::Logs),
            other => Err(BackupError::config(format!(
                "unknown artifact type '{}' (expected database, app, secrets or logs)",
                other
            ))),
        }
    }
}

/// Opaque artifact identifier
///
/// Ids are restricted to `[A-Za-z0-9._-]` so they can be used directly as
/// storage keys without path traversal.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Generate a fresh id: `<type>_<YYYYmmdd_HHMMSS>_<8 hex chars>`
    pub fn generate(artifact_type: ArtifactType, created_at: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        ArtifactId(format!(
            "{}_{}_{}",
            artifact_type.as_str(),
            created_at.format("%Y%m%d_%H%M%S"),
            &suffix[..8]
        ))
    }

    /// Parse and validate an id supplied by a caller
    pub fn parse(value: &str) -> BackupResult<Self> {
        let invalid = |reason: &str| BackupError::InvalidArtifactId {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        if value.is_empty() {
            return Err(invalid("id is empty"));
        }
        if value.len() > 128 {
            return Err(invalid("id is longer than 128 characters"));
        }
        if value.starts_with('.') {
            return Err(invalid("id may not start with '.'"));
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(invalid("only ASCII letters, digits, '_', '-' and '.' are allowed"));
        }

        Ok(ArtifactId(value.to_string()))
    }

    /// Get the id string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ArtifactId {
    type Error = BackupError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ArtifactId::parse(&value)
    }
}

impl From<ArtifactId> for String {
    fn from(id: ArtifactId) -> Self {
        id.0
    }
}

/// A single backed-up payload. Immutable once created.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BackupArtifact {
    pub id: ArtifactId,
    pub artifact_type: ArtifactType,
    pub encrypted: bool,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub source_revision: String,
    pub retention_deadline: DateTime<Utc>,
}

/// Integrity and retention descriptor paired 1:1 with an artifact blob
///
/// This is the persisted JSON form of the metadata record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MetadataRecord {
    pub backup_name: ArtifactId,
    pub backup_type: ArtifactType,
    pub timestamp: DateTime<Utc>,
    pub size_bytes: u64,
    pub checksum_sha256: String,
    pub encrypted: bool,
    pub retention_until: DateTime<Utc>,
    pub created_by: String,
    pub source_revision: String,
    #[serde(default)]
    pub compression_level: u32,
}

impl MetadataRecord {
    /// The artifact view of this record
    pub fn artifact(&self) -> BackupArtifact {
        BackupArtifact {
            id: self.backup_name.clone(),
            artifact_type: self.backup_type,
            encrypted: self.encrypted,
            size_bytes: self.size_bytes,
            created_at: self.timestamp,
            source_revision: self.source_revision.clone(),
            retention_deadline: self.retention_until,
        }
    }

    /// Whether the retention deadline lies strictly before `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.retention_until < now
    }
}

/// Caller intent for encrypting an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMode {
    /// Encrypt with the configured recipient key
    Enabled,
    /// Prefer plaintext; ignored for artifact types that require encryption
    Disabled,
    /// Demand plaintext; refused for artifact types that require encryption
    ForceDisabled,
}

/// Longest accepted retention window, in days
pub const MAX_RETENTION_DAYS: i64 = 36_500;

/// Explicit per-call policy for creating an artifact
///
/// The retention window and size limit have no defaults: callers construct the
/// policy themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupPolicy {
    pub window: Duration,
    pub max_artifact_size: u64,
    pub encryption: EncryptionMode,
    pub compression_level: u32,
}

impl BackupPolicy {
    /// Create a policy with encryption enabled and no compression
    pub fn new(window: Duration, max_artifact_size: u64) -> Self {
        Self {
            window,
            max_artifact_size,
            encryption: EncryptionMode::Enabled,
            compression_level: 0,
        }
    }

    pub fn with_encryption(mut self, mode: EncryptionMode) -> Self {
        self.encryption = mode;
        self
    }

    /// Set gzip level; 0 stores uncompressed, values above 9 are clamped
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9);
        self
    }

    /// Reject policies that could never produce a valid artifact
    pub fn validate(&self) -> BackupResult<()> {
        if self.window <= Duration::zero() {
            return Err(BackupError::policy(
                "retention window must be positive".to_string(),
            ));
        }
        if self.window > Duration::days(MAX_RETENTION_DAYS) {
            return Err(BackupError::policy(format!(
                "retention window of {} days exceeds the maximum of {} days",
                self.window.num_days(),
                MAX_RETENTION_DAYS
            )));
        }
        if self.max_artifact_size == 0 {
            return Err(BackupError::policy(
                "max artifact size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Opaque handle naming the restore destination; interpreted by the target adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor(String);

impl TargetDescriptor {
    pub fn new<S: Into<String>>(value: S) -> Self {
        TargetDescriptor(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Explicit acknowledgement that a destructive restore of one artifact may proceed
///
/// A token is bound to exactly one artifact id and is only ever minted by the
/// caller; nothing in this crate creates one implicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationToken {
    artifact_id: ArtifactId,
}

impl ConfirmationToken {
    /// Mint a token confirming a destructive restore of `artifact_id`
    pub fn for_artifact(artifact_id: &ArtifactId) -> Self {
        Self {
            artifact_id: artifact_id.clone(),
        }
    }

    /// The artifact this token confirms
    pub fn artifact_id(&self) -> &ArtifactId {
        &self.artifact_id
    }

    pub fn is_bound_to(&self, artifact_id: &ArtifactId) -> bool {
        &self.artifact_id == artifact_id
    }
}

/// Request to restore one artifact into a target
#[derive(Debug, Clone)]
pub struct RecoveryRequest {
    pub artifact_ref: ArtifactId,
    pub target: TargetDescriptor,
    pub confirmation_token: Option<ConfirmationToken>,
}

impl RecoveryRequest {
    pub fn new(artifact_ref: ArtifactId, target: TargetDescriptor) -> Self {
        Self {
            artifact_ref,
            target,
            confirmation_token: None,
        }
    }

    pub fn with_confirmation(mut self, token: ConfirmationToken) -> Self {
        self.confirmation_token = Some(token);
        self
    }
}

/// Result of a completed restore
#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub artifact_id: ArtifactId,
    pub artifact_type: ArtifactType,
    pub target: String,
    pub verified: bool,
    pub decrypted: bool,
    pub bytes_restored: u64,
    pub items_applied: u64,
    pub duration: std::time::Duration,
}

/// Filter for listing artifacts
#[derive(Debug, Clone, Default)]
pub struct BackupFilter {
    pub artifact_type: Option<ArtifactType>,
    pub created_after: Option<DateTime<Utc>>,
}

impl BackupFilter {
    pub fn matches(&self, record: &MetadataRecord) -> bool {
        if let Some(t) = self.artifact_type {
            if record.backup_type != t {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if record.timestamp < after {
                return false;
            }
        }
        true
    }
}

/// Operator acknowledgement required to delete unexpired artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForceCleanup {
    risk_statement: String,
}

impl ForceCleanup {
    /// Acknowledge the risk of deleting artifacts before their deadline
    ///
    /// The statement is recorded in the cleanup log; an empty one is refused.
    pub fn acknowledge<S: Into<String>>(risk_statement: S) -> BackupResult<Self> {
        let risk_statement = risk_statement.into();
        if risk_statement.trim().is_empty() {
            return Err(BackupError::policy(
                "forced cleanup requires a stated risk acknowledgement",
            ));
        }
        Ok(Self { risk_statement })
    }

    pub fn risk_statement(&self) -> &str {
        &self.risk_statement
    }
}

/// Options for a retention collection pass
#[derive(Debug, Clone, Default)]
pub struct CollectOptions {
    /// Also delete unexpired artifacts (locked ids are still skipped)
    pub force: Option<ForceCleanup>,
    /// Report what would be deleted without deleting
    pub dry_run: bool,
}

/// Result of a retention collection pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionReport {
    pub scanned: u32,
    pub deleted: Vec<ArtifactId>,
    pub retained: u32,
    pub skipped_locked: Vec<ArtifactId>,
    pub orphans_removed: Vec<String>,
    pub corrupted: BTreeMap<String, String>,
    pub freed_bytes: u64,
    pub errors: Vec<String>,
    pub dry_run: bool,
    pub duration: std::time::Duration,
}

impl CollectionReport {
    /// Metadata records whose blob is missing were found
    pub fn has_corruption(&self) -> bool {
        !self.corrupted.is_empty()
    }

    /// Some deletions failed
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Outcome of one artifact type inside a multi-type run
#[derive(Debug)]
pub enum BackupOutcome {
    Created(BackupArtifact),
    /// Best-effort source failed; the run continues
    Skipped {
        artifact_type: ArtifactType,
        reason: String,
    },
    Failed {
        artifact_type: ArtifactType,
        error: BackupError,
    },
}

impl BackupOutcome {
    pub fn artifact_type(&self) -> ArtifactType {
        match self {
            BackupOutcome::Created(artifact) => artifact.artifact_type,
            BackupOutcome::Skipped { artifact_type, .. } => *artifact_type,
            BackupOutcome::Failed { artifact_type, .. } => *artifact_type,
        }
    }
}

/// Result of a multi-type backup run
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<BackupOutcome>,
    pub duration: std::time::Duration,
}

impl RunReport {
    /// True when no type failed; skipped best-effort types do not count as failures
    pub fn is_success(&self) -> bool {
        !self
            .outcomes
            .iter()
            .any(|o| matches!(o, BackupOutcome::Failed { .. }))
    }

    pub fn created(&self) -> impl Iterator<Item = &BackupArtifact> {
        self.outcomes.iter().filter_map(|o| match o {
            BackupOutcome::Created(artifact) => Some(artifact),
            _ => None,
        })
    }

    pub fn skipped(&self) -> impl Iterator<Item = (&ArtifactType, &str)> {
        self.outcomes.iter().filter_map(|o| match o {
            BackupOutcome::Skipped {
                artifact_type,
                reason,
            } => Some((artifact_type, reason.as_str())),
            _ => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = (&ArtifactType, &BackupError)> {
        self.outcomes.iter().filter_map(|o| match o {
            BackupOutcome::Failed {
                artifact_type,
                error,
            } => Some((artifact_type, error)),
            _ => None,
        })
    }
}
