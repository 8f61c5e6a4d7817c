//! Backup & Disaster-Recovery Orchestration
//!
//! Produces typed, integrity-verified, optionally encrypted backup artifacts and
//! restores them with fail-closed guarantees.
//!
//! This module provides:
//! - Two-phase artifact + metadata writes (stage, then commit atomically)
//! - Optional gzip compression ahead of encryption
//! - SHA-256 integrity checksums over the final stored bytes
//! - AES-256-GCM encryption, unconditional for secrets
//! - Size-bounded producer reads and per-stage timeouts
//! - Retention collection that honours per-artifact locks
//! - Restores gated by an explicit confirmation token
//!
//! ## Usage
//!
//! ```rust,no_run
//! use brk::backup::{ArtifactType, BackupContext, BackupPolicy, FileArtifactStore, OrchestratorBuilder};
//! use std::sync::Arc;
//!
//! async fn example() -> brk::backup::BackupResult<()> {
//!     let store = FileArtifactStore::new("/var/backups/brk")?;
//!     let orchestrator = OrchestratorBuilder::new(Arc::new(store)).build();
//!     let records = orchestrator.list_backups(None).await?;
//!     println!("{} artifacts", records.len());
//!     Ok(())
//! }
//! ```

pub mod atomic;
pub mod compression;
pub mod encryption;
pub mod errors;
pub mod locks;
pub mod models;
pub mod orchestrator;
pub mod plan;
pub mod producer;
pub mod recorder;
pub mod recovery;
pub mod retention;
pub mod store;
pub mod target;

// Re-export key types for convenience
pub use atomic::{AtomicFileWriter, EphemeralPlaintext, ProcessLock, ScratchDir};
pub use encryption::{
    resolve_encryption, AesGcmProvider, CryptoError, EncryptionProvider, EnvelopeHeader,
    RecipientKey,
};
pub use errors::{BackupError, BackupResult};
pub use locks::{ArtifactLock, LockTable, LockWait, TypeLock};
pub use models::{
    ArtifactId, ArtifactType, BackupArtifact, BackupFilter, BackupOutcome, BackupPolicy,
    CollectOptions, CollectionReport, ConfirmationToken, EncryptionMode, ForceCleanup,
    MetadataRecord, RecoveryRequest, RestoreReport, RunReport, TargetDescriptor,
    MAX_RETENTION_DAYS,
};
pub use orchestrator::{BackupContext, OperationTimeouts, Orchestrator, OrchestratorBuilder};
pub use plan::{DisasterPlan, PlanEntry, PlanStatus};
pub use producer::{BackupProducer, CommandProducer, FileProducer, ProducerError, SourceStream};
pub use recorder::{sha256_hex, FinalizeSpec, IntegrityRecorder};
pub use recovery::{RecoveryEngine, RestoreContext};
pub use retention::RetentionCollector;
pub use store::{
    ArtifactStore, ArtifactStoreBuilder, BlobReader, EntryState, FileArtifactStore,
    MemoryArtifactStore, StoreError, StoreResult, StoredEntry,
};
pub use target::{ApplySummary, CommandTarget, FileTarget, RestorePayload, RestoreTarget};

/// Identity recorded as `created_by` when the caller does not supply one
///
/// Formatted as `user@host`, falling back to `unknown` for either half.
pub fn default_creator_identity() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{}@{}", user, host)
}
