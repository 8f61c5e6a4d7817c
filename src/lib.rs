//! Backup & Recovery Kit (BRK) - Backup and disaster-recovery orchestration
//!
//! BRK produces typed, integrity-verified, optionally encrypted backup artifacts,
//! prunes them on an explicit retention policy, and restores them with fail-closed
//! safety checks. Functionality is split into feature-gated modules:
//!
//! - **`backup`** - Orchestrator, artifact stores, encryption, retention and recovery
//! - **`config`** - TOML configuration and environment loading
//! - **`observability`** - Markdown operation log
//! - **`cli`** - The `brk` command-line surface
//!
//! # Features
//!
//! ```toml
//! [dependencies]
//! brk = { version = "0.3", default-features = false, features = ["backup"] }
//! # Or enable everything:
//! brk = { version = "0.3", features = ["all"] }
//! ```
//!
//! # Example: creating and verifying a backup
//!
//! ```ignore
//! use brk::backup::{
//!     ArtifactType, BackupContext, BackupPolicy, CommandProducer, MemoryArtifactStore,
//!     OrchestratorBuilder,
//! };
//! use std::sync::Arc;
//!
//! async fn example() -> brk::backup::BackupResult<()> {
//!     let orchestrator = OrchestratorBuilder::new(Arc::new(MemoryArtifactStore::new()))
//!         .with_producer(Arc::new(CommandProducer::new(
//!             ArtifactType::Database,
//!             "pg_dump",
//!             ["--format=custom", "appdb"],
//!         )))
//!         .build();
//!
//!     let policy = BackupPolicy::new(chrono::Duration::days(7), 10 * 1024 * 1024 * 1024);
//!     let ctx = BackupContext::new("a1b2c3d", "ops@db-01");
//!
//!     let artifact = orchestrator
//!         .create_backup(ArtifactType::Database, Some(&policy), &ctx)
//!         .await?;
//!     orchestrator.verify(&artifact.id).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Configuration management (enabled with the `config` feature)
#[cfg(feature = "config")]
pub mod config;

/// Observability utilities (enabled with the `observability` feature)
#[cfg(feature = "observability")]
pub mod observability;

/// Backup orchestration core (enabled with the `backup` feature)
#[cfg(feature = "backup")]
pub mod backup;

/// Command-line surface (enabled with the `cli` feature)
#[cfg(feature = "cli")]
pub mod cli;

/// Prelude module for convenient imports
pub mod prelude {
    #[cfg(feature = "config")]
    pub use crate::config::{Configuration, ConfigurationLoader, EnvironmentLoader};

    #[cfg(feature = "observability")]
    pub use crate::observability::OperationLog;

    #[cfg(feature = "backup")]
    pub use crate::backup::{
        ArtifactId, ArtifactStore, ArtifactType, BackupArtifact, BackupContext, BackupError,
        BackupPolicy, BackupResult, ConfirmationToken, EncryptionMode, MetadataRecord,
        Orchestrator, OrchestratorBuilder, RecipientKey, RecoveryRequest, RestoreReport,
    };
}
