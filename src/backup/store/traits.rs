//! Artifact Store Traits
//!
//! Defines the two-phase storage contract used by the integrity recorder.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::backup::models::{ArtifactId, MetadataRecord};

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Streaming handle on a committed blob
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// Error types for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// IO error during storage operation
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Key not found
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Generic backend error
    #[error("Backend error: {0}")]
    Backend(String),
}

/// State of a visible storage entry
#[derive(Debug, Clone, PartialEq)]
pub enum EntryState {
    /// Blob and metadata are both present
    Complete(MetadataRecord),
    /// Blob without metadata; never listed, safe to collect
    Orphan,
    /// Metadata whose blob is missing, or metadata that cannot be parsed
    Corrupt {
        /// The record, when it could be parsed
        record: Option<MetadataRecord>,
        /// What is wrong with the entry
        reason: String,
    },
}

/// A visible entry in the store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    /// Storage key (the artifact id for well-formed entries)
    pub key: String,
    /// Parsed id, when the key is a valid artifact id
    pub id: Option<ArtifactId>,
    /// Blob size in bytes (0 when absent)
    pub blob_bytes: u64,
    /// Entry state
    pub state: EntryState,
}

/// Two-phase artifact store
///
/// Writes go to a staging area first. [`ArtifactStore::commit`] makes blob and
/// metadata visible together in a single step; readers never observe one half
/// of a committed pair appearing before the other.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Get the backend type name (e.g., "file", "memory")
    fn backend_type(&self) -> &'static str;

    /// Check if the backend is available
    async fn is_available(&self) -> bool;

    /// Stream `source` into staging, returning the number of bytes persisted
    async fn stage_blob(
        &self,
        id: &ArtifactId,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StoreResult<u64>;

    /// Write the metadata record into staging
    async fn stage_metadata(&self, id: &ArtifactId, record: &MetadataRecord) -> StoreResult<()>;

    /// Publish a fully staged pair. Fails if either half is missing or the id
    /// is already visible.
    async fn commit(&self, id: &ArtifactId) -> StoreResult<()>;

    /// Remove anything staged under `key`. Best-effort and synchronous so it
    /// can run from `Drop`.
    fn discard_staged(&self, key: &str);

    /// Open a visible blob for streaming
    async fn open_blob(&self, id: &ArtifactId) -> StoreResult<Option<BlobReader>>;

    /// Read a visible blob into memory; meant for small blobs and inspection
    async fn read_blob(&self, id: &ArtifactId) -> StoreResult<Option<Vec<u8>>> {
        match self.open_blob(id).await? {
            Some(mut reader) => {
                let mut data = Vec::new();
                reader.read_to_end(&mut data).await?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    /// Read a visible metadata record
    async fn read_metadata(&self, id: &ArtifactId) -> StoreResult<Option<MetadataRecord>>;

    /// Delete a visible entry (either half may be missing), returning bytes freed
    async fn delete(&self, key: &str) -> StoreResult<u64>;

    /// Enumerate visible entries with their state
    async fn entries(&self) -> StoreResult<Vec<StoredEntry>>;

    /// Keys currently in staging
    async fn staged(&self) -> StoreResult<Vec<String>>;

    /// Metadata of complete entries (default implementation)
    async fn list_metadata(&self) -> StoreResult<Vec<MetadataRecord>> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .filter_map(|entry| match entry.state {
                EntryState::Complete(record) => Some(record),
                _ => None,
            })
            .collect())
    }
}

/// Builder for creating artifact stores from configuration
pub struct ArtifactStoreBuilder {
    backend_type: String,
    base_path: Option<PathBuf>,
}

impl ArtifactStoreBuilder {
    /// Create a new builder
    pub fn new(backend_type: &str) -> Self {
        Self {
            backend_type: backend_type.to_string(),
            base_path: None,
        }
    }

    /// Set the root directory (for the file backend)
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Build the artifact store
    pub fn build(self) -> StoreResult<Arc<dyn ArtifactStore>> {
        match self.backend_type.as_str() {
            "file" | "filesystem" => {
                let base_path = self
                    .base_path
                    .ok_or_else(|| StoreError::Configuration("base_path is required".into()))?;
                Ok(Arc::new(super::FileArtifactStore::new(base_path)?))
            }
            "memory" => Ok(Arc::new(super::MemoryArtifactStore::new())),
            unknown => Err(StoreError::Configuration(format!(
                "Unknown backend type: {}",
                unknown
            ))),
        }
    }
}
