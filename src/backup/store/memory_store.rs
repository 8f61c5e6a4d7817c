//! In-memory artifact store, used by tests and dry runs

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::traits::{ArtifactStore, BlobReader, EntryState, StoreError, StoreResult, StoredEntry};
use crate::backup::models::{ArtifactId, MetadataRecord};

#[derive(Debug, Clone, Default)]
struct Slot {
    blob: Option<Vec<u8>>,
    metadata: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct Inner {
    staging: BTreeMap<String, Slot>,
    visible: BTreeMap<String, Slot>,
}

/// In-memory artifact store
///
/// Metadata is kept in its serialized JSON form so tests can corrupt either
/// half of a pair the same way a damaged disk would.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    inner: Mutex<Inner>,
}

impl MemoryArtifactStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the stored blob of a visible entry
    pub fn replace_blob(&self, key: &str, data: Vec<u8>) -> bool {
        match self.lock().visible.get_mut(key) {
            Some(slot) => {
                slot.blob = Some(data);
                true
            }
            None => false,
        }
    }

    /// Drop the blob half of a visible entry
    pub fn remove_blob(&self, key: &str) -> bool {
        self.lock()
            .visible
            .get_mut(key)
            .map(|slot| slot.blob.take().is_some())
            .unwrap_or(false)
    }

    /// Insert a raw visible entry, bypassing staging
    pub fn insert_raw(&self, key: &str, blob: Option<Vec<u8>>, metadata: Option<Vec<u8>>) {
        self.lock()
            .visible
            .insert(key.to_string(), Slot { blob, metadata });
    }
}

fn parse_metadata(data: &[u8]) -> StoreResult<MetadataRecord> {
    serde_json::from_slice(data).map_err(|e| StoreError::Deserialization(e.to_string()))
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    fn backend_type(&self) -> &'static str {
        "memory"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn stage_blob(
        &self,
        id: &ArtifactId,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StoreResult<u64> {
        let mut data = Vec::new();
        source.read_to_end(&mut data).await?;
        let written = data.len() as u64;
        self.lock().staging.entry(id.to_string()).or_default().blob = Some(data);
        Ok(written)
    }

    async fn stage_metadata(&self, id: &ArtifactId, record: &MetadataRecord) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let mut inner = self.lock();
        inner.staging.entry(id.to_string()).or_default().metadata = Some(json);
        Ok(())
    }

    async fn commit(&self, id: &ArtifactId) -> StoreResult<()> {
        let mut inner = self.lock();
        let complete = inner
            .staging
            .get(id.as_str())
            .map(|slot| slot.blob.is_some() && slot.metadata.is_some())
            .unwrap_or(false);
        if !complete {
            return Err(StoreError::NotFound(format!(
                "incomplete staged pair for {}",
                id
            )));
        }
        if inner.visible.contains_key(id.as_str()) {
            return Err(StoreError::Backend(format!(
                "artifact {} is already committed",
                id
            )));
        }
        if let Some(slot) = inner.staging.remove(id.as_str()) {
            inner.visible.insert(id.to_string(), slot);
        }
        Ok(())
    }

    fn discard_staged(&self, key: &str) {
        self.lock().staging.remove(key);
    }

    async fn open_blob(&self, id: &ArtifactId) -> StoreResult<Option<BlobReader>> {
        let blob = self
            .lock()
            .visible
            .get(id.as_str())
            .and_then(|slot| slot.blob.clone());
        Ok(blob.map(|data| Box::new(std::io::Cursor::new(data)) as BlobReader))
    }

    async fn read_metadata(&self, id: &ArtifactId) -> StoreResult<Option<MetadataRecord>> {
        let raw = self
            .lock()
            .visible
            .get(id.as_str())
            .and_then(|slot| slot.metadata.clone());
        raw.map(|data| parse_metadata(&data)).transpose()
    }

    async fn delete(&self, key: &str) -> StoreResult<u64> {
        Ok(self
            .lock()
            .visible
            .remove(key)
            .map(|slot| {
                slot.blob.map(|b| b.len() as u64).unwrap_or(0)
                    + slot.metadata.map(|m| m.len() as u64).unwrap_or(0)
            })
            .unwrap_or(0))
    }

    async fn entries(&self) -> StoreResult<Vec<StoredEntry>> {
        let inner = self.lock();
        Ok(inner
            .visible
            .iter()
            .map(|(key, slot)| {
                let state = match (&slot.blob, &slot.metadata) {
                    (Some(_), None) => EntryState::Orphan,
                    (None, None) => EntryState::Corrupt {
                        record: None,
                        reason: "empty entry".to_string(),
                    },
                    (has_blob, Some(data)) => match parse_metadata(data) {
                        Ok(record) if has_blob.is_some() => EntryState::Complete(record),
                        Ok(record) => EntryState::Corrupt {
                            record: Some(record),
                            reason: "metadata present but blob is missing".to_string(),
                        },
                        Err(e) => EntryState::Corrupt {
                            record: None,
                            reason: format!("unreadable metadata: {}", e),
                        },
                    },
                };
                StoredEntry {
                    key: key.clone(),
                    id: ArtifactId::parse(key).ok(),
                    blob_bytes: slot.blob.as_ref().map(|b| b.len() as u64).unwrap_or(0),
                    state,
                }
            })
            .collect())
    }

    async fn staged(&self) -> StoreResult<Vec<String>> {
        Ok(self.lock().staging.keys().cloned().collect())
    }
}
