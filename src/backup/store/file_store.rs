//! File System Artifact Store
//!
//! Layout under the root directory:
//!
//! ```text
//! root/
//!   staging/<id>/{blob.bin,metadata.json}    in-flight, invisible
//!   artifacts/<id>/{blob.bin,metadata.json}  committed
//!   trash/<id>.<uuid>/                       deletions in progress
//! ```

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use uuid::Uuid;

use super::traits::{ArtifactStore, BlobReader, EntryState, StoreError, StoreResult, StoredEntry};
use crate::backup::models::{ArtifactId, MetadataRecord};

const STAGING_DIR: &str = "staging";
const ARTIFACTS_DIR: &str = "artifacts";
const TRASH_DIR: &str = "trash";
const BLOB_FILE: &str = "blob.bin";
const METADATA_FILE: &str = "metadata.json";

/// File system artifact store
///
/// Commit is a single directory rename from `staging/` into `artifacts/`, so a
/// pair becomes visible all at once or not at all.
pub struct FileArtifactStore {
    root: PathBuf,
}

impl FileArtifactStore {
    /// Create a new file store, creating the directory layout if needed
    pub fn new<P: AsRef<Path>>(root: P) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();

        for area in [STAGING_DIR, ARTIFACTS_DIR, TRASH_DIR] {
            std::fs::create_dir_all(root.join(area))?;
        }

        // Interrupted deletions are finished on open
        if let Ok(entries) = std::fs::read_dir(root.join(TRASH_DIR)) {
            for entry in entries.flatten() {
                let _ = std::fs::remove_dir_all(entry.path());
            }
        }

        Ok(Self { root })
    }

    /// Get the root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a committed entry
    pub fn artifact_dir(&self, key: &str) -> StoreResult<PathBuf> {
        Ok(self.root.join(ARTIFACTS_DIR).join(safe_key(key)?))
    }

    fn staging_dir(&self, key: &str) -> StoreResult<PathBuf> {
        Ok(self.root.join(STAGING_DIR).join(safe_key(key)?))
    }

    async fn write_synced(path: &Path, data: &[u8]) -> StoreResult<u64> {
        Self::copy_synced(path, &mut &data[..]).await
    }

    async fn copy_synced(
        path: &Path,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StoreResult<u64> {
        let mut file = fs::File::create(path).await?;
        tokio::io::copy(source, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(fs::metadata(path).await?.len())
    }

    async fn read_optional(path: &Path) -> StoreResult<Option<Vec<u8>>> {
        match fs::read(path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn file_len(path: &Path) -> u64 {
        fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
    }

    async fn sync_dir(path: &Path) {
        // Directory fsync is not supported everywhere
        if let Ok(dir) = fs::File::open(path).await {
            let _ = dir.sync_all().await;
        }
    }
}

/// Reject keys that could escape their storage area
fn safe_key(key: &str) -> StoreResult<&str> {
    if key.is_empty() || key == "." || key == ".." || key.contains(['/', '\\']) {
        return Err(StoreError::Configuration(format!(
            "invalid storage key '{}'",
            key
        )));
    }
    Ok(key)
}

fn parse_metadata(data: &[u8]) -> StoreResult<MetadataRecord> {
    serde_json::from_slice(data).map_err(|e| StoreError::Deserialization(e.to_string()))
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    fn backend_type(&self) -> &'static str {
        "file"
    }

    async fn is_available(&self) -> bool {
        fs::metadata(self.root.join(ARTIFACTS_DIR))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn stage_blob(
        &self,
        id: &ArtifactId,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StoreResult<u64> {
        let dir = self.staging_dir(id.as_str())?;
        fs::create_dir_all(&dir).await?;
        Self::copy_synced(&dir.join(BLOB_FILE), source).await
    }

    async fn stage_metadata(&self, id: &ArtifactId, record: &MetadataRecord) -> StoreResult<()> {
        let dir = self.staging_dir(id.as_str())?;
        fs::create_dir_all(&dir).await?;
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Self::write_synced(&dir.join(METADATA_FILE), &json).await?;
        Ok(())
    }

    async fn commit(&self, id: &ArtifactId) -> StoreResult<()> {
        let staged = self.staging_dir(id.as_str())?;
        let visible = self.artifact_dir(id.as_str())?;

        for file in [BLOB_FILE, METADATA_FILE] {
            if fs::metadata(staged.join(file)).await.is_err() {
                return Err(StoreError::NotFound(format!(
                    "{} is not staged for {}",
                    file, id
                )));
            }
        }
        if fs::metadata(&visible).await.is_ok() {
            return Err(StoreError::Backend(format!(
                "artifact {} is already committed",
                id
            )));
        }

        Self::sync_dir(&staged).await;
        fs::rename(&staged, &visible).await?;
        Self::sync_dir(&self.root.join(ARTIFACTS_DIR)).await;
        Ok(())
    }

    fn discard_staged(&self, key: &str) {
        if let Ok(dir) = self.staging_dir(key) {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    async fn open_blob(&self, id: &ArtifactId) -> StoreResult<Option<BlobReader>> {
        let path = self.artifact_dir(id.as_str())?.join(BLOB_FILE);
        match fs::File::open(&path).await {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_metadata(&self, id: &ArtifactId) -> StoreResult<Option<MetadataRecord>> {
        let dir = self.artifact_dir(id.as_str())?;
        match Self::read_optional(&dir.join(METADATA_FILE)).await? {
            Some(data) => Ok(Some(parse_metadata(&data)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<u64> {
        let dir = self.artifact_dir(key)?;
        if fs::metadata(&dir).await.is_err() {
            return Ok(0); // Idempotent delete
        }

        let freed =
            Self::file_len(&dir.join(BLOB_FILE)).await + Self::file_len(&dir.join(METADATA_FILE)).await;

        // Leave the visible namespace first so a half-deleted pair is never listed
        let trash = self
            .root
            .join(TRASH_DIR)
            .join(format!("{}.{}", key, Uuid::new_v4().simple()));
        fs::rename(&dir, &trash).await?;
        fs::remove_dir_all(&trash).await?;

        Ok(freed)
    }

    async fn entries(&self) -> StoreResult<Vec<StoredEntry>> {
        let mut result = Vec::new();
        let mut dir = fs::read_dir(self.root.join(ARTIFACTS_DIR)).await?;

        while let Some(entry) = dir.next_entry().await? {
            match entry.file_type().await {
                Ok(ft) if ft.is_dir() => {}
                _ => continue,
            }
            let key = entry.file_name().to_string_lossy().to_string();
            let path = entry.path();
            let id = ArtifactId::parse(&key).ok();

            let blob_path = path.join(BLOB_FILE);
            let has_blob = fs::metadata(&blob_path).await.is_ok();
            let blob_bytes = Self::file_len(&blob_path).await;

            let state = match Self::read_optional(&path.join(METADATA_FILE)).await? {
                None if has_blob => EntryState::Orphan,
                None => EntryState::Corrupt {
                    record: None,
                    reason: "empty artifact directory".to_string(),
                },
                Some(data) => match parse_metadata(&data) {
                    Ok(record) if has_blob => EntryState::Complete(record),
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

            result.push(StoredEntry {
                key,
                id,
                blob_bytes,
                state,
            });
        }

        Ok(result)
    }

    async fn staged(&self) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut dir = fs::read_dir(self.root.join(STAGING_DIR)).await?;
        while let Some(entry) = dir.next_entry().await? {
            keys.push(entry.file_name().to_string_lossy().to_string());
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::models::ArtifactType;
    use chrono::{Duration, Utc};
    use tempfile::tempdir;

    fn record_for(id: &ArtifactId) -> MetadataRecord {
        let now = Utc::now();
        MetadataRecord {
            backup_name: id.clone(),
            backup_type: ArtifactType::Logs,
            timestamp: now,
            size_bytes: 5,
            checksum_sha256: "00".repeat(32),
            encrypted: false,
            retention_until: now + Duration::days(1),
            created_by: "test@host".to_string(),
            source_revision: "abc".to_string(),
            compression_level: 0,
        }
    }

    #[tokio::test]
    async fn test_staged_pair_is_invisible_until_commit() {
        let dir = tempdir().unwrap();
        let store = FileArtifactStore::new(dir.path()).unwrap();
        let id = ArtifactId::parse("logs_20240101_000000_deadbeef").unwrap();

        assert_eq!(store.stage_blob(&id, &mut &b"hello"[..]).await.unwrap(), 5);
        store.stage_metadata(&id, &record_for(&id)).await.unwrap();
        assert!(store.read_blob(&id).await.unwrap().is_none());
        assert!(store.entries().await.unwrap().is_empty());

        store.commit(&id).await.unwrap();
        assert_eq!(store.read_blob(&id).await.unwrap().unwrap(), b"hello");
        assert_eq!(store.list_metadata().await.unwrap().len(), 1);
        assert!(store.staged().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_requires_both_halves() {
        let dir = tempdir().unwrap();
        let store = FileArtifactStore::new(dir.path()).unwrap();
        let id = ArtifactId::parse("logs_20240101_000000_deadbeef").unwrap();

        store.stage_blob(&id, &mut &b"hello"[..]).await.unwrap();
        assert!(matches!(store.commit(&id).await, Err(StoreError::NotFound(_))));

        store.discard_staged(id.as_str());
        assert!(store.staged().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_entry_states() {
        let dir = tempdir().unwrap();
        let store = FileArtifactStore::new(dir.path()).unwrap();
        let id = ArtifactId::parse("logs_20240101_000000_deadbeef").unwrap();
        store.stage_blob(&id, &mut &b"hello"[..]).await.unwrap();
        store.stage_metadata(&id, &record_for(&id)).await.unwrap();
        store.commit(&id).await.unwrap();

        std::fs::remove_file(store.artifact_dir(id.as_str()).unwrap().join(BLOB_FILE)).unwrap();
        let entries = store.entries().await.unwrap();
        assert!(matches!(entries[0].state, EntryState::Corrupt { record: Some(_), .. }));
        assert!(store.list_metadata().await.unwrap().is_empty());

        let orphan = dir.path().join(ARTIFACTS_DIR).join("stray");
        std::fs::create_dir_all(&orphan).unwrap();
        std::fs::write(orphan.join(BLOB_FILE), b"x").unwrap();
        let entries = store.entries().await.unwrap();
        assert!(entries
            .iter()
            .any(|e| e.key == "stray" && e.state == EntryState::Orphan));
    }

    #[tokio::test]
    async fn test_delete_reports_freed_bytes() {
        let dir = tempdir().unwrap();
        let store = FileArtifactStore::new(dir.path()).unwrap();
        let id = ArtifactId::parse("logs_20240101_000000_deadbeef").unwrap();
        store.stage_blob(&id, &mut &b"hello"[..]).await.unwrap();
        store.stage_metadata(&id, &record_for(&id)).await.unwrap();
        store.commit(&id).await.unwrap();

        let freed = store.delete(id.as_str()).await.unwrap();
        assert!(freed > 5);
        assert_eq!(store.delete(id.as_str()).await.unwrap(), 0);
        assert!(store.read_metadata(&id).await.unwrap().is_none());
    }

    #[test]
    fn test_rejects_unsafe_keys() {
        assert!(safe_key("..").is_err());
        assert!(safe_key("a/b").is_err());
        assert!(safe_key("").is_err());
        assert!(safe_key("database_1").is_ok());
    }
}
