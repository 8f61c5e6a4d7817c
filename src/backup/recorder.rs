//! Integrity & metadata recorder
//!
//! Computes the SHA-256 checksum over the final stored bytes as they stream
//! into the store, and persists the blob and its metadata record as a single
//! unit through the store's two-phase protocol.

use super::errors::{BackupError, BackupResult};
use super::models::{ArtifactId, ArtifactType, BackupArtifact, MetadataRecord};
use super::orchestrator::within;
use super::store::{ArtifactStore, BlobReader, StoreError};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, info};

/// Lowercase hex SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Reader adapter that hashes and counts every byte passing through it
pub(crate) struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    bytes: u64,
}

impl<R> HashingReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    /// Hex checksum and byte count of everything read so far
    pub(crate) fn finish(self) -> (String, u64) {
        (hex::encode(self.hasher.finalize()), self.bytes)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for HashingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let fresh = &buf.filled()[before..];
        this.hasher.update(fresh);
        this.bytes += fresh.len() as u64;
        Poll::Ready(Ok(()))
    }
}

/// Stream `reader` into `sink`, returning the hex checksum and byte count
pub(crate) async fn copy_hashed<R, W>(reader: R, sink: &mut W) -> io::Result<(String, u64)>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut hashing = HashingReader::new(reader);
    tokio::io::copy(&mut hashing, sink).await?;
    Ok(hashing.finish())
}

/// Everything the recorder needs to describe a new artifact
#[derive(Debug, Clone)]
pub struct FinalizeSpec<'a> {
    pub artifact_id: &'a ArtifactId,
    pub artifact_type: ArtifactType,
    pub source_revision: &'a str,
    pub created_by: &'a str,
    pub encrypted: bool,
    pub compression_level: u32,
    pub window: chrono::Duration,
    pub created_at: DateTime<Utc>,
}

/// Removes a staged entry unless disarmed after a successful commit
///
/// Runs on every early return and when the enclosing future is dropped.
struct StagingGuard {
    store: Arc<dyn ArtifactStore>,
    key: String,
    armed: bool,
}

impl StagingGuard {
    fn new(store: Arc<dyn ArtifactStore>, id: &ArtifactId) -> Self {
        Self {
            store,
            key: id.to_string(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!(key = %self.key, "discarding staged artifact");
            self.store.discard_staged(&self.key);
        }
    }
}

/// Writes and verifies blob + metadata pairs
#[derive(Clone)]
pub struct IntegrityRecorder {
    store: Arc<dyn ArtifactStore>,
}

impl IntegrityRecorder {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Stream `blob` into the store with a matching metadata record, then make
    /// both visible
    ///
    /// `expected_len` is the size of the sealed payload; a store that persists
    /// fewer bytes fails the write. Staged writes are bounded by
    /// `store_timeout`. The final commit is a single rename and is not
    /// interrupted once started.
    pub async fn finalize(
        &self,
        blob: &mut (dyn AsyncRead + Send + Unpin),
        expected_len: u64,
        spec: &FinalizeSpec<'_>,
        store_timeout: Duration,
    ) -> BackupResult<(BackupArtifact, MetadataRecord)> {
        let id = spec.artifact_id;
        let retention_until = spec
            .created_at
            .checked_add_signed(spec.window)
            .ok_or_else(|| {
                BackupError::policy(format!(
                    "retention window of {} days puts the deadline out of range",
                    spec.window.num_days()
                ))
            })?;

        let guard = StagingGuard::new(Arc::clone(&self.store), id);

        let mut hashing = HashingReader::new(blob);
        let written = within("store", store_timeout, async {
            self.store
                .stage_blob(id, &mut hashing)
                .await
                .map_err(BackupError::from)
        })
        .await?;
        let (checksum, read) = hashing.finish();
        if written != expected_len || read != expected_len {
            return Err(BackupError::recorder(format!(
                "partial write for {}: staged {} of {} bytes",
                id, written, expected_len
            )));
        }

        let record = MetadataRecord {
            backup_name: id.clone(),
            backup_type: spec.artifact_type,
            timestamp: spec.created_at,
            size_bytes: expected_len,
            checksum_sha256: checksum,
            encrypted: spec.encrypted,
            retention_until,
            created_by: spec.created_by.to_string(),
            source_revision: spec.source_revision.to_string(),
            compression_level: spec.compression_level,
        };

        within("store", store_timeout, async {
            self.store
                .stage_metadata(id, &record)
                .await
                .map_err(BackupError::from)
        })
        .await?;

        self.store
            .commit(id)
            .await
            .map_err(|e| BackupError::recorder(format!("commit of {} failed: {}", id, e)))?;
        guard.disarm();

        info!(
            artifact_id = %id,
            artifact_type = %spec.artifact_type,
            size_bytes = record.size_bytes,
            checksum = %record.checksum_sha256,
            "artifact committed"
        );
        Ok((record.artifact(), record))
    }

    /// Fetch a visible pair, classifying half-present pairs as corruption
    pub async fn fetch_pair(&self, id: &ArtifactId) -> BackupResult<(MetadataRecord, BlobReader)> {
        let metadata = match self.store.read_metadata(id).await {
            Ok(record) => record,
            Err(StoreError::Deserialization(e)) => {
                return Err(BackupError::corrupted(id, format!("unreadable metadata: {}", e)))
            }
            Err(e) => return Err(e.into()),
        };
        let blob = self.store.open_blob(id).await?;

        match (metadata, blob) {
            (None, None) => Err(BackupError::NotFound {
                artifact_id: id.clone(),
            }),
            (Some(_), None) => Err(BackupError::corrupted(
                id,
                "metadata present but blob is missing",
            )),
            (None, Some(_)) => Err(BackupError::corrupted(id, "blob present without metadata")),
            (Some(record), Some(_)) if &record.backup_name != id => Err(BackupError::corrupted(
                id,
                format!("metadata describes {}", record.backup_name),
            )),
            (Some(record), Some(blob)) => Ok((record, blob)),
        }
    }

    /// Recompute the checksum of a stored pair
    pub async fn verify_integrity(&self, id: &ArtifactId) -> BackupResult<MetadataRecord> {
        let (record, blob) = self.fetch_pair(id).await?;
        let (actual, _) = copy_hashed(blob, &mut tokio::io::sink()).await?;
        check_checksum(&record, &actual)?;
        debug!(artifact_id = %id, "integrity verified");
        Ok(record)
    }
}

/// Compare a computed checksum against the one a record carries
pub(crate) fn check_checksum(record: &MetadataRecord, actual: &str) -> BackupResult<()> {
    if !actual.eq_ignore_ascii_case(&record.checksum_sha256) {
        return Err(BackupError::Integrity {
            artifact_id: record.backup_name.clone(),
            expected: record.checksum_sha256.clone(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::store::MemoryArtifactStore;

    fn spec<'a>(id: &'a ArtifactId) -> FinalizeSpec<'a> {
        FinalizeSpec {
            artifact_id: id,
            artifact_type: ArtifactType::Database,
            source_revision: "rev1",
            created_by: "ops@db",
            encrypted: false,
            compression_level: 0,
            window: chrono::Duration::days(7),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_finalize_then_verify() {
        let store = Arc::new(MemoryArtifactStore::new());
        let recorder = IntegrityRecorder::new(store.clone());
        let id = ArtifactId::parse("database_1").unwrap();

        let (artifact, record) = recorder
            .finalize(&mut &b"dump"[..], 4, &spec(&id), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(artifact.size_bytes, 4);
        assert_eq!(
            record.retention_until - record.timestamp,
            chrono::Duration::days(7)
        );
        recorder.verify_integrity(&id).await.unwrap();
        assert!(store.staged().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_verify_detects_flipped_byte() {
        let store = Arc::new(MemoryArtifactStore::new());
        let recorder = IntegrityRecorder::new(store.clone());
        let id = ArtifactId::parse("database_2").unwrap();
        recorder
            .finalize(&mut &b"dump"[..], 4, &spec(&id), Duration::from_secs(5))
            .await
            .unwrap();

        store.replace_blob(id.as_str(), b"dumq".to_vec());
        let err = recorder.verify_integrity(&id).await.unwrap_err();
        assert_eq!(err.kind(), "IntegrityError");
    }

    #[tokio::test]
    async fn test_out_of_range_deadline_is_a_policy_error() {
        let store = Arc::new(MemoryArtifactStore::new());
        let recorder = IntegrityRecorder::new(store.clone());
        let id = ArtifactId::parse("database_4").unwrap();
        let spec = FinalizeSpec {
            window: chrono::Duration::days(100_000_000),
            ..spec(&id)
        };

        let err = recorder
            .finalize(&mut &b"dump"[..], 4, &spec, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "PolicyViolation");
        assert!(store.entries().await.unwrap().is_empty());
        assert!(store.staged().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hashing_reader_matches_digest() {
        let data = vec![9u8; 200_000];
        let mut sink = Vec::new();
        let (checksum, bytes) = copy_hashed(&data[..], &mut sink).await.unwrap();
        assert_eq!(bytes, 200_000);
        assert_eq!(checksum, sha256_hex(&data));
        assert_eq!(sink, data);
    }

    #[tokio::test]
    async fn test_fetch_pair_classification() {
        let store = Arc::new(MemoryArtifactStore::new());
        let recorder = IntegrityRecorder::new(store.clone());
        let id = ArtifactId::parse("database_3").unwrap();

        assert!(matches!(
            recorder.fetch_pair(&id).await,
            Err(BackupError::NotFound { .. })
        ));

        recorder
            .finalize(&mut &b"dump"[..], 4, &spec(&id), Duration::from_secs(5))
            .await
            .unwrap();
        store.remove_blob(id.as_str());
        assert!(matches!(
            recorder.fetch_pair(&id).await,
            Err(BackupError::Corruption { .. })
        ));
    }
}
