//! Recovery engine
//!
//! Restores one artifact into a target through a fixed sequence of states:
//!
//! ```text
//! Lock ─► Fetch ─► Verify ─► Decrypt ─► Confirm ─► Apply ─► Report
//! ```
//!
//! Every state fails closed. Fetch copies the blob into a private spool while
//! hashing it, so the bytes that are verified are the bytes that get decrypted.
//! The spool and the decrypted payload live in private temporary directories
//! that are removed on every exit path.

use super::atomic::{EphemeralPlaintext, ScratchDir};
use super::compression::{self, Decompressor};
use super::encryption::{missing_key_error, CryptoError, EncryptionProvider, RecipientKey};
use super::errors::{BackupError, BackupResult};
use super::locks::LockTable;
use super::models::{ArtifactId, ArtifactType, RecoveryRequest, RestoreReport};
use super::orchestrator::{within, OperationTimeouts};
use super::recorder::{check_checksum, copy_hashed, IntegrityRecorder};
use super::target::{RestorePayload, RestoreTarget};
use std::collections::HashMap;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

const SPOOL_FILE: &str = "blob";

/// Per-call settings for a restore
#[derive(Debug, Clone, Default)]
pub struct RestoreContext {
    pub timeouts: OperationTimeouts,
}

impl RestoreContext {
    pub fn new(timeouts: OperationTimeouts) -> Self {
        Self { timeouts }
    }
}

/// Verifies, decrypts and applies artifacts
#[derive(Clone)]
pub struct RecoveryEngine {
    recorder: IntegrityRecorder,
    locks: LockTable,
    encryption: Arc<dyn EncryptionProvider>,
    recipient_key: Option<RecipientKey>,
    targets: HashMap<ArtifactType, Arc<dyn RestoreTarget>>,
}

impl RecoveryEngine {
    pub fn new(
        recorder: IntegrityRecorder,
        locks: LockTable,
        encryption: Arc<dyn EncryptionProvider>,
        recipient_key: Option<RecipientKey>,
        targets: HashMap<ArtifactType, Arc<dyn RestoreTarget>>,
    ) -> Self {
        Self {
            recorder,
            locks,
            encryption,
            recipient_key,
            targets,
        }
    }

    /// Run the restore state machine for `request`
    pub async fn restore(
        &self,
        request: &RecoveryRequest,
        ctx: &RestoreContext,
    ) -> BackupResult<RestoreReport> {
        let started = Instant::now();
        let id = &request.artifact_ref;

        let _lock = self
            .locks
            .acquire_artifact(id, ctx.timeouts.lock_wait)
            .await?;
        info!(artifact_id = %id, target = %request.target, "restore started");

        // Fetch
        let spool = ScratchDir::new("brk-fetch-")?;
        let (record, checksum) = within("store", ctx.timeouts.store, async {
            let (record, blob) = self.recorder.fetch_pair(id).await?;
            let mut file = tokio::fs::File::from_std(spool.create(SPOOL_FILE)?);
            let (checksum, _) = copy_hashed(blob, &mut file).await?;
            file.sync_all().await?;
            Ok::<_, BackupError>((record, checksum))
        })
        .await?;

        // Verify
        if let Err(e) = check_checksum(&record, &checksum) {
            error!(artifact_id = %id, "integrity check failed, restore aborted");
            return Err(e);
        }

        let target = self.targets.get(&record.backup_type).cloned().ok_or_else(|| {
            BackupError::config(format!(
                "no restore target configured for {} artifacts",
                record.backup_type
            ))
        })?;

        // Decrypt
        let key = match (record.encrypted, &self.recipient_key) {
            (true, Some(key)) => Some(key.clone()),
            (true, None) => return Err(missing_key_error(record.backup_type)),
            (false, _) => None,
        };
        let plaintext = within(
            "decrypt",
            ctx.timeouts.encrypt,
            materialize(
                id.clone(),
                spool.join(SPOOL_FILE),
                key,
                record.compression_level,
                Arc::clone(&self.encryption),
            ),
        )
        .await?;

        // Confirm
        match &request.confirmation_token {
            Some(token) if token.is_bound_to(id) => {}
            Some(token) => {
                return Err(BackupError::ConfirmationRequired {
                    artifact_id: id.clone(),
                    message: format!("token confirms {}, not this artifact", token.artifact_id()),
                })
            }
            None => {
                return Err(BackupError::ConfirmationRequired {
                    artifact_id: id.clone(),
                    message: "no confirmation token supplied".to_string(),
                })
            }
        }

        // Apply
        let payload = RestorePayload {
            artifact_id: id,
            artifact_type: record.backup_type,
            plaintext: &plaintext,
        };
        let summary = within("apply", ctx.timeouts.apply, async {
            target
                .apply(&request.target, &payload)
                .await
                .map_err(|message| BackupError::ApplyFailed {
                    artifact_id: id.clone(),
                    message,
                })
        })
        .await?;

        // Report
        let report = RestoreReport {
            artifact_id: id.clone(),
            artifact_type: record.backup_type,
            target: request.target.to_string(),
            verified: true,
            decrypted: record.encrypted,
            bytes_restored: summary.bytes_applied,
            items_applied: summary.items_applied,
            duration: started.elapsed(),
        };
        info!(
            artifact_id = %id,
            bytes_restored = report.bytes_restored,
            duration_ms = report.duration.as_millis() as u64,
            "restore finished"
        );
        Ok(report)
    }
}

/// Decrypt and decompress a verified spool into a scoped plaintext file
async fn materialize(
    id: ArtifactId,
    spool: PathBuf,
    key: Option<RecipientKey>,
    compression_level: u32,
    provider: Arc<dyn EncryptionProvider>,
) -> BackupResult<EphemeralPlaintext> {
    tokio::task::spawn_blocking(move || {
        EphemeralPlaintext::build(|file| {
            let mut source = BufReader::new(std::fs::File::open(&spool)?);
            let mut sink = Decompressor::new(file, compression_level);
            match &key {
                Some(key) => match provider.decrypt(&mut source, &mut sink, key) {
                    Ok(_) => {}
                    Err(CryptoError::Io(e)) => return Err(decode_error(&id, e)),
                    Err(e) => return Err(e.into()),
                },
                None => {
                    io::copy(&mut source, &mut sink).map_err(|e| decode_error(&id, e))?;
                }
            }
            sink.finish().map_err(|e| decode_error(&id, e))?;
            Ok(())
        })
    })
    .await
    .map_err(|e| BackupError::encryption(format!("restore worker failed: {}", e)))?
}

/// Classify an I/O failure while decoding a verified payload
fn decode_error(id: &ArtifactId, err: io::Error) -> BackupError {
    if compression::is_malformed(&err) {
        BackupError::corrupted(id, format!("payload failed to decompress: {}", err))
    } else {
        BackupError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_classification() {
        let id = ArtifactId::parse("logs_1").unwrap();
        let malformed = io::Error::new(io::ErrorKind::InvalidInput, "corrupt deflate stream");
        assert!(decode_error(&id, malformed).is_integrity_failure());

        let disk_full = io::Error::new(io::ErrorKind::Other, "no space left on device");
        assert_eq!(decode_error(&id, disk_full).kind(), "IoError");
    }

    #[tokio::test]
    async fn test_materialize_rejects_garbage_gzip() {
        let spool = ScratchDir::new("brk-test-").unwrap();
        std::fs::write(spool.join(SPOOL_FILE), b"not gzip at all").unwrap();

        let err = materialize(
            ArtifactId::parse("logs_2").unwrap(),
            spool.join(SPOOL_FILE),
            None,
            6,
            Arc::new(crate::backup::encryption::AesGcmProvider),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.kind(), "Corruption");
    }
}
