//! Orchestrator: sequences producers, compression, encryption and the recorder
//! for backups, and the recovery engine for restores.
//!
//! A backup moves through private scratch files so memory use stays bounded by
//! the chunk size rather than the artifact size:
//!
//! ```text
//! producer ─(bounded read)─► raw ─(compress, encrypt)─► sealed ─(hash)─► store
//! ```

use super::atomic::{create_private, ScratchDir};
use super::compression::Compressor;
use super::encryption::{
    missing_key_error, resolve_encryption, AesGcmProvider, EncryptionProvider, RecipientKey,
};
use super::errors::{BackupError, BackupResult};
use super::locks::{LockTable, LockWait};
use super::models::{
    ArtifactId, ArtifactType, BackupArtifact, BackupFilter, BackupOutcome, BackupPolicy,
    CollectOptions, CollectionReport, MetadataRecord, RecoveryRequest, RestoreReport, RunReport,
};
use super::plan::{DisasterPlan, PlanEntry, PlanStatus};
use super::producer::{BackupProducer, ProducerError};
use super::recorder::{FinalizeSpec, IntegrityRecorder};
use super::recovery::{RecoveryEngine, RestoreContext};
use super::retention::RetentionCollector;
use super::store::{ArtifactStore, EntryState, StoreError};
use super::target::RestoreTarget;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, warn};
use zeroize::Zeroizing;

const READ_CHUNK: usize = 64 * 1024;
const RAW_FILE: &str = "raw";
const SEALED_FILE: &str = "sealed";

/// Upper bounds for each I/O-bound stage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperationTimeouts {
    pub produce: Duration,
    pub encrypt: Duration,
    pub store: Duration,
    pub apply: Duration,
    pub lock_wait: LockWait,
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        Self {
            produce: Duration::from_secs(60 * 60),
            encrypt: Duration::from_secs(10 * 60),
            store: Duration::from_secs(10 * 60),
            apply: Duration::from_secs(60 * 60),
            lock_wait: LockWait::Wait(Duration::from_secs(30)),
        }
    }
}

/// Run `fut`, failing with `Timeout` for `stage` after `limit`
pub(crate) async fn within<T, F>(stage: &str, limit: Duration, fut: F) -> BackupResult<T>
where
    F: Future<Output = BackupResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(stage = %stage, limit_secs = limit.as_secs_f64(), "stage timed out");
            Err(BackupError::timeout(stage, limit))
        }
    }
}

/// Per-call settings for creating artifacts
#[derive(Debug, Clone)]
pub struct BackupContext {
    pub source_revision: String,
    pub created_by: String,
    pub timeouts: OperationTimeouts,
}

impl BackupContext {
    pub fn new<R: Into<String>, C: Into<String>>(source_revision: R, created_by: C) -> Self {
        Self {
            source_revision: source_revision.into(),
            created_by: created_by.into(),
            timeouts: OperationTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: OperationTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    store: Arc<dyn ArtifactStore>,
    producers: HashMap<ArtifactType, Arc<dyn BackupProducer>>,
    targets: HashMap<ArtifactType, Arc<dyn RestoreTarget>>,
    encryption: Arc<dyn EncryptionProvider>,
    recipient_key: Option<RecipientKey>,
    locks: LockTable,
    timeouts: OperationTimeouts,
}

impl OrchestratorBuilder {
    /// Start a builder over `store`
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            producers: HashMap::new(),
            targets: HashMap::new(),
            encryption: Arc::new(AesGcmProvider),
            recipient_key: None,
            locks: LockTable::new(),
            timeouts: OperationTimeouts::default(),
        }
    }

    /// Register the producer for its artifact type, replacing any earlier one
    pub fn with_producer(mut self, producer: Arc<dyn BackupProducer>) -> Self {
        if producer.is_best_effort() && producer.artifact_type() != ArtifactType::Logs {
            warn!(
                artifact_type = %producer.artifact_type(),
                "best-effort is only honoured for logs producers"
            );
        }
        self.producers.insert(producer.artifact_type(), producer);
        self
    }

    /// Register the restore target for its artifact type
    pub fn with_target(mut self, target: Arc<dyn RestoreTarget>) -> Self {
        self.targets.insert(target.artifact_type(), target);
        self
    }

    pub fn with_recipient_key(mut self, key: RecipientKey) -> Self {
        self.recipient_key = Some(key);
        self
    }

    pub fn with_encryption_provider(mut self, provider: Arc<dyn EncryptionProvider>) -> Self {
        self.encryption = provider;
        self
    }

    /// Share a lock table with other orchestrators over the same store
    pub fn with_lock_table(mut self, locks: LockTable) -> Self {
        self.locks = locks;
        self
    }

    /// Timeouts used by operations that take no per-call context
    pub fn with_timeouts(mut self, timeouts: OperationTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn build(self) -> Orchestrator {
        let recorder = IntegrityRecorder::new(Arc::clone(&self.store));
        let recovery = RecoveryEngine::new(
            recorder.clone(),
            self.locks.clone(),
            Arc::clone(&self.encryption),
            self.recipient_key.clone(),
            self.targets,
        );
        let collector = RetentionCollector::new(Arc::clone(&self.store), self.locks.clone());

        Orchestrator {
            store: self.store,
            recorder,
            recovery,
            collector,
            producers: self.producers,
            encryption: self.encryption,
            recipient_key: self.recipient_key,
            locks: self.locks,
            timeouts: self.timeouts,
        }
    }
}

/// Root of the backup subsystem
pub struct Orchestrator {
    store: Arc<dyn ArtifactStore>,
    recorder: IntegrityRecorder,
    recovery: RecoveryEngine,
    collector: RetentionCollector,
    producers: HashMap<ArtifactType, Arc<dyn BackupProducer>>,
    encryption: Arc<dyn EncryptionProvider>,
    recipient_key: Option<RecipientKey>,
    locks: LockTable,
    timeouts: OperationTimeouts,
}

impl Orchestrator {
    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    /// Artifact types with a registered producer, in canonical order
    pub fn configured_types(&self) -> Vec<ArtifactType> {
        ArtifactType::ALL
            .into_iter()
            .filter(|t| self.producers.contains_key(t))
            .collect()
    }

    /// Create one artifact of `artifact_type`
    ///
    /// The policy must be supplied; there is no default retention window or
    /// size limit. On any failure nothing becomes visible in the store.
    pub async fn create_backup(
        &self,
        artifact_type: ArtifactType,
        policy: Option<&BackupPolicy>,
        ctx: &BackupContext,
    ) -> BackupResult<BackupArtifact> {
        let policy = policy.ok_or_else(|| {
            BackupError::policy(format!(
                "no backup policy supplied for {}; retention window and size limit are required",
                artifact_type
            ))
        })?;
        policy.validate()?;

        let encrypt = resolve_encryption(artifact_type, policy.encryption)?;
        let key = if encrypt {
            Some(
                self.recipient_key
                    .clone()
                    .ok_or_else(|| missing_key_error(artifact_type))?,
            )
        } else {
            None
        };

        let producer = self.producers.get(&artifact_type).cloned().ok_or_else(|| {
            BackupError::config(format!("no producer configured for {}", artifact_type))
        })?;

        let _type_lock = self
            .locks
            .acquire_type(artifact_type, ctx.timeouts.lock_wait)
            .await?;

        let created_at = Utc::now();
        let id = ArtifactId::generate(artifact_type, created_at);
        let _id_lock = self.locks.acquire_artifact(&id, LockWait::Reject).await?;

        let started = Instant::now();
        info!(
            artifact_id = %id,
            artifact_type = %artifact_type,
            encrypted = encrypt,
            max_bytes = policy.max_artifact_size,
            "backup started"
        );

        let scratch = ScratchDir::new("brk-backup-")?;
        let raw_path = scratch.join(RAW_FILE);
        let raw_len = within(
            "produce",
            ctx.timeouts.produce,
            spool_bounded(
                producer.as_ref(),
                artifact_type,
                policy.max_artifact_size,
                scratch.create(RAW_FILE)?,
            ),
        )
        .await?;

        let level = policy.compression_level;
        let provider = Arc::clone(&self.encryption);
        let sealed_path = scratch.join(SEALED_FILE);
        let (source, dest) = (raw_path.clone(), sealed_path.clone());
        let sealed_len = within("encrypt", ctx.timeouts.encrypt, async move {
            tokio::task::spawn_blocking(move || seal(&source, &dest, level, key, provider))
                .await
                .map_err(|e| BackupError::encryption(format!("encryption worker failed: {}", e)))?
        })
        .await?;
        // The raw spool is plaintext; drop it before the store stage
        let _ = tokio::fs::remove_file(&raw_path).await;

        let spec = FinalizeSpec {
            artifact_id: &id,
            artifact_type,
            source_revision: &ctx.source_revision,
            created_by: &ctx.created_by,
            encrypted: encrypt,
            compression_level: level,
            window: policy.window,
            created_at,
        };
        let mut sealed = tokio::fs::File::open(&sealed_path).await?;
        let (artifact, _) = self
            .recorder
            .finalize(&mut sealed, sealed_len, &spec, ctx.timeouts.store)
            .await?;

        info!(
            artifact_id = %id,
            raw_bytes = raw_len,
            stored_bytes = artifact.size_bytes,
            duration_ms = started.elapsed().as_millis() as u64,
            "backup finished"
        );
        Ok(artifact)
    }

    /// Back up every configured type concurrently
    ///
    /// Types without a policy in `policies` fail with `PolicyViolation`. A
    /// best-effort logs producer that cannot reach its source is reported as
    /// skipped rather than failed.
    pub async fn backup_all(
        &self,
        policies: &BTreeMap<ArtifactType, BackupPolicy>,
        ctx: &BackupContext,
    ) -> RunReport {
        let started = Instant::now();
        let run = |t: ArtifactType| self.run_one(t, policies.get(&t), ctx);

        let (database, application, secrets, logs) = tokio::join!(
            run(ArtifactType::Database),
            run(ArtifactType::ApplicationState),
            run(ArtifactType::Secrets),
            run(ArtifactType::Logs),
        );

        let report = RunReport {
            outcomes: [database, application, secrets, logs]
                .into_iter()
                .flatten()
                .collect(),
            duration: started.elapsed(),
        };
        info!(
            created = report.created().count(),
            skipped = report.skipped().count(),
            failed = report.failures().count(),
            "backup run finished"
        );
        report
    }

    async fn run_one(
        &self,
        artifact_type: ArtifactType,
        policy: Option<&BackupPolicy>,
        ctx: &BackupContext,
    ) -> Option<BackupOutcome> {
        let producer = self.producers.get(&artifact_type)?;
        let best_effort = artifact_type == ArtifactType::Logs && producer.is_best_effort();

        Some(match self.create_backup(artifact_type, policy, ctx).await {
            Ok(artifact) => BackupOutcome::Created(artifact),
            Err(error @ BackupError::SourceUnavailable { .. }) if best_effort => {
                warn!(artifact_type = %artifact_type, error = %error, "best-effort source skipped");
                BackupOutcome::Skipped {
                    artifact_type,
                    reason: error.to_string(),
                }
            }
            Err(error) => BackupOutcome::Failed {
                artifact_type,
                error,
            },
        })
    }

    /// Restore an artifact; requires a confirmation token bound to it
    pub async fn restore(
        &self,
        request: &RecoveryRequest,
        ctx: &RestoreContext,
    ) -> BackupResult<RestoreReport> {
        match &request.confirmation_token {
            Some(token) if token.is_bound_to(&request.artifact_ref) => {}
            Some(token) => {
                return Err(BackupError::ConfirmationRequired {
                    artifact_id: request.artifact_ref.clone(),
                    message: format!("token confirms {}, not this artifact", token.artifact_id()),
                })
            }
            None => {
                return Err(BackupError::ConfirmationRequired {
                    artifact_id: request.artifact_ref.clone(),
                    message: "no confirmation token supplied".to_string(),
                })
            }
        }
        self.recovery.restore(request, ctx).await
    }

    /// Re-verify a stored artifact's checksum
    pub async fn verify(&self, id: &ArtifactId) -> BackupResult<MetadataRecord> {
        let _lock = self
            .locks
            .acquire_artifact(id, self.timeouts.lock_wait)
            .await?;
        within("store", self.timeouts.store, self.recorder.verify_integrity(id)).await
    }

    /// Complete artifacts matching `filter`, newest first
    pub async fn list_backups(
        &self,
        filter: Option<&BackupFilter>,
    ) -> BackupResult<Vec<MetadataRecord>> {
        let mut records: Vec<MetadataRecord> = self
            .store
            .list_metadata()
            .await?
            .into_iter()
            .filter(|r| filter.map(|f| f.matches(r)).unwrap_or(true))
            .collect();
        records.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.backup_name.cmp(&a.backup_name))
        });
        Ok(records)
    }

    /// Delete one artifact on explicit operator request, returning bytes freed
    pub async fn delete_backup(&self, id: &ArtifactId) -> BackupResult<u64> {
        let _lock = self
            .locks
            .acquire_artifact(id, self.timeouts.lock_wait)
            .await?;

        let has_metadata = match self.store.read_metadata(id).await {
            Ok(record) => record.is_some(),
            // Unparseable metadata still occupies the id
            Err(StoreError::Deserialization(_)) => true,
            Err(e) => return Err(e.into()),
        };
        let present = has_metadata || self.store.open_blob(id).await?.is_some();
        if !present {
            return Err(BackupError::NotFound {
                artifact_id: id.clone(),
            });
        }

        let freed = self.store.delete(id.as_str()).await?;
        info!(artifact_id = %id, freed_bytes = freed, "artifact deleted by operator");
        Ok(freed)
    }

    /// Run a retention pass
    pub async fn cleanup(
        &self,
        now: DateTime<Utc>,
        options: &CollectOptions,
    ) -> BackupResult<CollectionReport> {
        self.collector.collect(now, options).await
    }

    /// Summarize recoverability per artifact type as of `now`
    pub async fn disaster_plan(&self, now: DateTime<Utc>) -> BackupResult<DisasterPlan> {
        let entries = self.store.entries().await?;
        let corrupted: Vec<String> = entries
            .iter()
            .filter(|e| matches!(e.state, EntryState::Corrupt { .. }))
            .map(|e| e.key.clone())
            .collect();

        let mut latest: BTreeMap<ArtifactType, MetadataRecord> = BTreeMap::new();
        for entry in entries {
            if let EntryState::Complete(record) = entry.state {
                let newer = latest
                    .get(&record.backup_type)
                    .map(|current| record.timestamp > current.timestamp)
                    .unwrap_or(true);
                if newer {
                    latest.insert(record.backup_type, record);
                }
            }
        }

        let mut plan_entries = Vec::new();
        for artifact_type in ArtifactType::ALL {
            let entry = match latest.remove(&artifact_type) {
                Some(record) => {
                    let status = match self.verify(&record.backup_name).await {
                        Ok(_) if record.is_expired(now) => PlanStatus::Expired,
                        Ok(_) => PlanStatus::Verified,
                        Err(e) => PlanStatus::Failed(e.to_string()),
                    };
                    PlanEntry::for_record(artifact_type, record, status, now)
                }
                None => PlanEntry::missing(artifact_type),
            };
            plan_entries.push(entry);
        }

        Ok(DisasterPlan::new(
            now,
            plan_entries,
            corrupted,
            self.recipient_key.is_some(),
        ))
    }
}

/// Spool a producer's stream into `file` without exceeding `limit` bytes
///
/// Returns the number of raw bytes written.
async fn spool_bounded(
    producer: &dyn BackupProducer,
    artifact_type: ArtifactType,
    limit: u64,
    file: std::fs::File,
) -> BackupResult<u64> {
    let mut stream = producer
        .produce()
        .await
        .map_err(|e| e.into_backup_error(artifact_type))?;

    let mut file = tokio::fs::File::from_std(file);
    let mut observed: u64 = 0;
    let mut chunk = Zeroizing::new(vec![0u8; READ_CHUNK]);
    loop {
        let n = stream
            .reader()
            .read(&mut chunk[..])
            .await
            .map_err(|e| ProducerError::Io(e).into_backup_error(artifact_type))?;
        if n == 0 {
            break;
        }

        observed += n as u64;
        if observed > limit {
            // Dropping the stream abandons the source; the spool goes with the scratch dir
            drop(stream);
            warn!(
                artifact_type = %artifact_type,
                limit,
                observed,
                "size limit exceeded, backup aborted"
            );
            return Err(BackupError::SizeExceeded {
                artifact_type,
                limit,
                observed,
            });
        }
        file.write_all(&chunk[..n]).await?;
    }
    file.flush().await?;

    stream
        .finish()
        .await
        .map_err(|e| e.into_backup_error(artifact_type))?;
    Ok(observed)
}

/// Compress then optionally encrypt `raw` into a new file at `sealed`
///
/// Returns the sealed size. The output only reaches the store on full success.
fn seal(
    raw: &Path,
    sealed: &Path,
    level: u32,
    key: Option<RecipientKey>,
    provider: Arc<dyn EncryptionProvider>,
) -> BackupResult<u64> {
    let mut source = Compressor::new(BufReader::new(std::fs::File::open(raw)?), level);
    let mut sink = BufWriter::new(create_private(sealed)?);
    let written = match key {
        Some(key) => provider.encrypt(&mut source, &mut sink, &key)?,
        None => io::copy(&mut source, &mut sink)?,
    };
    sink.flush()?;
    sink.into_inner()
        .map_err(|e| BackupError::Io(e.into_error()))?
        .sync_all()?;
    Ok(written)
}
