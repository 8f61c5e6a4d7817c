//! End-to-end behaviour of the orchestrator against in-memory and failing stores

use async_trait::async_trait;
use brk::backup::{
    sha256_hex, ArtifactId, ArtifactStore, ArtifactType, BackupContext, BackupError,
    BackupOutcome, BackupPolicy, BackupProducer, BlobReader, CollectOptions, ConfirmationToken,
    EncryptionMode, FileProducer, FileTarget, ForceCleanup, LockWait, MemoryArtifactStore,
    MetadataRecord, OperationTimeouts, Orchestrator, OrchestratorBuilder, PlanStatus,
    ProducerError, RecipientKey, RecoveryRequest, RestoreContext, SourceStream, StoreError,
    StoreResult, StoredEntry, TargetDescriptor,
};
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncWriteExt};

const MB: u64 = 1024 * 1024;

struct BytesProducer {
    artifact_type: ArtifactType,
    data: Vec<u8>,
}

#[async_trait]
impl BackupProducer for BytesProducer {
    fn artifact_type(&self) -> ArtifactType {
        self.artifact_type
    }

    async fn produce(&self) -> Result<SourceStream, ProducerError> {
        Ok(SourceStream::new(std::io::Cursor::new(self.data.clone())))
    }
}

fn producer(artifact_type: ArtifactType, data: &[u8]) -> Arc<BytesProducer> {
    Arc::new(BytesProducer {
        artifact_type,
        data: data.to_vec(),
    })
}

/// Producer whose stream never ends while the writer half is held
struct StalledProducer {
    writer: Mutex<Option<tokio::io::DuplexStream>>,
}

impl StalledProducer {
    fn new() -> Self {
        Self {
            writer: Mutex::new(None),
        }
    }

    /// Write `data` and close the stream
    async fn release(&self, data: &[u8]) {
        let writer = self.writer.lock().unwrap().take();
        let mut writer = writer.expect("stream was never opened");
        writer.write_all(data).await.unwrap();
    }
}

#[async_trait]
impl BackupProducer for StalledProducer {
    fn artifact_type(&self) -> ArtifactType {
        ArtifactType::Database
    }

    async fn produce(&self) -> Result<SourceStream, ProducerError> {
        let (writer, reader) = tokio::io::duplex(64);
        *self.writer.lock().unwrap() = Some(writer);
        Ok(SourceStream::new(reader))
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Fault {
    FailMetadata,
    ShortBlobWrite,
    StallMetadata,
    UnreadableMetadata,
}

/// Store that delegates to memory but injects a single kind of fault
struct FaultyStore {
    inner: MemoryArtifactStore,
    fault: Fault,
    blobs_staged: AtomicUsize,
}

impl FaultyStore {
    fn new(fault: Fault) -> Self {
        Self {
            inner: MemoryArtifactStore::new(),
            fault,
            blobs_staged: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ArtifactStore for FaultyStore {
    fn backend_type(&self) -> &'static str {
        "faulty"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn stage_blob(
        &self,
        id: &ArtifactId,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StoreResult<u64> {
        let written = self.inner.stage_blob(id, source).await?;
        self.blobs_staged.fetch_add(1, Ordering::SeqCst);
        match self.fault {
            Fault::ShortBlobWrite => Ok(written.saturating_sub(1)),
            _ => Ok(written),
        }
    }

    async fn stage_metadata(&self, id: &ArtifactId, record: &MetadataRecord) -> StoreResult<()> {
        match self.fault {
            Fault::FailMetadata => Err(StoreError::Backend("process killed".to_string())),
            Fault::StallMetadata => std::future::pending().await,
            _ => self.inner.stage_metadata(id, record).await,
        }
    }

    async fn commit(&self, id: &ArtifactId) -> StoreResult<()> {
        self.inner.commit(id).await
    }

    fn discard_staged(&self, key: &str) {
        self.inner.discard_staged(key)
    }

    async fn open_blob(&self, id: &ArtifactId) -> StoreResult<Option<BlobReader>> {
        self.inner.open_blob(id).await
    }

    async fn read_metadata(&self, id: &ArtifactId) -> StoreResult<Option<MetadataRecord>> {
        if self.fault == Fault::UnreadableMetadata {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "metadata.json: permission denied",
            )));
        }
        self.inner.read_metadata(id).await
    }

    async fn delete(&self, key: &str) -> StoreResult<u64> {
        self.inner.delete(key).await
    }

    async fn entries(&self) -> StoreResult<Vec<StoredEntry>> {
        self.inner.entries().await
    }

    async fn staged(&self) -> StoreResult<Vec<String>> {
        self.inner.staged().await
    }
}

struct Harness {
    orchestrator: Orchestrator,
    store: Arc<MemoryArtifactStore>,
    restore_dir: TempDir,
}

fn harness(producers: Vec<Arc<dyn BackupProducer>>) -> Harness {
    let store = Arc::new(MemoryArtifactStore::new());
    let restore_dir = tempfile::tempdir().unwrap();
    let mut builder = OrchestratorBuilder::new(store.clone())
        .with_recipient_key(RecipientKey::generate());
    for producer in producers {
        builder = builder.with_producer(producer);
    }
    for artifact_type in ArtifactType::ALL {
        builder = builder
            .with_target(Arc::new(FileTarget::new(artifact_type).with_base_dir(restore_dir.path())));
    }
    Harness {
        orchestrator: builder.build(),
        store,
        restore_dir,
    }
}

fn week(max: u64) -> BackupPolicy {
    BackupPolicy::new(ChronoDuration::days(7), max)
}

fn ctx() -> BackupContext {
    BackupContext::new("a1b2c3d", "ops@db-01")
}

fn confirmed(id: &ArtifactId, target: &str) -> RecoveryRequest {
    RecoveryRequest::new(id.clone(), TargetDescriptor::new(target))
        .with_confirmation(ConfirmationToken::for_artifact(id))
}

#[tokio::test]
async fn test_backup_verify_restore_round_trip() {
    let dump = b"CREATE TABLE users (id int);\nINSERT INTO users VALUES (1);\n".repeat(100);
    let h = harness(vec![producer(ArtifactType::Database, &dump)]);

    let policy = week(MB).with_compression_level(6);
    let artifact = h
        .orchestrator
        .create_backup(ArtifactType::Database, Some(&policy), &ctx())
        .await
        .unwrap();
    assert!(artifact.encrypted);
    assert_eq!(artifact.source_revision, "a1b2c3d");
    assert_eq!(
        artifact.retention_deadline - artifact.created_at,
        ChronoDuration::days(7)
    );

    let record = h.orchestrator.verify(&artifact.id).await.unwrap();
    assert_eq!(record.created_by, "ops@db-01");
    assert_eq!(record.size_bytes, artifact.size_bytes);

    let report = h
        .orchestrator
        .restore(&confirmed(&artifact.id, "restored.sql"), &RestoreContext::default())
        .await
        .unwrap();
    assert!(report.verified);
    assert!(report.decrypted);
    assert_eq!(report.bytes_restored, dump.len() as u64);

    let restored = std::fs::read(h.restore_dir.path().join("restored.sql")).unwrap();
    assert_eq!(restored, dump);
}

#[tokio::test]
async fn test_multi_chunk_payload_round_trip() {
    let payload: Vec<u8> = (0..(3 * 64 * 1024 + 4321)).map(|i| (i * 31 % 256) as u8).collect();
    let h = harness(vec![producer(ArtifactType::ApplicationState, &payload)]);

    for level in [0, 6] {
        let policy = week(MB).with_compression_level(level);
        let artifact = h
            .orchestrator
            .create_backup(ArtifactType::ApplicationState, Some(&policy), &ctx())
            .await
            .unwrap();
        h.orchestrator.verify(&artifact.id).await.unwrap();

        let name = format!("state-{}.bin", level);
        let report = h
            .orchestrator
            .restore(&confirmed(&artifact.id, &name), &RestoreContext::default())
            .await
            .unwrap();
        assert_eq!(report.bytes_restored, payload.len() as u64);
        assert_eq!(std::fs::read(h.restore_dir.path().join(&name)).unwrap(), payload);
    }
}

#[tokio::test]
async fn test_oversized_retention_window_is_rejected() {
    let h = harness(vec![producer(ArtifactType::Logs, b"GET /health 200")]);
    let policy = BackupPolicy::new(ChronoDuration::days(100_000_000), MB)
        .with_encryption(EncryptionMode::Disabled);

    let err = h
        .orchestrator
        .create_backup(ArtifactType::Logs, Some(&policy), &ctx())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "PolicyViolation");
    assert!(h.store.entries().await.unwrap().is_empty());
    assert!(h.store.staged().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_secrets_are_always_encrypted() {
    let h = harness(vec![producer(ArtifactType::Secrets, b"API_TOKEN=hunter2")]);

    let policy = week(MB).with_encryption(EncryptionMode::Disabled);
    let artifact = h
        .orchestrator
        .create_backup(ArtifactType::Secrets, Some(&policy), &ctx())
        .await
        .unwrap();
    assert!(artifact.encrypted);
    let blob = h.store.read_blob(&artifact.id).await.unwrap().unwrap();
    assert!(!blob.windows(7).any(|w| w == b"hunter2"));

    let forced = week(MB).with_encryption(EncryptionMode::ForceDisabled);
    let err = h
        .orchestrator
        .create_backup(ArtifactType::Secrets, Some(&forced), &ctx())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "PolicyViolation");
    assert_eq!(h.orchestrator.list_backups(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_secrets_without_key_store_nothing() {
    let store = Arc::new(MemoryArtifactStore::new());
    let orchestrator = OrchestratorBuilder::new(store.clone())
        .with_producer(producer(ArtifactType::Secrets, b"API_TOKEN=hunter2"))
        .build();

    let err = orchestrator
        .create_backup(ArtifactType::Secrets, Some(&week(MB)), &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::Encryption { .. }));
    assert!(err.to_string().contains("no recipient key"));
    assert!(store.entries().await.unwrap().is_empty());
    assert!(store.staged().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_size_limit_scenarios() {
    // 500 KiB under a 1 MiB limit succeeds
    let h = harness(vec![producer(ArtifactType::Database, &vec![7u8; 500 * 1024])]);
    let artifact = h
        .orchestrator
        .create_backup(ArtifactType::Database, Some(&week(MB)), &ctx())
        .await
        .unwrap();
    assert!(h.orchestrator.verify(&artifact.id).await.is_ok());

    // 11 KiB against a 10 KiB limit fails with nothing visible
    let h = harness(vec![producer(ArtifactType::Database, &vec![7u8; 11 * 1024])]);
    let err = h
        .orchestrator
        .create_backup(ArtifactType::Database, Some(&week(10 * 1024)), &ctx())
        .await
        .unwrap_err();
    match err {
        BackupError::SizeExceeded {
            artifact_type,
            limit,
            observed,
        } => {
            assert_eq!(artifact_type, ArtifactType::Database);
            assert_eq!(limit, 10 * 1024);
            assert!(observed > limit);
        }
        other => panic!("expected SizeExceeded, got {:?}", other),
    }
    assert!(h.orchestrator.list_backups(None).await.unwrap().is_empty());
    assert!(h.store.staged().await.unwrap().is_empty());
}

fn aged_record(id: &str, age_days: i64, window_days: i64, blob: &[u8]) -> MetadataRecord {
    let timestamp = Utc::now() - ChronoDuration::days(age_days);
    MetadataRecord {
        backup_name: ArtifactId::parse(id).unwrap(),
        backup_type: ArtifactType::Database,
        timestamp,
        size_bytes: blob.len() as u64,
        checksum_sha256: sha256_hex(blob),
        encrypted: false,
        retention_until: timestamp + ChronoDuration::days(window_days),
        created_by: "ops".to_string(),
        source_revision: "r1".to_string(),
        compression_level: 0,
    }
}

fn insert(store: &MemoryArtifactStore, record: &MetadataRecord, blob: &[u8]) {
    store.insert_raw(
        record.backup_name.as_str(),
        Some(blob.to_vec()),
        Some(serde_json::to_vec(record).unwrap()),
    );
}

#[tokio::test]
async fn test_retention_deletes_only_expired() {
    let h = harness(vec![]);
    let old = aged_record("database_old", 10, 7, b"old dump");
    let recent = aged_record("database_recent", 5, 7, b"recent dump");
    insert(&h.store, &old, b"old dump");
    insert(&h.store, &recent, b"recent dump");

    let report = h
        .orchestrator
        .cleanup(Utc::now(), &CollectOptions::default())
        .await
        .unwrap();
    assert_eq!(report.deleted, vec![old.backup_name.clone()]);
    assert_eq!(report.retained, 1);
    assert_eq!(report.freed_bytes, 8 + serde_json::to_vec(&old).unwrap().len() as u64);

    let remaining = h.orchestrator.list_backups(None).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].backup_name, recent.backup_name);

    // Idempotent
    let again = h
        .orchestrator
        .cleanup(Utc::now(), &CollectOptions::default())
        .await
        .unwrap();
    assert!(again.deleted.is_empty());
}

#[tokio::test]
async fn test_cleanup_skips_artifact_in_use() {
    let h = harness(vec![]);
    let old = aged_record("database_in_use", 30, 7, b"dump");
    insert(&h.store, &old, b"dump");

    let lock = h
        .orchestrator
        .locks()
        .try_acquire_artifact(&old.backup_name)
        .unwrap();
    let options = CollectOptions {
        force: Some(ForceCleanup::acknowledge("disk full, incident 42").unwrap()),
        dry_run: false,
    };
    let report = h.orchestrator.cleanup(Utc::now(), &options).await.unwrap();
    assert!(report.deleted.is_empty());
    assert_eq!(report.skipped_locked, vec![old.backup_name.clone()]);

    drop(lock);
    let report = h.orchestrator.cleanup(Utc::now(), &options).await.unwrap();
    assert_eq!(report.deleted, vec![old.backup_name]);
}

#[tokio::test]
async fn test_forced_cleanup_deletes_unexpired_and_dry_run_keeps_them() {
    let h = harness(vec![]);
    let fresh = aged_record("database_fresh", 1, 30, b"dump");
    insert(&h.store, &fresh, b"dump");

    let options = CollectOptions {
        force: Some(ForceCleanup::acknowledge("rotating compromised key").unwrap()),
        dry_run: true,
    };
    let report = h.orchestrator.cleanup(Utc::now(), &options).await.unwrap();
    assert_eq!(report.deleted, vec![fresh.backup_name.clone()]);
    assert_eq!(h.orchestrator.list_backups(None).await.unwrap().len(), 1);

    let options = CollectOptions {
        dry_run: false,
        ..options
    };
    h.orchestrator.cleanup(Utc::now(), &options).await.unwrap();
    assert!(h.orchestrator.list_backups(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_corruption_is_reported_not_deleted() {
    let h = harness(vec![]);
    let record = aged_record("database_broken", 30, 7, b"dump");
    insert(&h.store, &record, b"dump");
    assert!(h.store.remove_blob("database_broken"));

    let report = h
        .orchestrator
        .cleanup(Utc::now(), &CollectOptions::default())
        .await
        .unwrap();
    assert!(report.has_corruption());
    assert!(report.corrupted.contains_key("database_broken"));
    assert!(report.deleted.is_empty());

    let err = h.orchestrator.verify(&record.backup_name).await.unwrap_err();
    assert!(err.is_integrity_failure());
}

#[tokio::test]
async fn test_tampered_artifact_is_never_restored() {
    let h = harness(vec![producer(ArtifactType::ApplicationState, b"{\"feature\":true}")]);
    let artifact = h
        .orchestrator
        .create_backup(ArtifactType::ApplicationState, Some(&week(MB)), &ctx())
        .await
        .unwrap();

    let mut blob = h.store.read_blob(&artifact.id).await.unwrap().unwrap();
    blob[0] ^= 0xff;
    assert!(h.store.replace_blob(artifact.id.as_str(), blob));

    let err = h
        .orchestrator
        .restore(&confirmed(&artifact.id, "state.json"), &RestoreContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::Integrity { .. }));
    assert!(!h.restore_dir.path().join("state.json").exists());
}

#[tokio::test]
async fn test_restore_requires_matching_confirmation() {
    let h = harness(vec![producer(ArtifactType::Database, b"dump")]);
    let artifact = h
        .orchestrator
        .create_backup(ArtifactType::Database, Some(&week(MB)), &ctx())
        .await
        .unwrap();

    let unconfirmed = RecoveryRequest::new(artifact.id.clone(), TargetDescriptor::new("db.sql"));
    let err = h
        .orchestrator
        .restore(&unconfirmed, &RestoreContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::ConfirmationRequired { .. }));

    let other = ArtifactId::parse("database_20200101_000000_00000000").unwrap();
    let wrong = unconfirmed
        .clone()
        .with_confirmation(ConfirmationToken::for_artifact(&other));
    let err = h
        .orchestrator
        .restore(&wrong, &RestoreContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::ConfirmationRequired { .. }));
    assert!(!h.restore_dir.path().join("db.sql").exists());
}

#[tokio::test]
async fn test_crash_between_blob_and_metadata_leaves_nothing() {
    let store = Arc::new(FaultyStore::new(Fault::FailMetadata));
    let orchestrator = OrchestratorBuilder::new(store.clone())
        .with_producer(producer(ArtifactType::Logs, b"GET /health 200"))
        .build();

    let policy = week(MB).with_encryption(EncryptionMode::Disabled);
    let err = orchestrator
        .create_backup(ArtifactType::Logs, Some(&policy), &ctx())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "StorageError");
    assert!(orchestrator.list_backups(None).await.unwrap().is_empty());
    assert!(store.entries().await.unwrap().is_empty());
    assert!(store.staged().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_partial_write_is_detected() {
    let store = Arc::new(FaultyStore::new(Fault::ShortBlobWrite));
    let orchestrator = OrchestratorBuilder::new(store.clone())
        .with_producer(producer(ArtifactType::Logs, b"GET /health 200"))
        .build();

    let policy = week(MB).with_encryption(EncryptionMode::Disabled);
    let err = orchestrator
        .create_backup(ArtifactType::Logs, Some(&policy), &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::Recorder { .. }));
    assert!(err.to_string().contains("partial write"));
    assert!(store.entries().await.unwrap().is_empty());
    assert!(store.staged().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_backup_leaves_staging_empty() {
    let store = Arc::new(FaultyStore::new(Fault::StallMetadata));
    let orchestrator = OrchestratorBuilder::new(store.clone())
        .with_producer(producer(ArtifactType::Logs, b"GET /health 200"))
        .build();

    let policy = week(MB).with_encryption(EncryptionMode::Disabled);
    let op_ctx = ctx();
    let backup = orchestrator.create_backup(ArtifactType::Logs, Some(&policy), &op_ctx);
    let outcome = tokio::time::timeout(Duration::from_secs(60), backup).await;
    assert!(outcome.is_err());

    assert_eq!(store.blobs_staged.load(Ordering::SeqCst), 1);
    assert!(store.staged().await.unwrap().is_empty());
    assert!(store.entries().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_backups_of_one_type_are_rejected() {
    let stalled = Arc::new(StalledProducer::new());
    let h = harness(vec![stalled.clone()]);
    let reject = ctx().with_timeouts(OperationTimeouts {
        lock_wait: LockWait::Reject,
        ..OperationTimeouts::default()
    });
    let policy = week(MB);

    let first = h
        .orchestrator
        .create_backup(ArtifactType::Database, Some(&policy), &reject);
    tokio::pin!(first);
    tokio::select! {
        result = &mut first => panic!("stalled backup finished early: {:?}", result),
        _ = tokio::time::sleep(Duration::from_millis(50)) => {}
    }

    let err = h
        .orchestrator
        .create_backup(ArtifactType::Database, Some(&policy), &reject)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "LockContention");

    stalled.release(b"dump").await;
    let artifact = first.await.unwrap();
    assert_eq!(
        h.orchestrator.list_backups(None).await.unwrap()[0].backup_name,
        artifact.id
    );
}

#[tokio::test]
async fn test_delete_propagates_metadata_read_errors() {
    let store = Arc::new(FaultyStore::new(Fault::UnreadableMetadata));
    let record = aged_record("database_locked_down", 1, 7, b"dump");
    insert(&store.inner, &record, b"dump");
    let orchestrator = OrchestratorBuilder::new(store.clone()).build();

    let err = orchestrator
        .delete_backup(&record.backup_name)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "StorageError");
    assert_eq!(store.entries().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_best_effort_logs_are_skipped() {
    let missing = tempfile::tempdir().unwrap().path().join("app.log");
    let h = harness(vec![
        producer(ArtifactType::Database, b"dump"),
        Arc::new(FileProducer::new(ArtifactType::Logs, &missing).with_best_effort(true)),
    ]);

    let mut policies = BTreeMap::new();
    policies.insert(ArtifactType::Database, week(MB));
    policies.insert(ArtifactType::Logs, week(MB));

    let report = h.orchestrator.backup_all(&policies, &ctx()).await;
    assert!(report.is_success());
    assert_eq!(report.created().count(), 1);
    let skipped: Vec<_> = report.skipped().collect();
    assert_eq!(skipped.len(), 1);
    assert_eq!(*skipped[0].0, ArtifactType::Logs);
}

#[tokio::test]
async fn test_required_source_failure_fails_the_run() {
    let missing = tempfile::tempdir().unwrap().path().join("state.json");
    let h = harness(vec![
        producer(ArtifactType::Database, b"dump"),
        Arc::new(FileProducer::new(ArtifactType::ApplicationState, &missing)),
    ]);

    let mut policies = BTreeMap::new();
    policies.insert(ArtifactType::Database, week(MB));
    policies.insert(ArtifactType::ApplicationState, week(MB));

    let report = h.orchestrator.backup_all(&policies, &ctx()).await;
    assert!(!report.is_success());
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].1.kind(), "SourceUnavailable");
    assert!(report
        .outcomes
        .iter()
        .any(|o| matches!(o, BackupOutcome::Created(a) if a.artifact_type == ArtifactType::Database)));
}

#[tokio::test(start_paused = true)]
async fn test_stalled_producer_times_out() {
    let h = harness(vec![Arc::new(StalledProducer::new())]);
    let timeouts = OperationTimeouts {
        produce: Duration::from_secs(5),
        ..OperationTimeouts::default()
    };

    let err = h
        .orchestrator
        .create_backup(
            ArtifactType::Database,
            Some(&week(MB)),
            &ctx().with_timeouts(timeouts),
        )
        .await
        .unwrap_err();
    match err {
        BackupError::Timeout { stage, elapsed } => {
            assert_eq!(stage, "produce");
            assert_eq!(elapsed, Duration::from_secs(5));
        }
        other => panic!("expected Timeout, got {:?}", other),
    }
    assert!(h.orchestrator.list_backups(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_and_disaster_plan() {
    let h = harness(vec![
        producer(ArtifactType::Database, b"dump"),
        producer(ArtifactType::Secrets, b"TOKEN=1"),
    ]);
    let db = h
        .orchestrator
        .create_backup(ArtifactType::Database, Some(&week(MB)), &ctx())
        .await
        .unwrap();
    h.orchestrator
        .create_backup(ArtifactType::Secrets, Some(&week(MB)), &ctx())
        .await
        .unwrap();

    let plan = h.orchestrator.disaster_plan(Utc::now()).await.unwrap();
    let status = |t: ArtifactType| {
        plan.entries
            .iter()
            .find(|e| e.artifact_type == t)
            .map(|e| e.status.clone())
    };
    assert_eq!(status(ArtifactType::Database), Some(PlanStatus::Verified));
    assert_eq!(status(ArtifactType::Logs), Some(PlanStatus::Missing));
    assert!(plan.steps[0].starts_with("Restore secrets"));

    assert!(h.orchestrator.delete_backup(&db.id).await.unwrap() > 0);
    let err = h.orchestrator.delete_backup(&db.id).await.unwrap_err();
    assert!(matches!(err, BackupError::NotFound { .. }));
}
