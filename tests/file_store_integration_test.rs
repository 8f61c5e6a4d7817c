//! Orchestrator over the file system store: on-disk layout, tamper detection
//! and recovery from interrupted writes

use async_trait::async_trait;
use brk::backup::{
    ArtifactStore, ArtifactType, BackupContext, BackupPolicy, BackupProducer, CollectOptions,
    ConfirmationToken, FileArtifactStore, FileTarget, OrchestratorBuilder, ProducerError,
    RecipientKey, RecoveryRequest, RestoreContext, SourceStream, TargetDescriptor,
};
use chrono::Utc;
use std::fs;
use std::sync::Arc;

struct BytesProducer(ArtifactType, Vec<u8>);

#[async_trait]
impl BackupProducer for BytesProducer {
    fn artifact_type(&self) -> ArtifactType {
        self.0
    }

    async fn produce(&self) -> Result<SourceStream, ProducerError> {
        Ok(SourceStream::new(std::io::Cursor::new(self.1.clone())))
    }
}

fn policy() -> BackupPolicy {
    BackupPolicy::new(chrono::Duration::days(7), 1024 * 1024)
}

#[tokio::test]
async fn test_committed_layout_and_metadata_fields() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(FileArtifactStore::new(root.path()).unwrap());
    let orchestrator = OrchestratorBuilder::new(store.clone())
        .with_producer(Arc::new(BytesProducer(
            ArtifactType::Secrets,
            b"DB_PASSWORD=s3cret".to_vec(),
        )))
        .with_recipient_key(RecipientKey::generate())
        .build();

    let artifact = orchestrator
        .create_backup(
            ArtifactType::Secrets,
            Some(&policy()),
            &BackupContext::new("v1.4.2", "ops@vault"),
        )
        .await
        .unwrap();

    let dir = store.artifact_dir(artifact.id.as_str()).unwrap();
    let blob = fs::read(dir.join("blob.bin")).unwrap();
    assert_eq!(blob.len() as u64, artifact.size_bytes);
    assert!(!blob.windows(6).any(|w| w == b"s3cret"));

    let metadata: serde_json::Value =
        serde_json::from_slice(&fs::read(dir.join("metadata.json")).unwrap()).unwrap();
    for field in [
        "backup_name",
        "backup_type",
        "timestamp",
        "size_bytes",
        "checksum_sha256",
        "encrypted",
        "retention_until",
        "created_by",
        "source_revision",
    ] {
        assert!(metadata.get(field).is_some(), "missing {}", field);
    }
    assert_eq!(metadata["backup_type"], "secrets");
    assert_eq!(metadata["encrypted"], true);
    assert_eq!(metadata["created_by"], "ops@vault");

    assert!(fs::read_dir(root.path().join("staging"))
        .unwrap()
        .next()
        .is_none());
}

#[tokio::test]
async fn test_tampered_file_fails_verification_and_restore() {
    let root = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let store = Arc::new(FileArtifactStore::new(root.path()).unwrap());
    let orchestrator = OrchestratorBuilder::new(store.clone())
        .with_producer(Arc::new(BytesProducer(
            ArtifactType::ApplicationState,
            b"{\"tenants\":3}".to_vec(),
        )))
        .with_target(Arc::new(
            FileTarget::new(ArtifactType::ApplicationState).with_base_dir(out.path()),
        ))
        .with_recipient_key(RecipientKey::generate())
        .build();

    let artifact = orchestrator
        .create_backup(
            ArtifactType::ApplicationState,
            Some(&policy()),
            &BackupContext::new("r", "c"),
        )
        .await
        .unwrap();

    let blob_path = store
        .artifact_dir(artifact.id.as_str())
        .unwrap()
        .join("blob.bin");
    let mut blob = fs::read(&blob_path).unwrap();
    let last = blob.len() - 1;
    blob[last] ^= 0x01;
    fs::write(&blob_path, blob).unwrap();

    let err = orchestrator.verify(&artifact.id).await.unwrap_err();
    assert_eq!(err.kind(), "IntegrityError");

    let request = RecoveryRequest::new(artifact.id.clone(), TargetDescriptor::new("state.json"))
        .with_confirmation(ConfirmationToken::for_artifact(&artifact.id));
    let err = orchestrator
        .restore(&request, &RestoreContext::default())
        .await
        .unwrap_err();
    assert!(err.is_integrity_failure());
    assert!(!out.path().join("state.json").exists());
}

#[tokio::test]
async fn test_interrupted_writes_are_collected() {
    let root = tempfile::tempdir().unwrap();

    // A process died after staging its blob, and another after committing
    // only a blob.
    let staged = root.path().join("staging/database_20240101_000000_deadbeef");
    fs::create_dir_all(&staged).unwrap();
    fs::write(staged.join("blob.bin"), b"partial").unwrap();
    let orphan = root.path().join("artifacts/logs_20240101_000000_cafebabe");
    fs::create_dir_all(&orphan).unwrap();
    fs::write(orphan.join("blob.bin"), b"orphan").unwrap();

    let store = Arc::new(FileArtifactStore::new(root.path()).unwrap());
    let orchestrator = OrchestratorBuilder::new(store.clone()).build();
    assert!(orchestrator.list_backups(None).await.unwrap().is_empty());

    let report = orchestrator
        .cleanup(Utc::now(), &CollectOptions::default())
        .await
        .unwrap();
    assert!(report
        .orphans_removed
        .contains(&"staging/database_20240101_000000_deadbeef".to_string()));
    assert!(report
        .orphans_removed
        .contains(&"logs_20240101_000000_cafebabe".to_string()));
    assert!(!staged.exists());
    assert!(!orphan.exists());
    assert!(store.staged().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reopening_store_finishes_interrupted_deletes() {
    let root = tempfile::tempdir().unwrap();
    FileArtifactStore::new(root.path()).unwrap();
    let leftover = root.path().join("trash/database_x.0000");
    fs::create_dir_all(&leftover).unwrap();
    fs::write(leftover.join("blob.bin"), b"old").unwrap();

    FileArtifactStore::new(root.path()).unwrap();
    assert!(!leftover.exists());
}
