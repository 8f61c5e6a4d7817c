//! In-process locking for artifact types and artifact ids
//!
//! Two independent lock families:
//! - one lock per [`ArtifactType`], held for the whole of a create operation
//! - a set of locked [`ArtifactId`]s, held by verify, restore and delete so the
//!   retention collector never removes an artifact that is in use

use super::errors::{BackupError, BackupResult};
use super::models::{ArtifactId, ArtifactType};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

const ID_LOCK_POLL: Duration = Duration::from_millis(25);

/// Behaviour when a lock is already held
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockWait {
    /// Fail immediately with `LockContention`
    Reject,
    /// Wait up to the given duration, then fail with `LockContention`
    Wait(Duration),
}

/// Held per-type lock
pub struct TypeLock {
    artifact_type: ArtifactType,
    _guard: OwnedMutexGuard<()>,
}

impl TypeLock {
    /// The locked type
    pub fn artifact_type(&self) -> ArtifactType {
        self.artifact_type
    }
}

/// Held per-id lock; released on drop
pub struct ArtifactLock {
    id: ArtifactId,
    held: Arc<Mutex<HashSet<ArtifactId>>>,
}

impl ArtifactLock {
    /// The locked artifact id
    pub fn id(&self) -> &ArtifactId {
        &self.id
    }
}

impl Drop for ArtifactLock {
    fn drop(&mut self) {
        lock_set(&self.held).remove(&self.id);
    }
}

fn lock_set(set: &Mutex<HashSet<ArtifactId>>) -> MutexGuard<'_, HashSet<ArtifactId>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared lock table; clones refer to the same locks
#[derive(Clone)]
pub struct LockTable {
    type_locks: Arc<HashMap<ArtifactType, Arc<tokio::sync::Mutex<()>>>>,
    id_locks: Arc<Mutex<HashSet<ArtifactId>>>,
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LockTable {
    /// Create a lock table with one lock per artifact type
    pub fn new() -> Self {
        let type_locks = ArtifactType::ALL
            .iter()
            .map(|t| (*t, Arc::new(tokio::sync::Mutex::new(()))))
            .collect();
        Self {
            type_locks: Arc::new(type_locks),
            id_locks: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Acquire the lock for an artifact type
    pub async fn acquire_type(
        &self,
        artifact_type: ArtifactType,
        wait: LockWait,
    ) -> BackupResult<TypeLock> {
        let mutex = self
            .type_locks
            .get(&artifact_type)
            .cloned()
            .ok_or_else(|| BackupError::contention(format!("no lock for {}", artifact_type)))?;

        let guard = match wait {
            LockWait::Reject => mutex.try_lock_owned().map_err(|_| {
                BackupError::contention(format!(
                    "a {} backup is already in progress",
                    artifact_type
                ))
            })?,
            LockWait::Wait(limit) => tokio::time::timeout(limit, mutex.lock_owned())
                .await
                .map_err(|_| {
                    BackupError::contention(format!(
                        "waited {:?} for the {} backup lock",
                        limit, artifact_type
                    ))
                })?,
        };

        debug!(artifact_type = %artifact_type, "type lock acquired");
        Ok(TypeLock {
            artifact_type,
            _guard: guard,
        })
    }

    /// Try to lock an artifact id without waiting
    pub fn try_acquire_artifact(&self, id: &ArtifactId) -> Option<ArtifactLock> {
        let mut held = lock_set(&self.id_locks);
        if !held.insert(id.clone()) {
            return None;
        }
        Some(ArtifactLock {
            id: id.clone(),
            held: Arc::clone(&self.id_locks),
        })
    }

    /// Lock an artifact id, waiting according to `wait`
    pub async fn acquire_artifact(
        &self,
        id: &ArtifactId,
        wait: LockWait,
    ) -> BackupResult<ArtifactLock> {
        if let Some(lock) = self.try_acquire_artifact(id) {
            return Ok(lock);
        }

        let limit = match wait {
            LockWait::Reject => {
                return Err(BackupError::contention(format!(
                    "artifact {} is in use",
                    id
                )))
            }
            LockWait::Wait(limit) => limit,
        };

        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(ID_LOCK_POLL).await;
            if let Some(lock) = self.try_acquire_artifact(id) {
                return Ok(lock);
            }
        }

        Err(BackupError::contention(format!(
            "waited {:?} for artifact {}",
            limit, id
        )))
    }

    /// Whether an artifact id is currently locked
    pub fn is_artifact_locked(&self, id: &ArtifactId) -> bool {
        lock_set(&self.id_locks).contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_type_lock_rejects_second_holder() {
        let table = LockTable::new();
        let _held = table
            .acquire_type(ArtifactType::Database, LockWait::Reject)
            .await
            .unwrap();

        let err = table
            .acquire_type(ArtifactType::Database, LockWait::Reject)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), "LockContention");

        // Other types are independent
        assert!(table
            .acquire_type(ArtifactType::Logs, LockWait::Reject)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_type_lock_wait_times_out() {
        let table = LockTable::new();
        let _held = table
            .acquire_type(ArtifactType::Secrets, LockWait::Reject)
            .await
            .unwrap();
        let result = table
            .acquire_type(ArtifactType::Secrets, LockWait::Wait(Duration::from_millis(20)))
            .await;
        assert!(matches!(result, Err(BackupError::LockContention { .. })));
    }

    #[tokio::test]
    async fn test_artifact_lock_released_on_drop() {
        let table = LockTable::new();
        let id = ArtifactId::parse("logs_a").unwrap();

        let lock = table.try_acquire_artifact(&id).unwrap();
        assert!(table.is_artifact_locked(&id));
        assert!(table.try_acquire_artifact(&id).is_none());
        assert!(table.clone().is_artifact_locked(&id));

        drop(lock);
        assert!(!table.is_artifact_locked(&id));
        assert!(table
            .acquire_artifact(&id, LockWait::Reject)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_artifact_lock_wait_succeeds_after_release() {
        let table = LockTable::new();
        let id = ArtifactId::parse("logs_b").unwrap();
        let lock = table.try_acquire_artifact(&id).unwrap();

        let waiter = {
            let table = table.clone();
            let id = id.clone();
            tokio::spawn(async move {
                table
                    .acquire_artifact(&id, LockWait::Wait(Duration::from_secs(2)))
                    .await
                    .map(|l| l.id().clone())
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(lock);
        assert_eq!(waiter.await.unwrap().unwrap(), id);
    }
}
