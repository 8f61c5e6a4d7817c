//! Retention collector
//!
//! Deletes expired blob + metadata pairs, garbage-collects orphans and
//! abandoned staging entries, and reports corruptions without touching them.

use super::errors::BackupResult;
use super::locks::LockTable;
use super::models::{ArtifactId, CollectOptions, CollectionReport};
use super::store::{ArtifactStore, EntryState};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Age-based pruning over an artifact store
#[derive(Clone)]
pub struct RetentionCollector {
    store: Arc<dyn ArtifactStore>,
    locks: LockTable,
}

impl RetentionCollector {
    pub fn new(store: Arc<dyn ArtifactStore>, locks: LockTable) -> Self {
        Self { store, locks }
    }

    /// Run one collection pass as of `now`
    ///
    /// An artifact is deleted iff its deadline is strictly before `now` (or a
    /// forced cleanup was acknowledged) and no one holds its id lock. Running
    /// the same pass twice deletes nothing the second time.
    pub async fn collect(
        &self,
        now: DateTime<Utc>,
        options: &CollectOptions,
    ) -> BackupResult<CollectionReport> {
        let started = Instant::now();
        let mut report = CollectionReport {
            dry_run: options.dry_run,
            ..Default::default()
        };

        if let Some(force) = &options.force {
            warn!(
                risk = %force.risk_statement(),
                "forced cleanup: unexpired artifacts will be deleted"
            );
        }

        for entry in self.store.entries().await? {
            report.scanned += 1;

            match entry.state {
                EntryState::Complete(record) => {
                    let expired = record.is_expired(now);
                    if !expired && options.force.is_none() {
                        report.retained += 1;
                        continue;
                    }

                    let id = record.backup_name.clone();
                    let Some(_lock) = self.locks.try_acquire_artifact(&id) else {
                        info!(artifact_id = %id, "artifact in use, skipping");
                        report.skipped_locked.push(id);
                        continue;
                    };

                    if !expired {
                        warn!(
                            artifact_id = %id,
                            retention_until = %record.retention_until,
                            "deleting unexpired artifact"
                        );
                    }
                    self.remove(&entry.key, Some(id), &mut report).await;
                }
                EntryState::Orphan => {
                    let _lock = match &entry.id {
                        Some(id) => match self.locks.try_acquire_artifact(id) {
                            Some(lock) => Some(lock),
                            None => {
                                report.skipped_locked.push(id.clone());
                                continue;
                            }
                        },
                        None => None,
                    };
                    if self.remove(&entry.key, None, &mut report).await {
                        report.orphans_removed.push(entry.key.clone());
                    }
                }
                EntryState::Corrupt { reason, .. } => {
                    warn!(key = %entry.key, reason = %reason, "corrupted artifact left in place");
                    report.corrupted.insert(entry.key.clone(), reason);
                }
            }
        }

        self.collect_staging(&mut report).await?;

        report.duration = started.elapsed();
        info!(
            scanned = report.scanned,
            deleted = report.deleted.len(),
            retained = report.retained,
            skipped_locked = report.skipped_locked.len(),
            orphans_removed = report.orphans_removed.len(),
            corrupted = report.corrupted.len(),
            freed_bytes = report.freed_bytes,
            dry_run = report.dry_run,
            "retention collection finished"
        );
        Ok(report)
    }

    /// Delete one visible entry; returns whether it is (or would be) gone
    async fn remove(
        &self,
        key: &str,
        id: Option<ArtifactId>,
        report: &mut CollectionReport,
    ) -> bool {
        if report.dry_run {
            if let Some(id) = id {
                report.deleted.push(id);
            }
            return true;
        }

        match self.store.delete(key).await {
            Ok(freed) => {
                report.freed_bytes += freed;
                if let Some(id) = id {
                    info!(artifact_id = %id, freed_bytes = freed, "artifact deleted");
                    report.deleted.push(id);
                }
                true
            }
            Err(e) => {
                warn!(key = %key, error = %e, "delete failed");
                report.errors.push(format!("{}: {}", key, e));
                false
            }
        }
    }

    /// Drop staging entries whose creator no longer holds the id lock
    async fn collect_staging(&self, report: &mut CollectionReport) -> BackupResult<()> {
        for key in self.store.staged().await? {
            let _lock = match ArtifactId::parse(&key) {
                Ok(id) => match self.locks.try_acquire_artifact(&id) {
                    Some(lock) => Some(lock),
                    None => continue,
                },
                Err(_) => None,
            };
            if !report.dry_run {
                self.store.discard_staged(&key);
            }
            report.orphans_removed.push(format!("staging/{}", key));
        }
        Ok(())
    }
}
