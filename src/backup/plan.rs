//! Disaster-recovery plan: what can be restored right now, and how

use super::models::{ArtifactId, ArtifactType, MetadataRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Recoverability of the newest artifact of one type
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum PlanStatus {
    /// Present and checksum verified
    Verified,
    /// Verified, but past its retention deadline and due for collection
    Expired,
    /// Present but failed verification
    Failed(String),
    /// No artifact of this type exists
    Missing,
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanStatus::Verified => write!(f, "verified"),
            PlanStatus::Expired => write!(f, "expired"),
            PlanStatus::Failed(reason) => write!(f, "FAILED: {}", reason),
            PlanStatus::Missing => write!(f, "missing"),
        }
    }
}

/// One row of the plan
#[derive(Debug, Clone, Serialize)]
pub struct PlanEntry {
    pub artifact_type: ArtifactType,
    pub artifact_id: Option<ArtifactId>,
    pub created_at: Option<DateTime<Utc>>,
    pub age_hours: Option<i64>,
    pub encrypted: Option<bool>,
    pub size_bytes: Option<u64>,
    pub source_revision: Option<String>,
    pub status: PlanStatus,
}

impl PlanEntry {
    pub fn for_record(
        artifact_type: ArtifactType,
        record: MetadataRecord,
        status: PlanStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            artifact_type,
            age_hours: Some((now - record.timestamp).num_hours()),
            created_at: Some(record.timestamp),
            encrypted: Some(record.encrypted),
            size_bytes: Some(record.size_bytes),
            source_revision: Some(record.source_revision),
            artifact_id: Some(record.backup_name),
            status,
        }
    }

    pub fn missing(artifact_type: ArtifactType) -> Self {
        Self {
            artifact_type,
            artifact_id: None,
            created_at: None,
            age_hours: None,
            encrypted: None,
            size_bytes: None,
            source_revision: None,
            status: PlanStatus::Missing,
        }
    }

    fn is_restorable(&self) -> bool {
        matches!(self.status, PlanStatus::Verified | PlanStatus::Expired)
    }
}

/// Ordered recovery plan across all artifact types
#[derive(Debug, Clone, Serialize)]
pub struct DisasterPlan {
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<PlanEntry>,
    /// Types with no restorable artifact
    pub gaps: Vec<ArtifactType>,
    /// Store keys whose metadata has no blob
    pub corrupted: Vec<String>,
    pub steps: Vec<String>,
}

/// Restore order: credentials first, then data, then state, then logs
const RESTORE_ORDER: [ArtifactType; 4] = [
    ArtifactType::Secrets,
    ArtifactType::Database,
    ArtifactType::ApplicationState,
    ArtifactType::Logs,
];

impl DisasterPlan {
    pub fn new(
        generated_at: DateTime<Utc>,
        entries: Vec<PlanEntry>,
        corrupted: Vec<String>,
        recipient_key_configured: bool,
    ) -> Self {
        let gaps = entries
            .iter()
            .filter(|e| !e.is_restorable())
            .map(|e| e.artifact_type)
            .collect();
        let steps = Self::build_steps(&entries, recipient_key_configured);

        Self {
            generated_at,
            entries,
            gaps,
            corrupted,
            steps,
        }
    }

    fn build_steps(entries: &[PlanEntry], recipient_key_configured: bool) -> Vec<String> {
        let mut steps = Vec::new();

        let needs_key = entries
            .iter()
            .any(|e| e.is_restorable() && e.encrypted == Some(true));
        if needs_key && !recipient_key_configured {
            steps.push(
                "Provide the recipient key via BRK_RECIPIENT_KEY or BRK_RECIPIENT_KEY_FILE"
                    .to_string(),
            );
        }

        for artifact_type in RESTORE_ORDER {
            let Some(entry) = entries.iter().find(|e| e.artifact_type == artifact_type) else {
                continue;
            };
            let Some(id) = entry.artifact_id.as_ref().filter(|_| entry.is_restorable()) else {
                continue;
            };
            let command = match artifact_type {
                ArtifactType::Database => format!("brk restore-database {} --confirm {}", id, id),
                _ => format!("brk restore {} <target> --confirm {}", id, id),
            };
            steps.push(format!("Restore {}: {}", artifact_type, command));
        }

        if !steps.is_empty() {
            steps.push("Run 'brk verify' on fresh backups once services are back".to_string());
        }
        steps
    }

    /// Every type has a restorable artifact and nothing is corrupted
    pub fn is_complete(&self) -> bool {
        self.gaps.is_empty() && self.corrupted.is_empty()
    }
}

impl fmt::Display for DisasterPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# Disaster Recovery Plan")?;
        writeln!(f)?;
        writeln!(f, "Generated: {}", self.generated_at.to_rfc3339())?;
        writeln!(f)?;

        for entry in &self.entries {
            match &entry.artifact_id {
                Some(id) => writeln!(
                    f,
                    "- {}: {} ({}h old, {}, {})",
                    entry.artifact_type,
                    id,
                    entry.age_hours.unwrap_or_default(),
                    if entry.encrypted == Some(true) {
                        "encrypted"
                    } else {
                        "plaintext"
                    },
                    entry.status
                )?,
                None => writeln!(f, "- {}: no backup available", entry.artifact_type)?,
            }
        }

        if !self.gaps.is_empty() {
            writeln!(f)?;
            let gaps: Vec<&str> = self.gaps.iter().map(|t| t.as_str()).collect();
            writeln!(f, "Gaps: {}", gaps.join(", "))?;
        }
        if !self.corrupted.is_empty() {
            writeln!(f, "Corrupted entries: {}", self.corrupted.join(", "))?;
        }

        if !self.steps.is_empty() {
            writeln!(f)?;
            writeln!(f, "## Steps")?;
            for (i, step) in self.steps.iter().enumerate() {
                writeln!(f, "{}. {}", i + 1, step)?;
            }
        }
        Ok(())
    }
}
