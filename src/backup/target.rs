//! Restore targets: type-specific destination writes

use super::atomic::{AtomicFileWriter, EphemeralPlaintext};
use super::models::{ArtifactId, ArtifactType, TargetDescriptor};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

const TARGET_PLACEHOLDER: &str = "{target}";

/// Verified, decrypted payload handed to a target
pub struct RestorePayload<'a> {
    pub artifact_id: &'a ArtifactId,
    pub artifact_type: ArtifactType,
    pub plaintext: &'a EphemeralPlaintext,
}

/// What a target reports after a successful apply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplySummary {
    pub bytes_applied: u64,
    pub items_applied: u64,
    pub detail: Option<String>,
}

/// Destination for restored artifacts of one type
///
/// Errors are returned verbatim to the operator; the recovery engine neither
/// retries nor rolls back.
#[async_trait]
pub trait RestoreTarget: Send + Sync {
    /// The artifact type this target accepts
    fn artifact_type(&self) -> ArtifactType;

    /// Write the payload into the destination named by `target`
    async fn apply(
        &self,
        target: &TargetDescriptor,
        payload: &RestorePayload<'_>,
    ) -> Result<ApplySummary, String>;
}

/// Target that pipes the payload into a subprocess, e.g. `psql` or `pg_restore`
///
/// Any argument equal to or containing `{target}` has it replaced with the
/// target descriptor.
#[derive(Debug, Clone)]
pub struct CommandTarget {
    artifact_type: ArtifactType,
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl CommandTarget {
    pub fn new<P, I, S>(artifact_type: ArtifactType, program: P, args: I) -> Self
    where
        P: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            artifact_type,
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
        }
    }

    pub fn with_env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn render_args(&self, target: &TargetDescriptor) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(TARGET_PLACEHOLDER, target.as_str()))
            .collect()
    }
}

#[async_trait]
impl RestoreTarget for CommandTarget {
    fn artifact_type(&self) -> ArtifactType {
        self.artifact_type
    }

    async fn apply(
        &self,
        target: &TargetDescriptor,
        payload: &RestorePayload<'_>,
    ) -> Result<ApplySummary, String> {
        let stdin = payload
            .plaintext
            .open()
            .map_err(|e| format!("cannot open restore payload: {}", e))?;

        let mut command = Command::new(&self.program);
        command
            .args(self.render_args(target))
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            command.env(key, value);
        }

        debug!(program = %self.program, target = %target, "applying restore payload");
        let output = command
            .output()
            .await
            .map_err(|e| format!("failed to start '{}': {}", self.program, e))?;

        if !output.status.success() {
            return Err(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(ApplySummary {
            bytes_applied: payload.plaintext.len(),
            items_applied: 1,
            detail: (!stdout.is_empty()).then_some(stdout),
        })
    }
}

/// Target that writes the payload to a file path, replacing it atomically
#[derive(Debug, Clone)]
pub struct FileTarget {
    artifact_type: ArtifactType,
    base_dir: Option<PathBuf>,
}

impl FileTarget {
    pub fn new(artifact_type: ArtifactType) -> Self {
        Self {
            artifact_type,
            base_dir: None,
        }
    }

    /// Resolve relative target descriptors against `dir`
    pub fn with_base_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    fn resolve(&self, target: &TargetDescriptor) -> PathBuf {
        let path = PathBuf::from(target.as_str());
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        }
    }
}

#[async_trait]
impl RestoreTarget for FileTarget {
    fn artifact_type(&self) -> ArtifactType {
        self.artifact_type
    }

    async fn apply(
        &self,
        target: &TargetDescriptor,
        payload: &RestorePayload<'_>,
    ) -> Result<ApplySummary, String> {
        let destination = self.resolve(target);
        let mut source = payload
            .plaintext
            .open()
            .map_err(|e| format!("cannot open restore payload: {}", e))?;

        let dest = destination.clone();
        let written = tokio::task::spawn_blocking(move || {
            AtomicFileWriter::new(&dest)?.write_from(&mut source)
        })
        .await
        .map_err(|e| format!("restore task failed: {}", e))?
        .map_err(|e| format!("cannot write {}: {}", destination.display(), e))?;

        Ok(ApplySummary {
            bytes_applied: written,
            items_applied: 1,
            detail: Some(destination.display().to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_target_writes_payload() {
        let dir = tempfile::tempdir().unwrap();
        let plaintext = EphemeralPlaintext::from_reader(&mut &b"restored state"[..]).unwrap();
        let id = ArtifactId::parse("application_state_x").unwrap();
        let payload = RestorePayload {
            artifact_id: &id,
            artifact_type: ArtifactType::ApplicationState,
            plaintext: &plaintext,
        };

        let target = FileTarget::new(ArtifactType::ApplicationState).with_base_dir(dir.path());
        let summary = target
            .apply(&TargetDescriptor::new("state/app.bin"), &payload)
            .await
            .unwrap();

        assert_eq!(summary.bytes_applied, 14);
        assert_eq!(
            std::fs::read(dir.path().join("state/app.bin")).unwrap(),
            b"restored state"
        );
    }

    #[test]
    fn test_command_target_substitutes_descriptor() {
        let target = CommandTarget::new(
            ArtifactType::Database,
            "pg_restore",
            ["--clean", "--dbname={target}"],
        );
        assert_eq!(
            target.render_args(&TargetDescriptor::new("postgres://db/app")),
            vec!["--clean", "--dbname=postgres://db/app"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_target_failure_is_verbatim() {
        let plaintext = EphemeralPlaintext::from_reader(&mut &b"SELECT 1;"[..]).unwrap();
        let id = ArtifactId::parse("database_x").unwrap();
        let payload = RestorePayload {
            artifact_id: &id,
            artifact_type: ArtifactType::Database,
            plaintext: &plaintext,
        };

        let target = CommandTarget::new(
            ArtifactType::Database,
            "sh",
            ["-c", "cat >/dev/null; echo 'role \"app\" does not exist' >&2; exit 1"],
        );
        let err = target
            .apply(&TargetDescriptor::new("appdb"), &payload)
            .await
            .unwrap_err();
        assert!(err.contains("role \"app\" does not exist"));
    }
}
