//! Markdown operation log for backup, restore and cleanup runs.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only audit trail of operations.
///
/// Each run appends markdown sections describing what was created, restored,
/// verified or deleted, so an operator can reconstruct what happened during an
/// incident without access to the process logs.
#[derive(Debug)]
pub struct OperationLog {
    log_file: PathBuf,
    log_level: String,
}

impl OperationLog {
    /// Open (or create) an operation log.
    ///
    /// # Arguments
    /// * `log_file` - Path to log file. If None, creates a timestamped file in temp directory.
    /// * `log_level` - Logging level (defaults to "INFO"); "DEBUG" adds run settings.
    pub fn new(log_file: Option<&Path>, log_level: Option<&str>) -> Result<Self> {
        let log_file = match log_file {
            Some(p) => p.to_path_buf(),
            None => std::env::temp_dir().join("brk-logs").join(format!(
                "operations_{}_{}.md",
                Utc::now().timestamp_millis(),
                std::process::id()
            )),
        };

        if let Some(parent) = log_file.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
        }

        let log = Self {
            log_file,
            log_level: log_level.unwrap_or("INFO").to_uppercase(),
        };

        if !log.log_file.exists() {
            log.initialize_log_file()?;
        }

        Ok(log)
    }

    /// Path of the log file
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// Configured level
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    fn is_debug(&self) -> bool {
        matches!(self.log_level.as_str(), "DEBUG" | "TRACE")
    }

    fn initialize_log_file(&self) -> Result<()> {
        let mut file = File::create(&self.log_file)
            .with_context(|| format!("Failed to create log file: {}", self.log_file.display()))?;

        let now: DateTime<Utc> = Utc::now();
        writeln!(file, "# Backup Operation Log\n")?;
        writeln!(file, "Log started: {}\n", now.to_rfc3339())?;
        writeln!(file, "---\n")?;
        Ok(())
    }

    fn append_to_log(&self, content: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .with_context(|| format!("Failed to open log file: {}", self.log_file.display()))?;

        write!(file, "{}", content).with_context(|| "Failed to write to log file")?;
        Ok(())
    }

    /// Log the start of a command run.
    ///
    /// # Arguments
    /// * `command` - CLI command name.
    /// * `settings` - Effective settings; only written at DEBUG level.
    pub fn log_run_start(
        &self,
        command: &str,
        settings: &BTreeMap<String, serde_json::Value>,
    ) -> Result<()> {
        let mut content = format!(
            "## {} - {}\n\n**Operator:** {}\n\n",
            command,
            Utc::now().to_rfc3339(),
            operator()
        );
        if self.is_debug() && !settings.is_empty() {
            content.push_str(&format!(
                "**Settings:**\n```json\n{}\n```\n\n",
                serde_json::to_string_pretty(settings).unwrap_or_default()
            ));
        }
        self.append_to_log(&content)
    }

    /// Log a committed artifact.
    pub fn log_backup_created(
        &self,
        artifact_type: &str,
        artifact_id: &str,
        size_bytes: u64,
        encrypted: bool,
        checksum: &str,
    ) -> Result<()> {
        self.append_to_log(&format!(
            "- ✅ **{}** `{}` ({} bytes, {}, sha256 `{}`)\n",
            artifact_type,
            artifact_id,
            size_bytes,
            if encrypted { "encrypted" } else { "plaintext" },
            checksum
        ))
    }

    /// Log a best-effort source that was skipped.
    pub fn log_backup_skipped(&self, artifact_type: &str, reason: &str) -> Result<()> {
        self.append_to_log(&format!(
            "- ⏭️ **{}** skipped: {}\n",
            artifact_type,
            single_line(reason)
        ))
    }

    /// Log a failed operation with its error kind.
    pub fn log_failure(&self, subject: &str, kind: &str, message: &str) -> Result<()> {
        self.append_to_log(&format!(
            "- ❌ **{}** failed [{}]: {}\n",
            subject,
            kind,
            single_line(message)
        ))
    }

    /// Log a completed restore.
    pub fn log_restore(
        &self,
        artifact_id: &str,
        target: &str,
        bytes_restored: u64,
        duration_ms: u128,
    ) -> Result<()> {
        self.append_to_log(&format!(
            "- ♻️ restored `{}` into `{}` ({} bytes in {} ms)\n",
            artifact_id, target, bytes_restored, duration_ms
        ))
    }

    /// Log a verification result.
    pub fn log_verify(&self, artifact_id: &str, ok: bool, detail: &str) -> Result<()> {
        let marker = if ok { "✅" } else { "❌" };
        self.append_to_log(&format!(
            "- {} verify `{}`: {}\n",
            marker,
            artifact_id,
            single_line(detail)
        ))
    }

    /// Log a retention pass.
    ///
    /// # Arguments
    /// * `deleted` - Ids deleted (or that would be, on a dry run).
    /// * `skipped_locked` - Ids left alone because they were in use.
    /// * `corrupted` - Keys reported as corrupted.
    /// * `freed_bytes` - Space reclaimed.
    /// * `dry_run` - Whether anything was actually deleted.
    /// * `risk` - Stated risk for a forced cleanup.
    pub fn log_cleanup(
        &self,
        deleted: &[String],
        skipped_locked: &[String],
        corrupted: &[String],
        freed_bytes: u64,
        dry_run: bool,
        risk: Option<&str>,
    ) -> Result<()> {
        let mut content = String::new();
        if dry_run {
            content.push_str("_Dry run: nothing was deleted._\n\n");
        }
        if let Some(risk) = risk {
            content.push_str(&format!("**Forced. Risk acknowledged:** {}\n\n", single_line(risk)));
        }
        content.push_str(&format!(
            "- deleted: {}\n- skipped (locked): {}\n- corrupted: {}\n- freed: {} bytes\n",
            list_or_none(deleted),
            list_or_none(skipped_locked),
            list_or_none(corrupted),
            freed_bytes
        ));
        self.append_to_log(&content)
    }

    /// Log the end of a command run.
    pub fn log_run_end(&self, exit_code: i32) -> Result<()> {
        self.append_to_log(&format!(
            "\n**Finished:** {} (exit code {})\n\n---\n\n",
            Utc::now().to_rfc3339(),
            exit_code
        ))
    }
}

fn operator() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn single_line(text: &str) -> String {
    text.lines().map(str::trim).collect::<Vec<_>>().join(" ")
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items
            .iter()
            .map(|i| format!("`{}`", i))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
