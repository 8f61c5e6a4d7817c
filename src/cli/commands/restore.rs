//! Restore commands

use colored::*;

use crate::backup::{
    ArtifactId, ArtifactType, ConfirmationToken, RecoveryRequest, RestoreContext,
    TargetDescriptor,
};
use crate::cli::context::CommandContext;
use crate::cli::error::{CliError, CliResult};
use crate::cli::utils::format_bytes;

/// Restore options
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub artifact_id: String,
    /// Explicit target descriptor; falls back to the configured default
    pub target: Option<String>,
    /// Artifact id typed by the operator to confirm the overwrite
    pub confirm: Option<String>,
    /// Refuse artifacts of any other type
    pub expected_type: Option<ArtifactType>,
    pub json: bool,
}

/// Restore one artifact into its target
pub async fn restore(ctx: &CommandContext, opts: RestoreOptions) -> CliResult<()> {
    let id = ArtifactId::parse(&opts.artifact_id)?;
    let orchestrator = ctx.build_orchestrator()?;

    let artifact_type = match orchestrator.store().read_metadata(&id).await {
        Ok(Some(record)) => Some(record.backup_type),
        _ => None,
    };
    if let (Some(expected), Some(actual)) = (opts.expected_type, artifact_type) {
        if expected != actual {
            return Err(CliError::InvalidInput(format!(
                "{} is a {} artifact, not {}; use 'brk restore' instead",
                id, actual, expected
            )));
        }
    }

    let target = opts
        .target
        .clone()
        .or_else(|| artifact_type.or(opts.expected_type).and_then(|t| ctx.default_target(t)))
        .ok_or_else(|| {
            CliError::InvalidInput(format!(
                "no target given for {} and no default_target configured",
                id
            ))
        })?;

    let mut request = RecoveryRequest::new(id.clone(), TargetDescriptor::new(target.clone()));
    if let Some(confirm) = &opts.confirm {
        request = request.with_confirmation(ConfirmationToken::for_artifact(&ArtifactId::parse(
            confirm,
        )?));
    }

    // Restores and cleanup exclude each other across processes.
    let _maintenance = ctx.process_lock("maintenance").await?;
    let restore_ctx = RestoreContext::new(ctx.timeouts());

    match orchestrator.restore(&request, &restore_ctx).await {
        Ok(report) => {
            ctx.audit(|log| {
                log.log_restore(
                    report.artifact_id.as_str(),
                    &report.target,
                    report.bytes_restored,
                    report.duration.as_millis(),
                )
            });
            if opts.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "{} Restored {} ({}) into {}",
                    "♻️".green(),
                    report.artifact_id.to_string().bold(),
                    format_bytes(report.bytes_restored, true),
                    report.target
                );
                println!(
                    "   checksum verified, {}, {} item(s) applied in {:.1}s",
                    if report.decrypted { "decrypted" } else { "plaintext" },
                    report.items_applied,
                    report.duration.as_secs_f64()
                );
            }
            Ok(())
        }
        Err(e) => {
            ctx.audit(|log| log.log_failure(id.as_str(), e.kind(), &e.to_string()));
            Err(e.into())
        }
    }
}
