//! Inventory commands: list, verify and delete artifacts

use colored::*;

use crate::backup::{ArtifactId, ArtifactType, BackupFilter};
use crate::cli::context::CommandContext;
use crate::cli::error::{CliError, CliResult};
use crate::cli::utils::{backups_table, format_bytes};

/// List options
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub artifact_type: Option<ArtifactType>,
    pub json: bool,
}

/// List complete artifacts, newest first
pub async fn list_backups(ctx: &CommandContext, opts: ListOptions) -> CliResult<()> {
    let orchestrator = ctx.build_orchestrator()?;
    let filter = BackupFilter {
        artifact_type: opts.artifact_type,
        created_after: None,
    };
    let records = orchestrator.list_backups(Some(&filter)).await?;

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("{}", "No backups found.".yellow());
        return Ok(());
    }

    println!("{}", backups_table(&records));
    let total: u64 = records.iter().map(|r| r.size_bytes).sum();
    println!(
        "{} artifact(s), {} total",
        records.len(),
        format_bytes(total, true)
    );
    Ok(())
}

/// Re-verify an artifact's checksum
///
/// A mismatch or a broken pair surfaces as an integrity failure (exit code 2).
pub async fn verify(ctx: &CommandContext, artifact_id: &str, json: bool) -> CliResult<()> {
    let id = ArtifactId::parse(artifact_id)?;
    let orchestrator = ctx.build_orchestrator()?;

    match orchestrator.verify(&id).await {
        Ok(record) => {
            ctx.audit(|log| log.log_verify(id.as_str(), true, &record.checksum_sha256));
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                println!(
                    "{} {} verified (sha256 {})",
                    "✅".green(),
                    id.to_string().bold(),
                    record.checksum_sha256
                );
            }
            Ok(())
        }
        Err(e) => {
            ctx.audit(|log| log.log_verify(id.as_str(), false, &e.to_string()));
            Err(e.into())
        }
    }
}

/// Delete one artifact; the operator must repeat the id in `confirm`
pub async fn delete_backup(
    ctx: &CommandContext,
    artifact_id: &str,
    confirm: Option<&str>,
) -> CliResult<()> {
    let id = ArtifactId::parse(artifact_id)?;
    if confirm != Some(id.as_str()) {
        return Err(CliError::InvalidInput(format!(
            "deleting {} requires '--confirm {}'",
            id, id
        )));
    }

    let orchestrator = ctx.build_orchestrator()?;
    let _maintenance = ctx.process_lock("maintenance").await?;
    let freed = orchestrator.delete_backup(&id).await?;

    let deleted = vec![id.to_string()];
    ctx.audit(|log| log.log_cleanup(&deleted, &[], &[], freed, false, None));
    println!(
        "{} Deleted {} ({} freed)",
        "🗑️".green(),
        id.to_string().bold(),
        format_bytes(freed, true)
    );
    Ok(())
}
