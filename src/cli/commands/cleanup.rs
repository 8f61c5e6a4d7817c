//! Retention cleanup command

use colored::*;

use crate::backup::{ArtifactType, CollectOptions, ForceCleanup};
use crate::cli::context::CommandContext;
use crate::cli::error::{CliError, CliResult};
use crate::cli::utils::format_bytes;

/// Cleanup options
#[derive(Debug, Clone, Default)]
pub struct CleanupOptions {
    pub force: bool,
    /// Risk statement; required with `force`
    pub risk: Option<String>,
    pub dry_run: bool,
    pub json: bool,
}

/// Delete expired artifacts, orphans and abandoned staging entries
///
/// Corruption found during the pass is reported and fails the command with
/// an integrity exit code; corrupt entries are never deleted automatically.
pub async fn cleanup(ctx: &CommandContext, opts: CleanupOptions) -> CliResult<()> {
    let force = match (opts.force, &opts.risk) {
        (true, Some(risk)) => Some(ForceCleanup::acknowledge(risk.as_str())?),
        (true, None) => {
            return Err(CliError::InvalidInput(
                "--force requires --risk \"<why deleting unexpired backups is acceptable>\""
                    .to_string(),
            ))
        }
        (false, _) => None,
    };
    let options = CollectOptions {
        force,
        dry_run: opts.dry_run,
    };

    let orchestrator = ctx.build_orchestrator()?;

    // Exclude every backup process so staging entries in flight are not collected.
    let _maintenance = ctx.process_lock("maintenance").await?;
    let mut type_locks = Vec::new();
    for artifact_type in ArtifactType::ALL {
        type_locks.push(ctx.process_lock(artifact_type.as_str()).await?);
    }

    let report = orchestrator.cleanup(chrono::Utc::now(), &options).await?;

    let deleted: Vec<String> = report.deleted.iter().map(|id| id.to_string()).collect();
    let skipped: Vec<String> = report
        .skipped_locked
        .iter()
        .map(|id| id.to_string())
        .collect();
    let corrupted: Vec<String> = report.corrupted.keys().cloned().collect();
    ctx.audit(|log| {
        log.log_cleanup(
            &deleted,
            &skipped,
            &corrupted,
            report.freed_bytes,
            report.dry_run,
            options.force.as_ref().map(|f| f.risk_statement()),
        )
    });

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let verb = if report.dry_run { "Would delete" } else { "Deleted" };
        for id in &deleted {
            println!("{} {} {}", "🗑️".yellow(), verb, id);
        }
        for key in &report.orphans_removed {
            println!("{} {} orphan {}", "🧹".yellow(), verb, key);
        }
        for id in &skipped {
            println!("{} {} is in use, skipped", "🔒".blue(), id);
        }
        for (key, reason) in &report.corrupted {
            println!("{} {} is corrupted: {}", "⚠️".red(), key, reason);
        }
        for error in &report.errors {
            eprintln!("{} {}", "❌".red(), error);
        }
        println!(
            "\nScanned {}, retained {}, {} {} ({} freed)",
            report.scanned,
            report.retained,
            verb.to_lowercase(),
            deleted.len(),
            format_bytes(report.freed_bytes, true)
        );
    }

    if report.has_corruption() {
        return Err(CliError::IntegrityFailure(format!(
            "{} corrupted entr{} found: {}",
            corrupted.len(),
            if corrupted.len() == 1 { "y" } else { "ies" },
            corrupted.join(", ")
        )));
    }
    if report.has_errors() {
        return Err(CliError::ExecutionError(format!(
            "{} deletion(s) failed",
            report.errors.len()
        )));
    }
    Ok(())
}
