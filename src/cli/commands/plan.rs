//! Disaster-plan command

use colored::*;

use crate::backup::PlanStatus;
use crate::cli::context::CommandContext;
use crate::cli::error::{CliError, CliResult};
use crate::cli::utils::plan_status_label;

/// Print the recovery plan
///
/// Exits with an integrity failure when the newest artifact of any type
/// fails verification or the store holds corrupted entries.
pub async fn disaster_plan(ctx: &CommandContext, json: bool) -> CliResult<()> {
    let orchestrator = ctx.build_orchestrator()?;
    let plan = orchestrator.disaster_plan(chrono::Utc::now()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        println!("{}", "Disaster Recovery Plan".bold());
        for entry in &plan.entries {
            let id = entry
                .artifact_id
                .as_ref()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {:<18} {:<44} {}",
                entry.artifact_type.to_string(),
                id,
                plan_status_label(&entry.status)
            );
        }
        if !plan.corrupted.is_empty() {
            println!(
                "\n{} {}",
                "Corrupted entries:".red().bold(),
                plan.corrupted.join(", ")
            );
        }
        if !plan.steps.is_empty() {
            println!("\n{}", "Steps:".bold());
            for (i, step) in plan.steps.iter().enumerate() {
                println!("  {}. {}", i + 1, step);
            }
        }
        if !plan.is_complete() {
            let gaps: Vec<&str> = plan.gaps.iter().map(|t| t.as_str()).collect();
            if !gaps.is_empty() {
                println!("\n{} {}", "⚠️ No restorable backup for:".yellow(), gaps.join(", "));
            }
        }
    }

    let failed: Vec<String> = plan
        .entries
        .iter()
        .filter(|e| matches!(e.status, PlanStatus::Failed(_)))
        .map(|e| e.artifact_type.to_string())
        .collect();
    if !failed.is_empty() || !plan.corrupted.is_empty() {
        return Err(CliError::IntegrityFailure(format!(
            "verification failed for: {}",
            failed
                .into_iter()
                .chain(plan.corrupted.iter().cloned())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }
    Ok(())
}
