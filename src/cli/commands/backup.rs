//! Backup commands: one artifact type, or every configured type

use std::collections::BTreeMap;

use colored::*;

use crate::backup::{ArtifactType, BackupArtifact, BackupOutcome, Orchestrator};
use crate::cli::context::{CommandContext, PolicyOverrides};
use crate::cli::error::{CliError, CliResult};
use crate::cli::utils::format_bytes;

/// Options shared by the backup commands
#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    pub overrides: PolicyOverrides,
    pub revision: Option<String>,
    pub json: bool,
}

/// Back up a single artifact type
pub async fn backup_one(
    ctx: &CommandContext,
    artifact_type: ArtifactType,
    opts: BackupOptions,
) -> CliResult<()> {
    let policy = ctx.policy_for(artifact_type, &opts.overrides, true)?;
    let orchestrator = ctx.build_orchestrator()?;
    let backup_ctx = ctx.backup_context(opts.revision.as_deref());
    let _process_lock = ctx.process_lock(artifact_type.as_str()).await?;

    match orchestrator
        .create_backup(artifact_type, Some(&policy), &backup_ctx)
        .await
    {
        Ok(artifact) => {
            record_created(ctx, &orchestrator, &artifact).await;
            if opts.json {
                println!("{}", serde_json::to_string_pretty(&artifact)?);
            } else {
                print_created(&artifact);
            }
            Ok(())
        }
        Err(e) => {
            ctx.audit(|log| log.log_failure(artifact_type.as_str(), e.kind(), &e.to_string()));
            Err(e.into())
        }
    }
}

/// Back up every configured type concurrently
///
/// Fails with `PartialFailure` when any type failed; skipped best-effort
/// sources do not fail the run.
pub async fn backup_all(ctx: &CommandContext, opts: BackupOptions) -> CliResult<()> {
    let orchestrator = ctx.build_orchestrator()?;
    let configured = orchestrator.configured_types();
    if configured.is_empty() {
        return Err(CliError::ConfigError(
            "no sources configured; add [sources.<type>] sections to brk.toml".to_string(),
        ));
    }

    // Policy errors are kept per type so the run still reports them as failures.
    let mut policies = BTreeMap::new();
    for artifact_type in &configured {
        match ctx.policy_for(*artifact_type, &opts.overrides, false) {
            Ok(policy) => {
                policies.insert(*artifact_type, policy);
            }
            Err(e) => tracing::warn!(artifact_type = %artifact_type, error = %e, "no usable policy"),
        }
    }

    let mut process_locks = Vec::new();
    for artifact_type in &configured {
        process_locks.push(ctx.process_lock(artifact_type.as_str()).await?);
    }

    let backup_ctx = ctx.backup_context(opts.revision.as_deref());
    let report = orchestrator.backup_all(&policies, &backup_ctx).await;
    drop(process_locks);

    for outcome in &report.outcomes {
        match outcome {
            BackupOutcome::Created(artifact) => {
                record_created(ctx, &orchestrator, artifact).await;
                if !opts.json {
                    print_created(artifact);
                }
            }
            BackupOutcome::Skipped {
                artifact_type,
                reason,
            } => {
                ctx.audit(|log| log.log_backup_skipped(artifact_type.as_str(), reason));
                if !opts.json {
                    println!("{} {} skipped: {}", "⏭️".yellow(), artifact_type, reason);
                }
            }
            BackupOutcome::Failed {
                artifact_type,
                error,
            } => {
                ctx.audit(|log| {
                    log.log_failure(artifact_type.as_str(), error.kind(), &error.to_string())
                });
                if !opts.json {
                    eprintln!(
                        "{} {} failed [{}]: {}",
                        "❌".red(),
                        artifact_type,
                        error.kind(),
                        error
                    );
                }
            }
        }
    }

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&run_summary(&report.outcomes))?);
    } else {
        println!(
            "\n{} created, {} skipped, {} failed in {:.1}s",
            report.created().count(),
            report.skipped().count(),
            report.failures().count(),
            report.duration.as_secs_f64()
        );
    }

    let failed = report.failures().count();
    if failed > 0 {
        return Err(CliError::PartialFailure {
            failed,
            total: report.outcomes.len(),
        });
    }
    Ok(())
}

async fn record_created(ctx: &CommandContext, orchestrator: &Orchestrator, artifact: &BackupArtifact) {
    let checksum = match orchestrator.store().read_metadata(&artifact.id).await {
        Ok(Some(record)) => record.checksum_sha256,
        _ => String::from("unavailable"),
    };
    ctx.audit(|log| {
        log.log_backup_created(
            artifact.artifact_type.as_str(),
            artifact.id.as_str(),
            artifact.size_bytes,
            artifact.encrypted,
            &checksum,
        )
    });
}

fn print_created(artifact: &BackupArtifact) {
    println!(
        "{} {} {} ({}, {}) retained until {}",
        "✅".green(),
        artifact.artifact_type,
        artifact.id.to_string().bold(),
        format_bytes(artifact.size_bytes, true),
        if artifact.encrypted {
            "encrypted"
        } else {
            "plaintext"
        },
        artifact.retention_deadline.format("%Y-%m-%d %H:%M UTC")
    );
}

fn run_summary(outcomes: &[BackupOutcome]) -> serde_json::Value {
    let entries: Vec<serde_json::Value> = outcomes
        .iter()
        .map(|outcome| match outcome {
            BackupOutcome::Created(artifact) => serde_json::json!({
                "artifact_type": artifact.artifact_type,
                "status": "created",
                "artifact": artifact,
            }),
            BackupOutcome::Skipped {
                artifact_type,
                reason,
            } => serde_json::json!({
                "artifact_type": artifact_type,
                "status": "skipped",
                "reason": reason,
            }),
            BackupOutcome::Failed {
                artifact_type,
                error,
            } => serde_json::json!({
                "artifact_type": artifact_type,
                "status": "failed",
                "kind": error.kind(),
                "error": error.to_string(),
            }),
        })
        .collect();
    serde_json::Value::Array(entries)
}
