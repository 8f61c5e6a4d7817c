//! Command-line runner
//!
//! Builds the `brk` command tree, loads configuration, routes to command
//! handlers and maps the outcome to a process exit code:
//!
//! | code | meaning                                   |
//! |------|-------------------------------------------|
//! | 0    | success                                   |
//! | 1    | operational failure                       |
//! | 2    | integrity or verification failure         |

use std::ffi::OsString;
use std::path::PathBuf;
use std::str::FromStr;

use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::backup::{ArtifactType, MAX_RETENTION_DAYS};
use crate::cli::commands::{backup, cleanup, inventory, plan, restore};
use crate::cli::context::{CommandContext, PolicyOverrides};
use crate::cli::error::{CliError, CliResult, EXIT_FAILURE, EXIT_SUCCESS};
use crate::cli::utils::display_error_with_suggestions;

/// Single-type backup commands and the type each one produces
const BACKUP_COMMANDS: [(&str, ArtifactType, &str); 4] = [
    (
        "backup-database",
        ArtifactType::Database,
        "Back up the database",
    ),
    (
        "backup-app",
        ArtifactType::ApplicationState,
        "Back up application state",
    ),
    (
        "backup-secrets",
        ArtifactType::Secrets,
        "Back up secrets (always encrypted)",
    ),
    ("backup-logs", ArtifactType::Logs, "Back up logs"),
];

fn policy_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("retention-days")
                .long("retention-days")
                .value_name("DAYS")
                .help("Keep the artifact for this many days")
                .value_parser(clap::value_parser!(u32).range(1..=MAX_RETENTION_DAYS)),
        )
        .arg(
            Arg::new("max-size-gb")
                .long("max-size-gb")
                .value_name("GB")
                .help("Abort if the source produces more than this")
                .value_parser(clap::value_parser!(f64)),
        )
        .arg(
            Arg::new("no-encrypt")
                .long("no-encrypt")
                .help("Store plaintext (refused for secrets)")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("compression")
                .long("compression")
                .value_name("LEVEL")
                .help("gzip level 1-9, 0 for none")
                .value_parser(clap::value_parser!(u32).range(0..=9)),
        )
        .arg(
            Arg::new("revision")
                .long("revision")
                .value_name("REV")
                .help("Source revision recorded in metadata (default: $BRK_SOURCE_REVISION)"),
        )
}

fn restore_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("artifact")
                .required(true)
                .help("Artifact id, as shown by list-backups"),
        )
        .arg(
            Arg::new("target")
                .help("Target descriptor (default: the configured default_target)"),
        )
        .arg(
            Arg::new("confirm")
                .long("confirm")
                .value_name("ARTIFACT_ID")
                .help("Repeat the artifact id to confirm overwriting the target"),
        )
}

/// Build the complete `brk` command tree
pub fn build_cli() -> Command {
    let mut app = Command::new("brk")
        .about("Backup & Recovery Kit: integrity-verified, encrypted backups with fail-closed restore")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_name("FILE")
                .help("Configuration file (default: ./brk.toml)")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("env-file")
                .long("env-file")
                .global(true)
                .value_name("FILE")
                .help("Load environment variables from this file first")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .help("Print machine-readable JSON")
                .action(ArgAction::SetTrue),
        );

    app = app.subcommand(policy_args(
        Command::new("backup-all").about("Back up every configured artifact type concurrently"),
    ));
    for (name, _, about) in BACKUP_COMMANDS {
        app = app.subcommand(policy_args(Command::new(name).about(about)));
    }

    app.subcommand(restore_args(
        Command::new("restore-database").about("Restore a database artifact"),
    ))
    .subcommand(restore_args(
        Command::new("restore").about("Restore an artifact into its configured target"),
    ))
    .subcommand(
        Command::new("list-backups")
            .about("List complete artifacts, newest first")
            .arg(
                Arg::new("type")
                    .long("type")
                    .short('t')
                    .value_name("TYPE")
                    .help("Only this artifact type (database, app, secrets, logs)"),
            ),
    )
    .subcommand(
        Command::new("verify")
            .about("Re-verify an artifact's checksum")
            .arg(Arg::new("artifact").required(true)),
    )
    .subcommand(
        Command::new("delete-backup")
            .about("Delete one artifact regardless of retention")
            .arg(Arg::new("artifact").required(true))
            .arg(
                Arg::new("confirm")
                    .long("confirm")
                    .value_name("ARTIFACT_ID")
                    .help("Repeat the artifact id to confirm deletion"),
            ),
    )
    .subcommand(
        Command::new("cleanup")
            .about("Delete expired artifacts and abandoned writes")
            .arg(
                Arg::new("force")
                    .long("force")
                    .help("Also delete unexpired artifacts")
                    .requires("risk")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("risk")
                    .long("risk")
                    .value_name("STATEMENT")
                    .help("Why deleting unexpired backups is acceptable (recorded)"),
            )
            .arg(
                Arg::new("dry-run")
                    .long("dry-run")
                    .help("Report what would be deleted")
                    .action(ArgAction::SetTrue),
            ),
    )
    .subcommand(
        Command::new("disaster-plan")
            .about("Show what can be restored right now, in restore order"),
    )
}

/// Parse `std::env::args` and run; returns the process exit code
pub async fn run_cli() -> i32 {
    run_cli_from(std::env::args_os()).await
}

/// Parse `args` and run; returns the process exit code
pub async fn run_cli_from<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = match build_cli().try_get_matches_from(args) {
        Ok(m) => m,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                EXIT_FAILURE
            } else {
                EXIT_SUCCESS
            };
        }
    };
    let Some((name, sub)) = matches.subcommand() else {
        return EXIT_FAILURE;
    };

    let ctx = match CommandContext::load(
        sub.get_one::<PathBuf>("config").map(PathBuf::as_path),
        sub.get_one::<PathBuf>("env-file").map(PathBuf::as_path),
    ) {
        Ok(ctx) => ctx,
        Err(e) => {
            display_error_with_suggestions(&e, "loading configuration");
            return e.exit_code();
        }
    };
    init_tracing(ctx.log_level());

    ctx.audit(|log| log.log_run_start(name, &ctx.settings_snapshot()));
    let code = match dispatch(&ctx, name, sub).await {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            display_error_with_suggestions(&e, name);
            e.exit_code()
        }
    };
    ctx.audit(|log| log.log_run_end(code));
    code
}

/// Install the tracing subscriber; `RUST_LOG` overrides the configured level
pub fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn dispatch(ctx: &CommandContext, name: &str, matches: &ArgMatches) -> CliResult<()> {
    let json = matches.get_flag("json");

    if name == "backup-all" {
        return backup::backup_all(ctx, backup_options(matches, json)).await;
    }
    if let Some((_, artifact_type, _)) = BACKUP_COMMANDS.iter().find(|(n, _, _)| *n == name) {
        return backup::backup_one(ctx, *artifact_type, backup_options(matches, json)).await;
    }

    match name {
        "restore-database" | "restore" => {
            let opts = restore::RestoreOptions {
                artifact_id: required(matches, "artifact")?,
                target: matches.get_one::<String>("target").cloned(),
                confirm: matches.get_one::<String>("confirm").cloned(),
                expected_type: (name == "restore-database").then_some(ArtifactType::Database),
                json,
            };
            restore::restore(ctx, opts).await
        }
        "list-backups" => {
            let artifact_type = matches
                .get_one::<String>("type")
                .map(|t| ArtifactType::from_str(t))
                .transpose()?;
            inventory::list_backups(
                ctx,
                inventory::ListOptions {
                    artifact_type,
                    json,
                },
            )
            .await
        }
        "verify" => inventory::verify(ctx, &required(matches, "artifact")?, json).await,
        "delete-backup" => {
            inventory::delete_backup(
                ctx,
                &required(matches, "artifact")?,
                matches.get_one::<String>("confirm").map(String::as_str),
            )
            .await
        }
        "cleanup" => {
            let opts = cleanup::CleanupOptions {
                force: matches.get_flag("force"),
                risk: matches.get_one::<String>("risk").cloned(),
                dry_run: matches.get_flag("dry-run"),
                json,
            };
            cleanup::cleanup(ctx, opts).await
        }
        "disaster-plan" => plan::disaster_plan(ctx, json).await,
        other => Err(CliError::InvalidInput(format!("unknown command '{}'", other))),
    }
}

fn backup_options(matches: &ArgMatches, json: bool) -> backup::BackupOptions {
    backup::BackupOptions {
        overrides: PolicyOverrides {
            retention_days: matches.get_one::<u32>("retention-days").copied(),
            max_size_gb: matches.get_one::<f64>("max-size-gb").copied(),
            no_encrypt: matches.get_flag("no-encrypt"),
            compression: matches.get_one::<u32>("compression").copied(),
        },
        revision: matches.get_one::<String>("revision").cloned(),
        json,
    }
}

fn required(matches: &ArgMatches, name: &str) -> CliResult<String> {
    matches
        .get_one::<String>(name)
        .cloned()
        .ok_or_else(|| CliError::InvalidInput(format!("missing <{}>", name)))
}
