//! The `brk` command-line surface
//!
//! Commands are thin: they assemble a policy and a `CommandContext` from flags,
//! configuration and environment, call the orchestrator, and render the
//! outcome. All backup semantics live in [`crate::backup`].
//!
//! # Architecture
//!
//! - `runner` - clap command tree, routing and exit codes
//! - `context` - configuration, environment, operation log and orchestrator wiring
//! - `commands` - one module per command family
//! - `utils` - output formatting

pub mod commands;
pub mod context;
pub mod error;
pub mod runner;
pub mod utils;

// Re-exports for convenience
pub use context::{CommandContext, PolicyOverrides};
pub use error::{CliError, CliResult, EXIT_FAILURE, EXIT_INTEGRITY, EXIT_SUCCESS};
pub use runner::{build_cli, init_tracing, run_cli, run_cli_from};
