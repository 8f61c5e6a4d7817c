//! CLI command implementations
//!
//! Each command takes a `CommandContext` and an options struct parsed by the
//! runner, and returns a `CliResult`.

pub mod backup;
pub mod cleanup;
pub mod inventory;
pub mod plan;
pub mod restore;
