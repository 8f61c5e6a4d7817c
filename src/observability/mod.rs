//! Observability utilities for backup runs.
//!
//! Structured process logging goes through `tracing`; this module adds a
//! markdown operation log that survives the process as an audit trail.
//!
//! # Example
//!
//! ```no_run
//! use brk::observability::OperationLog;
//! use std::collections::BTreeMap;
//!
//! let log = OperationLog::new(None, Some("INFO")).unwrap();
//! log.log_run_start("backup-database", &BTreeMap::new()).unwrap();
//! log.log_backup_created("database", "database_20240101_000000_0a1b2c3d", 1024, true, "ab12").unwrap();
//! log.log_run_end(0).unwrap();
//! ```

pub mod logger;

// Re-export main types for convenience
pub use logger::OperationLog;
