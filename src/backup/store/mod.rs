//! Artifact Store Abstraction
//!
//! Blob and metadata pairs are written through a two-phase protocol:
//!
//! ```text
//!   stage_blob ──► stage_metadata ──► commit
//!        │               │              │
//!   staging/<id>/   staging/<id>/   rename into artifacts/<id>/
//!     blob.bin      metadata.json
//! ```
//!
//! Anything left in staging after a crash is invisible to readers and is
//! garbage-collected by the retention collector.

mod file_store;
mod memory_store;
mod traits;

pub use file_store::*;
pub use memory_store::*;
pub use traits::*;
