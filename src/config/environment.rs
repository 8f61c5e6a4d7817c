//! Environment variable loading and management.
//!
//! Secrets never live in `brk.toml`: the recipient key and database
//! credentials come from the environment (optionally seeded from a `.env`).

use std::env;
use std::path::{Path, PathBuf};

/// Recipient key, hex or base64
pub const RECIPIENT_KEY_VAR: &str = "BRK_RECIPIENT_KEY";
/// Path to a file holding the recipient key
pub const RECIPIENT_KEY_FILE_VAR: &str = "BRK_RECIPIENT_KEY_FILE";
/// Connection string handed to database producers and targets
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
/// Revision recorded in metadata, typically set by the deployment pipeline
pub const SOURCE_REVISION_VAR: &str = "BRK_SOURCE_REVISION";

/// Loads environment variables from .env file and system environment.
#[derive(Debug, Clone)]
pub struct EnvironmentLoader {
    env_file: Option<PathBuf>,
}

impl EnvironmentLoader {
    /// Initialize the environment loader.
    ///
    /// # Arguments
    /// * `env_file` - Path to .env file. Only an explicitly supplied file is loaded.
    pub fn new(env_file: Option<&Path>) -> Self {
        if let Some(path) = env_file {
            if path.exists() {
                if let Err(e) = dotenv::from_path(path) {
                    eprintln!("Warning: Failed to load .env file: {}", e);
                }
            }
        }

        Self {
            env_file: env_file.map(|p| p.to_path_buf()),
        }
    }

    /// The .env file this loader was created with
    pub fn env_file(&self) -> Option<&Path> {
        self.env_file.as_deref()
    }

    /// Encoded recipient key
    pub fn recipient_key(&self) -> Option<String> {
        non_empty(RECIPIENT_KEY_VAR)
    }

    /// Recipient key file path
    pub fn recipient_key_file(&self) -> Option<PathBuf> {
        non_empty(RECIPIENT_KEY_FILE_VAR).map(PathBuf::from)
    }

    /// Database connection string
    pub fn database_url(&self) -> Option<String> {
        non_empty(DATABASE_URL_VAR)
    }

    /// Source revision recorded in new artifacts
    pub fn source_revision(&self) -> Option<String> {
        non_empty(SOURCE_REVISION_VAR)
    }
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Default for EnvironmentLoader {
    fn default() -> Self {
        Self::new(None)
    }
}
