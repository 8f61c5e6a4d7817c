//! Atomic file operations and scoped temporary state

use super::errors::{BackupError, BackupResult};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Atomic file writer that uses the write-temp-rename pattern
pub struct AtomicFileWriter {
    target_path: PathBuf,
    temp_path: PathBuf,
}

impl AtomicFileWriter {
    /// Create a new atomic file writer for the target path
    pub fn new(target_path: &Path) -> BackupResult<Self> {
        let temp_path = Self::generate_temp_path(target_path)?;

        Ok(AtomicFileWriter {
            target_path: target_path.to_path_buf(),
            temp_path,
        })
    }

    /// Stream `reader` into the target, replacing it atomically. Returns bytes written.
    pub fn write_from<R: Read>(&self, reader: &mut R) -> BackupResult<u64> {
        if let Some(parent) = self.target_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::File::create(&self.temp_path)?;
        let written = std::io::copy(reader, &mut file)?;
        file.sync_all()?;
        drop(file);

        self.commit()?;
        Ok(written)
    }

    /// Write bytes to the file atomically
    pub fn write_bytes(&self, content: &[u8]) -> BackupResult<u64> {
        self.write_from(&mut &content[..])
    }

    /// Write JSON data to the file atomically
    pub fn write_json<T: serde::Serialize>(&self, data: &T) -> BackupResult<u64> {
        let content = serde_json::to_vec_pretty(data)
            .map_err(|e| BackupError::config(format!("failed to serialize: {}", e)))?;
        self.write_bytes(&content)
    }

    /// Commit the write by renaming temp file to target
    fn commit(&self) -> BackupResult<()> {
        fs::rename(&self.temp_path, &self.target_path).map_err(|e| {
            BackupError::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "failed to move {} into place: {}",
                    self.target_path.display(),
                    e
                ),
            ))
        })
    }

    /// Abort the write by deleting the temp file
    pub fn abort(&self) -> BackupResult<()> {
        if self.temp_path.exists() {
            fs::remove_file(&self.temp_path)?;
        }
        Ok(())
    }

    fn generate_temp_path(target: &Path) -> BackupResult<PathBuf> {
        let parent = target
            .parent()
            .ok_or_else(|| BackupError::config("target path has no parent directory"))?;
        let filename = target
            .file_name()
            .ok_or_else(|| BackupError::config("target path has no filename"))?;

        Ok(parent.join(format!(
            ".{}.tmp.{}",
            filename.to_string_lossy(),
            Uuid::new_v4().simple()
        )))
    }
}

impl Drop for AtomicFileWriter {
    fn drop(&mut self) {
        let _ = self.abort();
    }
}

/// Cross-process lock backed by an exclusively created lock file
///
/// The CLI takes one per artifact type so two `brk` processes never back up
/// the same type concurrently.
pub struct ProcessLock {
    lock_file: PathBuf,
}

impl ProcessLock {
    /// Try to acquire the lock at `lock_path`; `None` if another process holds it
    pub fn try_acquire(lock_path: &Path) -> BackupResult<Option<ProcessLock>> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)
        {
            Ok(mut file) => {
                let _ = file.write_all(std::process::id().to_string().as_bytes());
                Ok(Some(ProcessLock {
                    lock_file: lock_path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(BackupError::from(e)),
        }
    }

    /// Wait for the lock, failing with `LockContention` after `timeout`
    pub async fn acquire(lock_path: &Path, timeout: Duration) -> BackupResult<ProcessLock> {
        let start = tokio::time::Instant::now();

        loop {
            if let Some(lock) = Self::try_acquire(lock_path)? {
                return Ok(lock);
            }

            if start.elapsed() >= timeout {
                let holder = Self::holder_pid(lock_path)
                    .map(|pid| format!(" (held by pid {})", pid))
                    .unwrap_or_default();
                return Err(BackupError::contention(format!(
                    "could not acquire {} within {:?}{}",
                    lock_path.display(),
                    timeout,
                    holder
                )));
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Pid recorded in an existing lock file
    pub fn holder_pid(lock_path: &Path) -> Option<u32> {
        fs::read_to_string(lock_path).ok()?.trim().parse().ok()
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_file);
    }
}

/// Create a new file readable only by the current user
pub fn create_private(path: &Path) -> BackupResult<fs::File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    Ok(options.open(path)?)
}

/// Private temporary directory for in-flight pipeline files
///
/// Everything inside is removed when this value is dropped, including when the
/// owning future is cancelled.
pub struct ScratchDir {
    dir: tempfile::TempDir,
}

impl ScratchDir {
    pub fn new(prefix: &str) -> BackupResult<Self> {
        let dir = tempfile::Builder::new().prefix(prefix).tempdir()?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of `name` inside the directory
    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Create `name` as a new private file
    pub fn create(&self, name: &str) -> BackupResult<fs::File> {
        create_private(&self.join(name))
    }
}

/// Decrypted payload materialized in a private temporary directory
///
/// The directory and file are removed when this value is dropped, on success
/// and failure paths alike.
pub struct EphemeralPlaintext {
    scratch: ScratchDir,
    path: PathBuf,
    len: u64,
}

impl EphemeralPlaintext {
    /// Stream `reader` into a new private file
    pub fn from_reader<R: Read>(reader: &mut R) -> BackupResult<Self> {
        Self::build(|file| {
            std::io::copy(reader, file)?;
            Ok(())
        })
    }

    /// Create the private file and let `fill` write the payload into it
    pub fn build<F>(fill: F) -> BackupResult<Self>
    where
        F: FnOnce(&mut fs::File) -> BackupResult<()>,
    {
        let scratch = ScratchDir::new("brk-restore-")?;
        let path = scratch.join("payload");

        let mut file = scratch.create("payload")?;
        fill(&mut file)?;
        file.flush()?;
        file.sync_all()?;
        let len = file.metadata()?.len();

        Ok(Self { scratch, path, len })
    }

    /// Path of the plaintext file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the plaintext file
    pub fn dir(&self) -> &Path {
        self.scratch.path()
    }

    /// Size in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Open the payload for reading
    pub fn open(&self) -> BackupResult<fs::File> {
        Ok(fs::File::open(&self.path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_atomic_write_replaces_target() {
        let temp_dir = tempdir().unwrap();
        let target = temp_dir.path().join("state").join("app.json");

        AtomicFileWriter::new(&target)
            .unwrap()
            .write_json(&serde_json::json!({"version": 1}))
            .unwrap();
        AtomicFileWriter::new(&target)
            .unwrap()
            .write_bytes(b"{\"version\":2}")
            .unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "{\"version\":2}");
        let leftovers: Vec<_> = fs::read_dir(target.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_process_lock_is_exclusive() {
        let temp_dir = tempdir().unwrap();
        let lock_path = temp_dir.path().join("database.lock");

        let lock = ProcessLock::try_acquire(&lock_path).unwrap().unwrap();
        assert!(ProcessLock::try_acquire(&lock_path).unwrap().is_none());
        assert_eq!(ProcessLock::holder_pid(&lock_path), Some(std::process::id()));

        drop(lock);
        assert!(!lock_path.exists());
        assert!(ProcessLock::try_acquire(&lock_path).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_process_lock_wait_times_out() {
        let temp_dir = tempdir().unwrap();
        let lock_path = temp_dir.path().join("logs.lock");
        let _held = ProcessLock::try_acquire(&lock_path).unwrap().unwrap();

        let err = ProcessLock::acquire(&lock_path, Duration::from_millis(150))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), "LockContention");
    }

    #[test]
    fn test_ephemeral_plaintext_removed_on_drop() {
        let plaintext = EphemeralPlaintext::from_reader(&mut &b"top secret"[..]).unwrap();
        let dir = plaintext.dir().to_path_buf();
        assert_eq!(plaintext.len(), 10);
        assert_eq!(fs::read(plaintext.path()).unwrap(), b"top secret");

        drop(plaintext);
        assert!(!dir.exists());
    }

    #[test]
    fn test_scratch_dir_is_private_and_scoped() {
        let scratch = ScratchDir::new("brk-test-").unwrap();
        scratch.create("spool").unwrap().write_all(b"x").unwrap();
        assert!(scratch.create("spool").is_err());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(scratch.join("spool")).unwrap().permissions().mode();
            assert_eq!(mode & 0o077, 0);
        }

        let dir = scratch.path().to_path_buf();
        drop(scratch);
        assert!(!dir.exists());
    }

    #[test]
    fn test_failed_fill_is_reported() {
        let result = EphemeralPlaintext::build(|file| {
            file.write_all(b"half")?;
            Err(BackupError::encryption("decryption failed"))
        });
        assert!(result.is_err());
    }
}
