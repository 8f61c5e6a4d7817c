//! Backup producers: turn a live source into a raw byte stream

use super::errors::BackupError;
use super::models::ArtifactType;
use async_trait::async_trait;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

type Completion = Pin<Box<dyn Future<Output = Result<(), ProducerError>> + Send>>;

/// Errors raised by producers
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}: {stderr}")]
    Exited {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("source file {path} unavailable: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ProducerError {
    /// Attach the artifact type this failure belongs to
    pub fn into_backup_error(self, artifact_type: ArtifactType) -> BackupError {
        BackupError::SourceUnavailable {
            artifact_type,
            cause: self.to_string(),
        }
    }
}

/// Lazy, finite, non-restartable byte stream from a source
///
/// Readers consume [`SourceStream::reader`] to EOF, then call
/// [`SourceStream::finish`] to learn whether the source completed cleanly.
/// Dropping the stream early abandons the source.
pub struct SourceStream {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    completion: Option<Completion>,
}

impl SourceStream {
    /// Stream with no completion check beyond reaching EOF
    pub fn new<R: AsyncRead + Send + Unpin + 'static>(reader: R) -> Self {
        Self {
            reader: Box::new(reader),
            completion: None,
        }
    }

    /// Attach a check that runs after EOF (e.g. waiting for a child exit status)
    pub fn with_completion<F>(mut self, completion: F) -> Self
    where
        F: Future<Output = Result<(), ProducerError>> + Send + 'static,
    {
        self.completion = Some(Box::pin(completion));
        self
    }

    /// The underlying reader
    pub fn reader(&mut self) -> &mut (dyn AsyncRead + Send + Unpin) {
        self.reader.as_mut()
    }

    /// Wait for the source to report completion
    pub async fn finish(self) -> Result<(), ProducerError> {
        drop(self.reader);
        match self.completion {
            Some(completion) => completion.await,
            None => Ok(()),
        }
    }
}

/// A source for one artifact type
#[async_trait]
pub trait BackupProducer: Send + Sync {
    /// The artifact type this producer feeds
    fn artifact_type(&self) -> ArtifactType;

    /// Whether a failure may be recorded as skipped in a multi-type run
    fn is_best_effort(&self) -> bool {
        false
    }

    /// Open the source
    async fn produce(&self) -> Result<SourceStream, ProducerError>;
}

/// Producer that streams a subprocess's stdout, e.g. `pg_dump` or `tar cf -`
#[derive(Debug, Clone)]
pub struct CommandProducer {
    artifact_type: ArtifactType,
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
    best_effort: bool,
}

impl CommandProducer {
    /// Create a producer running `program` with `args`
    pub fn new<P, I, S>(artifact_type: ArtifactType, program: P, args: I) -> Self
    where
        P: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            artifact_type,
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            current_dir: None,
            best_effort: false,
        }
    }

    pub fn with_env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_current_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn with_best_effort(mut self, best_effort: bool) -> Self {
        self.best_effort = best_effort;
        self
    }
}

#[async_trait]
impl BackupProducer for CommandProducer {
    fn artifact_type(&self) -> ArtifactType {
        self.artifact_type
    }

    fn is_best_effort(&self) -> bool {
        self.best_effort
    }

    async fn produce(&self) -> Result<SourceStream, ProducerError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| ProducerError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        debug!(program = %self.program, pid = ?child.id(), "producer started");

        let stdout = child.stdout.take().ok_or_else(|| ProducerError::Spawn {
            program: self.program.clone(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "stdout not captured"),
        })?;

        // Drain stderr concurrently so a chatty child cannot block on a full pipe
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                String::from_utf8_lossy(&buf).trim().to_string()
            })
        });

        let program = self.program.clone();
        Ok(SourceStream::new(stdout).with_completion(async move {
            let status = child.wait().await?;
            let stderr = match stderr_task {
                Some(task) => task.await.unwrap_or_default(),
                None => String::new(),
            };
            if status.success() {
                Ok(())
            } else {
                Err(ProducerError::Exited {
                    program,
                    status: status.to_string(),
                    stderr,
                })
            }
        }))
    }
}

/// Producer that streams a single file
#[derive(Debug, Clone)]
pub struct FileProducer {
    artifact_type: ArtifactType,
    path: PathBuf,
    best_effort: bool,
}

impl FileProducer {
    pub fn new<P: Into<PathBuf>>(artifact_type: ArtifactType, path: P) -> Self {
        Self {
            artifact_type,
            path: path.into(),
            best_effort: false,
        }
    }

    pub fn with_best_effort(mut self, best_effort: bool) -> Self {
        self.best_effort = best_effort;
        self
    }
}

#[async_trait]
impl BackupProducer for FileProducer {
    fn artifact_type(&self) -> ArtifactType {
        self.artifact_type
    }

    fn is_best_effort(&self) -> bool {
        self.best_effort
    }

    async fn produce(&self) -> Result<SourceStream, ProducerError> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|source| ProducerError::File {
                path: self.path.clone(),
                source,
            })?;
        Ok(SourceStream::new(file))
    }
}
