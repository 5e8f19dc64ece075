//! Backend abstraction and ordered fallback chains.

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, warn};

use super::error::{BackendError, BackendFailure};
use crate::metrics;
use crate::pool::WorkerPool;

/// What a backend is expected to leave at `BackendJob::output`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// A single non-empty file.
    File,
    /// A directory (archive extraction).
    Directory,
}

/// A single unit of work handed to a backend.
#[derive(Debug, Clone)]
pub struct BackendJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub input_format: String,
    pub target_format: String,
    pub output_kind: OutputKind,
}

impl BackendJob {
    /// File to file conversion.
    pub fn file(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        input_format: impl Into<String>,
        target_format: impl Into<String>,
    ) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            input_format: input_format.into(),
            target_format: target_format.into(),
            output_kind: OutputKind::File,
        }
    }

    /// Archive extraction into the directory `output`.
    pub fn extract(
        archive: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        archive_format: impl Into<String>,
    ) -> Self {
        Self {
            input: archive.into(),
            output: output_dir.into(),
            input_format: archive_format.into(),
            target_format: String::new(),
            output_kind: OutputKind::Directory,
        }
    }

    /// Packing the directory `input` into the archive `output`.
    pub fn pack(
        input_dir: impl Into<PathBuf>,
        archive: impl Into<PathBuf>,
        archive_format: impl Into<String>,
    ) -> Self {
        Self {
            input: input_dir.into(),
            output: archive.into(),
            input_format: String::new(),
            target_format: archive_format.into(),
            output_kind: OutputKind::File,
        }
    }
}

/// Shared execution resources handed to every backend.
#[derive(Clone)]
pub struct ExecContext {
    pub pool: WorkerPool,
    pub scratch_root: PathBuf,
}

impl ExecContext {
    pub fn new(pool: WorkerPool, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            scratch_root: scratch_root.into(),
        }
    }

    /// Creates a fresh scratch directory, removed when the handle drops.
    pub async fn scratch_dir(&self, prefix: &str) -> std::io::Result<TempDir> {
        tokio::fs::create_dir_all(&self.scratch_root).await?;
        tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(&self.scratch_root)
    }
}

/// A capability able to turn one file (or directory) into another.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Name used in logs, metrics and failure reports.
    fn name(&self) -> &str;

    /// Produces `job.output` from `job.input`.
    async fn execute(&self, job: &BackendJob, ctx: &ExecContext) -> Result<(), BackendError>;
}

/// Ordered list of backends; the first success wins.
#[derive(Clone, Default)]
pub struct BackendChain {
    backends: Vec<Arc<dyn Backend>>,
}

impl fmt::Debug for BackendChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl BackendChain {
    pub fn new(backends: Vec<Arc<dyn Backend>>) -> Self {
        Self { backends }
    }

    /// Chain with a single backend.
    pub fn single(backend: Arc<dyn Backend>) -> Self {
        Self {
            backends: vec![backend],
        }
    }

    /// Appends a fallback.
    pub fn then(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Backend names, in fallback order.
    pub fn names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Tries each backend in order. Returns the name of the backend that
    /// produced a verified output, or every attempt's failure.
    pub async fn run(
        &self,
        job: &BackendJob,
        ctx: &ExecContext,
    ) -> Result<String, Vec<BackendFailure>> {
        let mut failures = Vec::with_capacity(self.backends.len());

        for backend in &self.backends {
            let name = backend.name();
            if let Err(e) = prepare_output(job).await {
                failures.push(BackendFailure {
                    backend: name.to_string(),
                    reason: format!("could not prepare output: {}", e),
                    unavailable: false,
                });
                continue;
            }

            debug!(
                backend = %name,
                input = %job.input.display(),
                output = %job.output.display(),
                "Running backend"
            );

            let failure = match backend.execute(job, ctx).await {
                Ok(()) => match verify_output(job).await {
                    Ok(()) => return Ok(name.to_string()),
                    Err(reason) => BackendFailure {
                        backend: name.to_string(),
                        reason,
                        unavailable: false,
                    },
                },
                Err(e) => BackendFailure {
                    backend: name.to_string(),
                    reason: e.describe(),
                    unavailable: e.is_unavailable(),
                },
            };

            warn!(
                backend = %name,
                reason = %failure.reason,
                unavailable = failure.unavailable,
                "Backend failed, trying next"
            );
            metrics::BACKEND_FAILURES
                .with_label_values(&[
                    name,
                    if failure.unavailable {
                        "unavailable"
                    } else {
                        "failed"
                    },
                ])
                .inc();
            failures.push(failure);
        }

        Err(failures)
    }
}

/// Clears whatever a previous attempt left at the output location.
async fn prepare_output(job: &BackendJob) -> std::io::Result<()> {
    match job.output_kind {
        OutputKind::File => {
            if let Some(parent) = job.output.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            remove_if_exists(&job.output).await
        }
        OutputKind::Directory => {
            if tokio::fs::try_exists(&job.output).await? {
                tokio::fs::remove_dir_all(&job.output).await?;
            }
            tokio::fs::create_dir_all(&job.output).await
        }
    }
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

async fn verify_output(job: &BackendJob) -> Result<(), String> {
    let metadata = tokio::fs::metadata(&job.output)
        .await
        .map_err(|_| "backend reported success but produced no output".to_string())?;

    match job.output_kind {
        OutputKind::File if !metadata.is_file() => Err("output is not a file".to_string()),
        OutputKind::File if metadata.len() == 0 => Err("output file is empty".to_string()),
        OutputKind::Directory if !metadata.is_dir() => {
            Err("output is not a directory".to_string())
        }
        _ => Ok(()),
    }
}
