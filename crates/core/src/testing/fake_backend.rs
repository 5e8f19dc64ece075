//! Fake backend for testing.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::convert::{Backend, BackendError, BackendJob, ExecContext, OutputKind};

/// What a [`FakeBackend`] does when executed.
#[derive(Debug, Clone)]
pub enum FakeBehavior {
    /// Writes the configured output.
    Succeed,
    /// Fails as if the tool ran and exited non-zero.
    Fail(String),
    /// Fails as if the tool were not installed.
    Unavailable,
}

/// A recorded backend invocation.
#[derive(Debug, Clone)]
pub struct RecordedJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub input_format: String,
    pub target_format: String,
}

/// Controllable [`Backend`] that records every job it receives.
///
/// Tracks how many executions overlap so tests can assert on the
/// concurrency the orchestrator allows.
#[derive(Debug)]
pub struct FakeBackend {
    name: String,
    behavior: FakeBehavior,
    output: Vec<u8>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    jobs: Mutex<Vec<RecordedJob>>,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeBackend {
    fn with_behavior(name: &str, behavior: FakeBehavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            output: b"fake output".to_vec(),
            delay: None,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            jobs: Mutex::new(Vec::new()),
        }
    }

    /// Backend that writes `fake output` to the job's output.
    pub fn succeeding(name: &str) -> Self {
        Self::with_behavior(name, FakeBehavior::Succeed)
    }

    /// Backend that fails with `reason`.
    pub fn failing(name: &str, reason: &str) -> Self {
        Self::with_behavior(name, FakeBehavior::Fail(reason.to_string()))
    }

    /// Backend whose tool is missing.
    pub fn unavailable(name: &str) -> Self {
        Self::with_behavior(name, FakeBehavior::Unavailable)
    }

    /// Bytes written on success. Empty output makes the chain reject it.
    pub fn with_output(mut self, output: Vec<u8>) -> Self {
        self.output = output;
        self
    }

    /// Sleeps before doing anything.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Times `execute` was entered.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most executions observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn jobs(&self) -> Vec<RecordedJob> {
        self.jobs.lock().map(|jobs| jobs.clone()).unwrap_or_default()
    }

    /// Input format of the most recent job.
    pub fn last_input_format(&self) -> Option<String> {
        self.jobs().last().map(|job| job.input_format.clone())
    }
}

#[async_trait]
impl Backend for FakeBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, job: &BackendJob, _ctx: &ExecContext) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.push(RecordedJob {
                input: job.input.clone(),
                output: job.output.clone(),
                input_format: job.input_format.clone(),
                target_format: job.target_format.clone(),
            });
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.behavior {
            FakeBehavior::Succeed => {}
            FakeBehavior::Fail(reason) => return Err(BackendError::failed(reason.clone())),
            FakeBehavior::Unavailable => {
                return Err(BackendError::Unavailable {
                    tool: self.name.clone(),
                    path: PathBuf::from(&self.name),
                })
            }
        }

        match job.output_kind {
            OutputKind::File => {
                if let Some(parent) = job.output.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&job.output, &self.output).await?;
            }
            OutputKind::Directory => {
                tokio::fs::create_dir_all(&job.output).await?;
                tokio::fs::write(job.output.join("fake.txt"), &self.output).await?;
            }
        }
        Ok(())
    }
}
