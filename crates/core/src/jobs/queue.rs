//! In-process job runner on top of the orchestrator.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::metrics;
use crate::orchestrator::{ConversionOrchestrator, ConversionRequest};

/// Finished jobs kept for polling before the oldest are dropped.
const DEFAULT_RETAINED_JOBS: usize = 1024;

/// Lifecycle of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Started,
    Success { output_path: PathBuf },
    Failure { message: String },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::Failure { .. })
    }
}

/// Errors from job lookups.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Timed out waiting for job {0}")]
    WaitTimeout(String),
}

/// Snapshot of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: String,
    pub request: ConversionRequest,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
}

struct JobEntry {
    request: ConversionRequest,
    submitted_at: DateTime<Utc>,
    status: watch::Sender<JobStatus>,
}

#[derive(Default)]
struct JobTable {
    entries: HashMap<String, JobEntry>,
    finished: VecDeque<String>,
}

/// Runs conversions on tokio tasks and keeps their status for pollers.
#[derive(Clone)]
pub struct JobQueue {
    orchestrator: Arc<ConversionOrchestrator>,
    jobs: Arc<RwLock<JobTable>>,
    retained: usize,
}

impl JobQueue {
    pub fn new(orchestrator: Arc<ConversionOrchestrator>) -> Self {
        Self {
            orchestrator,
            jobs: Arc::new(RwLock::new(JobTable::default())),
            retained: DEFAULT_RETAINED_JOBS,
        }
    }

    /// Keeps at most `retained` finished jobs.
    pub fn with_retained(mut self, retained: usize) -> Self {
        self.retained = retained.max(1);
        self
    }

    /// Queues `request` and returns the job id immediately.
    pub async fn submit(&self, request: ConversionRequest) -> String {
        let id = Uuid::new_v4().to_string();
        let (status, _) = watch::channel(JobStatus::Pending);

        self.jobs.write().await.entries.insert(
            id.clone(),
            JobEntry {
                request: request.clone(),
                submitted_at: Utc::now(),
                status,
            },
        );
        debug!(job_id = %id, category = %request.category, "Job submitted");

        let queue = self.clone();
        let job_id = id.clone();
        tokio::spawn(async move {
            queue.set_status(&job_id, JobStatus::Started).await;

            let status = match queue.orchestrator.convert(&request).await {
                Ok(outcome) => match outcome.output_path {
                    Some(output_path) => JobStatus::Success { output_path },
                    None => JobStatus::Failure {
                        message: outcome.error_detail.unwrap_or_default(),
                    },
                },
                Err(e) => JobStatus::Failure {
                    message: e.to_string(),
                },
            };

            let label = match status {
                JobStatus::Success { .. } => "success",
                _ => "failure",
            };
            metrics::JOBS_FINISHED.with_label_values(&[label]).inc();
            info!(job_id = %job_id, result = label, "Job finished");

            queue.set_status(&job_id, status).await;
            queue.retire(&job_id).await;
        });

        id
    }

    async fn set_status(&self, id: &str, status: JobStatus) {
        if let Some(entry) = self.jobs.read().await.entries.get(id) {
            entry.status.send_replace(status);
        }
    }

    async fn retire(&self, id: &str) {
        let mut jobs = self.jobs.write().await;
        jobs.finished.push_back(id.to_string());
        while jobs.finished.len() > self.retained {
            if let Some(oldest) = jobs.finished.pop_front() {
                jobs.entries.remove(&oldest);
            }
        }
    }

    /// Current status of a job.
    pub async fn status(&self, id: &str) -> Result<JobStatus, JobError> {
        self.jobs
            .read()
            .await
            .entries
            .get(id)
            .map(|entry| entry.status.borrow().clone())
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// Full record of a job.
    pub async fn record(&self, id: &str) -> Result<JobRecord, JobError> {
        self.jobs
            .read()
            .await
            .entries
            .get(id)
            .map(|entry| JobRecord {
                id: id.to_string(),
                request: entry.request.clone(),
                status: entry.status.borrow().clone(),
                submitted_at: entry.submitted_at,
            })
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// Waits until the job succeeds or fails.
    pub async fn wait_for(&self, id: &str, limit: Duration) -> Result<JobStatus, JobError> {
        let mut rx = self
            .jobs
            .read()
            .await
            .entries
            .get(id)
            .map(|entry| entry.status.subscribe())
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;

        let waited = tokio::time::timeout(limit, async {
            rx.wait_for(JobStatus::is_terminal).await.map(|s| (*s).clone())
        })
        .await;

        match waited {
            Ok(Ok(status)) => Ok(status),
            // Sender dropped: the job was evicted after finishing.
            Ok(Err(_)) => Err(JobError::NotFound(id.to_string())),
            Err(_) => Err(JobError::WaitTimeout(id.to_string())),
        }
    }

    /// Number of jobs currently tracked.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::ToolsConfig;
    use crate::orchestrator::{CacheConfig, ConversionConfig};
    use crate::storage::{StorageConfig, StorageLayout};
    use tempfile::TempDir;

    fn queue(dir: &TempDir) -> JobQueue {
        let storage = Arc::new(StorageLayout::new(StorageConfig::under(dir.path())));
        JobQueue::new(Arc::new(ConversionOrchestrator::new(
            ConversionConfig::default(),
            CacheConfig::default(),
            &ToolsConfig::default(),
            storage,
        )))
    }

    #[tokio::test]
    async fn test_successful_job() {
        let dir = TempDir::new().unwrap();
        let queue = queue(&dir);
        let input = dir.path().join("data.json");
        std::fs::write(&input, r#"{"a": 1}"#).unwrap();

        let id = queue
            .submit(ConversionRequest::new(&input, "text", "yaml"))
            .await;
        let status = queue.wait_for(&id, Duration::from_secs(10)).await.unwrap();

        match status {
            JobStatus::Success { output_path } => {
                assert!(std::fs::read_to_string(output_path).unwrap().contains("a: 1"));
            }
            other => panic!("unexpected status: {other:?}"),
        }
        assert_eq!(queue.record(&id).await.unwrap().request.target_format, "yaml");
    }

    #[tokio::test]
    async fn test_failed_job_keeps_message() {
        let dir = TempDir::new().unwrap();
        let queue = queue(&dir);

        let id = queue
            .submit(ConversionRequest::new("/x/a.txt", "hologram", "pdf"))
            .await;
        let status = queue.wait_for(&id, Duration::from_secs(10)).await.unwrap();

        assert_eq!(
            status,
            JobStatus::Failure {
                message: "Unknown category: hologram".to_string()
            }
        );
        assert_eq!(queue.status(&id).await.unwrap(), status);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            queue(&dir).status("nope").await,
            Err(JobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_finished_jobs_are_bounded() {
        let dir = TempDir::new().unwrap();
        let queue = queue(&dir).with_retained(2);

        for _ in 0..4 {
            let id = queue
                .submit(ConversionRequest::new("/x/a.txt", "hologram", "pdf"))
                .await;
            let _ = queue.wait_for(&id, Duration::from_secs(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(queue.len().await, 2);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_value(JobStatus::Failure {
            message: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(json["state"], "failure");
        assert_eq!(json["message"], "boom");
    }
}
