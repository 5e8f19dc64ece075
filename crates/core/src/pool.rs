//! Bounded worker pool for CPU-bound native backends.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::convert::BackendError;

/// Runs blocking closures on tokio's blocking threads, at most `size` at a
/// time.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Creates a pool of `size` workers (at least one).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Creates a pool sized to the available CPU cores.
    pub fn with_available_parallelism() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(cores)
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Idle workers.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Runs `job` on a worker and waits for its result.
    pub async fn run<F, T>(&self, job: F) -> Result<T, BackendError>
    where
        F: FnOnce() -> Result<T, BackendError> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BackendError::failed("worker pool closed"))?;

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        });

        match handle.await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Worker task did not complete");
                Err(BackendError::failed(format!("worker task failed: {}", e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_returns_value() {
        let pool = WorkerPool::new(2);
        let value = pool.run(|| Ok(21 * 2)).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_run_propagates_error() {
        let pool = WorkerPool::new(1);
        let result: Result<(), _> = pool.run(|| Err(BackendError::failed("nope"))).await;
        assert!(matches!(result, Err(BackendError::Failed { .. })));
    }

    #[tokio::test]
    async fn test_panic_is_reported() {
        let pool = WorkerPool::new(1);
        let result: Result<(), _> = pool.run(|| panic!("worker exploded")).await;
        assert!(result.is_err());
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_never_exceeds_size() {
        let pool = WorkerPool::new(2);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            let current = current.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                pool.run(move || {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(30));
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
