//! Concurrency gate capping the number of conversions executing at once.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// The gate was closed and admits no more conversions.
#[derive(Debug, Error)]
#[error("concurrency gate closed")]
pub struct GateClosed;

#[derive(Debug, Default)]
struct GateStats {
    in_flight: AtomicU64,
    waiting: AtomicU64,
    total_acquired: AtomicU64,
}

/// Snapshot of the gate for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateStatus {
    pub max_concurrent: usize,
    pub available: usize,
    pub in_flight: usize,
    pub waiting: usize,
    pub total_acquired: u64,
}

/// Counting permit pool shared by every conversion.
///
/// A permit is held for the whole execution of a conversion. It is released
/// when the returned [`GatePermit`] is dropped, which covers success, error,
/// timeout and cancellation of the owning future alike.
#[derive(Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    stats: Arc<GateStats>,
    max_concurrent: usize,
}

/// Guard for one gate slot.
#[derive(Debug)]
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    stats: Arc<GateStats>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

struct WaitingGuard<'a>(&'a GateStats);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.waiting.fetch_sub(1, Ordering::Relaxed);
    }
}

impl ConcurrencyGate {
    /// Creates a gate with `max_concurrent` slots (at least one).
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            stats: Arc::new(GateStats::default()),
            max_concurrent,
        }
    }

    /// Waits for a free slot. Fails once the gate is closed.
    pub async fn acquire(&self) -> Result<GatePermit, GateClosed> {
        self.stats.waiting.fetch_add(1, Ordering::Relaxed);
        let waiting = WaitingGuard(&self.stats);

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GateClosed)?;
        drop(waiting);

        self.stats.in_flight.fetch_add(1, Ordering::Relaxed);
        self.stats.total_acquired.fetch_add(1, Ordering::Relaxed);
        Ok(GatePermit {
            _permit: permit,
            stats: self.stats.clone(),
        })
    }

    /// Stops admitting conversions. Waiters and later callers get
    /// [`GateClosed`]; running conversions keep their slots.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// Takes a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<GatePermit> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        self.stats.in_flight.fetch_add(1, Ordering::Relaxed);
        self.stats.total_acquired.fetch_add(1, Ordering::Relaxed);
        Some(GatePermit {
            _permit: permit,
            stats: self.stats.clone(),
        })
    }

    /// Free slots.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Conversions currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.stats.in_flight.load(Ordering::Relaxed) as usize
    }

    /// Configured number of slots.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Snapshot for status endpoints and the CLI.
    pub fn status(&self) -> GateStatus {
        GateStatus {
            max_concurrent: self.max_concurrent,
            available: self.available(),
            in_flight: self.in_flight(),
            waiting: self.stats.waiting.load(Ordering::Relaxed) as usize,
            total_acquired: self.stats.total_acquired.load(Ordering::Relaxed),
        }
    }
}
