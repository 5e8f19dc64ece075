//! Bounded conversion cache keyed by content fingerprint.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::metrics;

/// A cached conversion result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub output_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// Insertion order, oldest first.
    order: VecDeque<String>,
}

impl CacheState {
    fn forget(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(entry)
    }
}

/// FIFO-bounded map from fingerprint to output path.
///
/// Entries whose file disappeared are purged on lookup and reported as a
/// miss. A capacity of zero disables caching.
#[derive(Debug)]
pub struct ConversionCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

impl ConversionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Path for `key`, if cached and still on disk.
    pub async fn get(&self, key: &str) -> Option<PathBuf> {
        let mut state = self.state.lock().await;
        let Some(path) = state.entries.get(key).map(|e| e.output_path.clone()) else {
            metrics::CACHE_LOOKUPS.with_label_values(&["miss"]).inc();
            return None;
        };

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            metrics::CACHE_LOOKUPS.with_label_values(&["hit"]).inc();
            return Some(path);
        }

        warn!(
            fingerprint = %key,
            path = %path.display(),
            "Cached output vanished, dropping entry"
        );
        state.forget(key);
        metrics::CACHE_LOOKUPS.with_label_values(&["stale"]).inc();
        None
    }

    /// Stores `path` under `key`, replacing any previous entry and evicting
    /// the oldest entries beyond capacity.
    pub async fn put(&self, key: &str, path: &Path) {
        if self.capacity == 0 {
            return;
        }

        let mut state = self.state.lock().await;
        state.forget(key);
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                fingerprint: key.to_string(),
                output_path: path.to_path_buf(),
                created_at: Utc::now(),
            },
        );
        state.order.push_back(key.to_string());

        while state.order.len() > self.capacity {
            if let Some(oldest) = state.order.pop_front() {
                debug!(fingerprint = %oldest, "Evicting cache entry");
                state.entries.remove(&oldest);
            }
        }
    }

    /// Drops `key`, returning the entry that was removed.
    pub async fn remove(&self, key: &str) -> Option<CacheEntry> {
        self.state.lock().await.forget(key)
    }

    /// Entry for `key` without checking the filesystem.
    pub async fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.state.lock().await.entries.get(key).cloned()
    }

    /// Drops every entry pointing at one of `paths`.
    pub async fn forget_paths(&self, paths: &[PathBuf]) -> usize {
        let mut state = self.state.lock().await;
        let keys: Vec<String> = state
            .entries
            .values()
            .filter(|e| paths.contains(&e.output_path))
            .map(|e| e.fingerprint.clone())
            .collect();
        for key in &keys {
            state.forget(key);
        }
        keys.len()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
