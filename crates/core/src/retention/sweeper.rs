//! Retention sweeper implementation.

use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::config::RetentionConfig;
use crate::metrics;

/// What one sweep removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub files_removed: usize,
    pub dirs_removed: usize,
    pub bytes_freed: u64,
    /// Entries that could not be inspected or removed.
    pub errors: usize,
}

impl SweepReport {
    fn merge(&mut self, other: SweepReport) {
        self.files_removed += other.files_removed;
        self.dirs_removed += other.dirs_removed;
        self.bytes_freed += other.bytes_freed;
        self.errors += other.errors;
    }
}

/// Deletes expired files under a set of roots, then the empty directories
/// this pass emptied or that have not been touched within the maximum age.
/// Roots themselves are never removed.
pub struct RetentionSweeper {
    config: RetentionConfig,
    roots: Vec<PathBuf>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RetentionSweeper {
    pub fn new(config: RetentionConfig, roots: Vec<PathBuf>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            roots,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// One pass with the configured maximum age.
    pub async fn sweep_once(&self) -> SweepReport {
        self.purge_older_than(self.config.max_age()).await
    }

    /// One pass deleting everything last modified more than `max_age` ago.
    pub async fn purge_older_than(&self, max_age: Duration) -> SweepReport {
        purge_roots(self.roots.clone(), max_age).await
    }

    /// Spawns the periodic sweep loop. Returns `None` if already running.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Retention sweeper already running");
            return None;
        }

        let running = Arc::clone(&self.running);
        let roots = self.roots.clone();
        let max_age = self.config.max_age();
        let period = self.config.interval().max(Duration::from_secs(1));
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!(
            interval_secs = period.as_secs(),
            max_age_hours = self.config.max_age_hours,
            "Starting retention sweeper"
        );

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Retention sweeper received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        purge_roots(roots.clone(), max_age).await;
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
        }))
    }

    /// Signals the loop to stop after the current pass.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(());
    }
}

async fn purge_roots(roots: Vec<PathBuf>, max_age: Duration) -> SweepReport {
    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let report = tokio::task::spawn_blocking(move || {
        let mut report = SweepReport::default();
        for root in &roots {
            report.merge(sweep_root(root, cutoff));
        }
        report
    })
    .await
    .unwrap_or_else(|e| {
        error!(error = %e, "Retention sweep task failed");
        SweepReport {
            errors: 1,
            ..SweepReport::default()
        }
    });

    metrics::SWEEPS_TOTAL.inc();
    metrics::SWEPT_ENTRIES
        .with_label_values(&["file"])
        .inc_by(report.files_removed as u64);
    metrics::SWEPT_ENTRIES
        .with_label_values(&["dir"])
        .inc_by(report.dirs_removed as u64);

    info!(
        files_removed = report.files_removed,
        dirs_removed = report.dirs_removed,
        bytes_freed = report.bytes_freed,
        errors = report.errors,
        "Retention sweep complete"
    );
    report
}

fn sweep_root(root: &Path, cutoff: SystemTime) -> SweepReport {
    let mut report = SweepReport::default();
    if !root.is_dir() {
        debug!(root = %root.display(), "Skipping missing storage root");
        return report;
    }

    let mut emptied: HashSet<PathBuf> = HashSet::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Failed to read entry during sweep");
                report.errors += 1;
                continue;
            }
        };
        if entry.file_type().is_dir() {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Failed to stat file");
                report.errors += 1;
                continue;
            }
        };
        let expired = metadata.modified().map(|m| m < cutoff).unwrap_or(false);
        if !expired {
            continue;
        }

        match fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!(path = %entry.path().display(), "Removed expired file");
                report.files_removed += 1;
                report.bytes_freed += metadata.len();
                mark_ancestors(&mut emptied, root, entry.path());
            }
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Failed to remove file");
                report.errors += 1;
            }
        }
    }

    // Children come before parents, so nested empty directories collapse
    // in a single pass. A recent empty directory that held none of the
    // removed files may be a staging dir of a running conversion.
    for entry in WalkDir::new(root).min_depth(1).contents_first(true) {
        let Ok(entry) = entry else {
            continue;
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        let is_empty = fs::read_dir(entry.path())
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if !is_empty {
            continue;
        }
        let stale = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .is_some_and(|m| m < cutoff);
        if !stale && !emptied.contains(entry.path()) {
            continue;
        }

        match fs::remove_dir(entry.path()) {
            Ok(()) => {
                report.dirs_removed += 1;
                mark_ancestors(&mut emptied, root, entry.path());
            }
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Failed to remove directory");
                report.errors += 1;
            }
        }
    }

    report
}

/// Records every directory between `path` and `root`, exclusive.
fn mark_ancestors(emptied: &mut HashSet<PathBuf>, root: &Path, path: &Path) {
    for ancestor in path.ancestors().skip(1) {
        if ancestor == root || !ancestor.starts_with(root) {
            break;
        }
        if !emptied.insert(ancestor.to_path_buf()) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_aged(path: &Path, age: Duration) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"data").unwrap();
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    fn sweeper(dir: &TempDir) -> RetentionSweeper {
        RetentionSweeper::new(
            RetentionConfig::default(),
            vec![dir.path().join("uploads"), dir.path().join("outputs")],
        )
    }

    #[tokio::test]
    async fn test_old_files_and_empty_dirs_removed() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("outputs/text/2024/01/02/old.txt");
        let fresh = dir.path().join("outputs/text/2024/01/03/fresh.txt");
        write_aged(&old, Duration::from_secs(48 * 3600));
        write_aged(&fresh, Duration::from_secs(60));

        let report = sweeper(&dir).sweep_once().await;

        assert_eq!(report.files_removed, 1);
        assert_eq!(report.bytes_freed, 4);
        assert!(!old.exists());
        assert!(fresh.exists());
        assert!(!dir.path().join("outputs/text/2024/01/02").exists());
        assert!(dir.path().join("outputs/text/2024/01/03").exists());
        assert_eq!(report.dirs_removed, 1);
    }

    #[tokio::test]
    async fn test_roots_are_never_removed() {
        let dir = TempDir::new().unwrap();
        write_aged(
            &dir.path().join("uploads/image/a.png"),
            Duration::from_secs(72 * 3600),
        );
        fs::create_dir_all(dir.path().join("outputs")).unwrap();

        let report = sweeper(&dir).sweep_once().await;

        assert_eq!(report.files_removed, 1);
        assert_eq!(report.dirs_removed, 1);
        assert!(dir.path().join("uploads").is_dir());
        assert!(dir.path().join("outputs").is_dir());
    }

    #[tokio::test]
    async fn test_fresh_empty_dirs_survive() {
        let dir = TempDir::new().unwrap();
        let staging = dir.path().join("scratch/request-abc");
        let abandoned = dir.path().join("scratch/chain-old");
        fs::create_dir_all(&staging).unwrap();
        fs::create_dir_all(&abandoned).unwrap();
        fs::File::open(&abandoned)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(48 * 3600))
            .unwrap();

        let sweeper = RetentionSweeper::new(
            RetentionConfig::default(),
            vec![dir.path().join("scratch")],
        );
        let report = sweeper.sweep_once().await;

        assert_eq!(report.dirs_removed, 1);
        assert!(staging.is_dir());
        assert!(!abandoned.exists());
    }

    #[tokio::test]
    async fn test_missing_roots_are_skipped() {
        let dir = TempDir::new().unwrap();
        let report = sweeper(&dir).sweep_once().await;
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn test_purge_older_than_custom_age() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("uploads/text/recent.txt");
        write_aged(&file, Duration::from_secs(600));

        let sweeper = sweeper(&dir);
        assert_eq!(sweeper.sweep_once().await.files_removed, 0);
        assert_eq!(
            sweeper
                .purge_older_than(Duration::from_secs(60))
                .await
                .files_removed,
            1
        );
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let dir = TempDir::new().unwrap();
        let sweeper = RetentionSweeper::new(
            RetentionConfig::default().with_interval(3600),
            vec![dir.path().to_path_buf()],
        );

        let handle = sweeper.start().unwrap();
        assert!(sweeper.is_running());
        assert!(sweeper.start().is_none());

        sweeper.stop();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!sweeper.is_running());
    }
}
