//! Testing utilities: fake backends and fixtures.
//!
//! Lets tests drive strategies and the orchestrator without any external
//! tool installed.
//!
//! # Example
//!
//! ```rust,ignore
//! use transmute_core::testing::FakeBackend;
//!
//! let slow = Arc::new(FakeBackend::succeeding("slow").with_delay(Duration::from_millis(50)));
//! let strategy = ConverterStrategy::for_category(Category::Audio, &ToolsConfig::default())
//!     .with_route("wav", "mp3", ExecutionPath::direct(vec![slow.clone()]));
//!
//! // ... run conversions ...
//! assert_eq!(slow.calls(), 1);
//! ```

mod fake_backend;

pub use fake_backend::{FakeBackend, FakeBehavior, RecordedJob};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use crate::convert::ToolsConfig;
    use crate::orchestrator::{CacheConfig, ConversionConfig, ConversionOrchestrator};
    use crate::storage::{StorageConfig, StorageLayout};

    /// Writes `contents` to `dir/name`, creating parent directories.
    pub fn write_file(dir: &Path, name: &str, contents: impl AsRef<[u8]>) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Orchestrator whose storage roots all live under `base`.
    pub fn orchestrator(base: &Path, config: ConversionConfig) -> ConversionOrchestrator {
        let storage = Arc::new(StorageLayout::new(StorageConfig::under(base)));
        ConversionOrchestrator::new(config, CacheConfig::default(), &ToolsConfig::default(), storage)
    }
}
