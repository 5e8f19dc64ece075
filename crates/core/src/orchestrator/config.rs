//! Orchestrator configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::fingerprint::DEFAULT_PREFIX_BYTES;

/// Limits applied to every conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Conversions allowed to execute at once. Further requests wait.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_conversions: usize,

    /// Hard deadline for one conversion, in seconds. Subprocesses still
    /// running when it expires are killed.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Threads available to in-process backends. Defaults to the number of
    /// CPU cores.
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Bytes of the source hashed for cache keys and upload dedup.
    #[serde(default = "default_prefix_bytes")]
    pub fingerprint_prefix_bytes: usize,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_timeout() -> u64 {
    600
}

fn default_prefix_bytes() -> usize {
    DEFAULT_PREFIX_BYTES
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_conversions: default_max_concurrent(),
            timeout_secs: default_timeout(),
            worker_threads: None,
            fingerprint_prefix_bytes: default_prefix_bytes(),
        }
    }
}

impl ConversionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_conversions = max;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }
}

/// Conversion cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entries kept before the oldest is evicted. 0 disables the cache.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_max_entries() -> usize {
    128
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConversionConfig::default();
        assert_eq!(config.max_concurrent_conversions, 4);
        assert_eq!(config.timeout(), Duration::from_secs(600));
        assert!(config.worker_threads.is_none());
        assert_eq!(config.fingerprint_prefix_bytes, 1024 * 1024);
        assert_eq!(CacheConfig::default().max_entries, 128);
    }

    #[test]
    fn test_deserialize_minimal() {
        let toml = r#"
            max_concurrent_conversions = 2
            worker_threads = 3
        "#;
        let config: ConversionConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.max_concurrent_conversions, 2);
        assert_eq!(config.worker_threads, Some(3));
        assert_eq!(config.timeout_secs, 600);
    }

    #[test]
    fn test_builders() {
        let config = ConversionConfig::default()
            .with_max_concurrent(1)
            .with_timeout(5)
            .with_worker_threads(2);
        assert_eq!(config.max_concurrent_conversions, 1);
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.worker_threads, Some(2));
    }
}
