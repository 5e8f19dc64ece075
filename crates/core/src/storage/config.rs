//! Storage configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where uploads, outputs and scratch files live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root for stored uploads, served under `/uploads/`.
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,

    /// Root for conversion outputs, served under `/outputs/`.
    #[serde(default = "default_outputs_dir")]
    pub outputs_dir: PathBuf,

    /// Backends' working directories. Swept like the other roots so
    /// leftovers from crashed runs go away.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("data/uploads")
}

fn default_outputs_dir() -> PathBuf {
    PathBuf::from("data/outputs")
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("data/scratch")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            uploads_dir: default_uploads_dir(),
            outputs_dir: default_outputs_dir(),
            scratch_dir: default_scratch_dir(),
        }
    }
}

impl StorageConfig {
    /// All three roots under one base directory.
    pub fn under(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self {
            uploads_dir: base.join("uploads"),
            outputs_dir: base.join("outputs"),
            scratch_dir: base.join("scratch"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StorageConfig::default();
        assert_eq!(config.uploads_dir, PathBuf::from("data/uploads"));
        assert_eq!(config.outputs_dir, PathBuf::from("data/outputs"));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: StorageConfig = toml::from_str(r#"outputs_dir = "/srv/out""#).unwrap();
        assert_eq!(config.outputs_dir, PathBuf::from("/srv/out"));
        assert_eq!(config.uploads_dir, PathBuf::from("data/uploads"));
    }

    #[test]
    fn test_under() {
        let config = StorageConfig::under("/srv/transmute");
        assert_eq!(config.scratch_dir, PathBuf::from("/srv/transmute/scratch"));
    }
}
