use serde::{Deserialize, Serialize};

pub use crate::convert::ToolsConfig;
pub use crate::orchestrator::{CacheConfig, ConversionConfig};
pub use crate::retention::RetentionConfig;
pub use crate::storage::StorageConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub conversion: ConversionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}
