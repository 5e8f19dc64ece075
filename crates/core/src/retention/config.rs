//! Retention configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How often the sweeper runs and what it considers expired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Run the periodic sweeper at all. One-off sweeps work regardless.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Seconds between sweeps.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Files older than this many hours are deleted.
    #[serde(default = "default_max_age")]
    pub max_age_hours: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_interval() -> u64 {
    3600
}

fn default_max_age() -> u64 {
    24
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_secs: default_interval(),
            max_age_hours: default_max_age(),
        }
    }
}

impl RetentionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_hours * 3600)
    }

    pub fn with_interval(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }

    pub fn with_max_age_hours(mut self, hours: u64) -> Self {
        self.max_age_hours = hours;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RetentionConfig::default();
        assert!(config.enabled);
        assert_eq!(config.interval(), Duration::from_secs(3600));
        assert_eq!(config.max_age(), Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_deserialize_minimal() {
        let config: RetentionConfig = toml::from_str("max_age_hours = 2").unwrap();
        assert_eq!(config.max_age_hours, 2);
        assert_eq!(config.interval_secs, 3600);
    }
}
