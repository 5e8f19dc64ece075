//! External tool availability detection.

use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

use super::config::ToolsConfig;
use super::tools::Tool;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Which external tools can be launched on this host.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolAvailability {
    pub tools: BTreeMap<Tool, bool>,
}

impl ToolAvailability {
    /// Probes every configured tool concurrently. A tool counts as
    /// available when its binary can be spawned, whatever its exit status.
    pub async fn detect(config: &ToolsConfig) -> Self {
        let probes = Tool::ALL.into_iter().map(|tool| async move {
            let spawned = Command::new(config.program(tool))
                .args(tool.probe_args())
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status();
            let available = matches!(timeout(PROBE_TIMEOUT, spawned).await, Ok(Ok(_)));
            (tool, available)
        });

        Self {
            tools: join_all(probes).await.into_iter().collect(),
        }
    }

    /// Whether a tool was found.
    pub fn is_available(&self, tool: Tool) -> bool {
        self.tools.get(&tool).copied().unwrap_or(false)
    }

    /// Tools that could not be launched.
    pub fn missing(&self) -> Vec<Tool> {
        self.tools
            .iter()
            .filter(|(_, available)| !**available)
            .map(|(tool, _)| *tool)
            .collect()
    }
}
