//! Types for the conversion orchestrator.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::convert::ConvertError;
use crate::gate::GateStatus;

/// One conversion request. The source file must already be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRequest {
    pub source_path: PathBuf,
    /// Input format; derived from the source extension when absent.
    #[serde(default)]
    pub source_format: Option<String>,
    pub target_format: String,
    /// Category name, validated by the orchestrator.
    pub category: String,
    /// Name the output should be derived from instead of the source's.
    #[serde(default)]
    pub requested_output_name: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl ConversionRequest {
    pub fn new(
        source_path: impl Into<PathBuf>,
        category: impl Into<String>,
        target_format: impl Into<String>,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            source_format: None,
            target_format: target_format.into(),
            category: category.into(),
            requested_output_name: None,
            user_id: None,
        }
    }

    pub fn with_source_format(mut self, format: impl Into<String>) -> Self {
        self.source_format = Some(format.into());
        self
    }

    pub fn with_output_name(mut self, name: impl Into<String>) -> Self {
        self.requested_output_name = Some(name.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Name the output path is derived from.
    pub fn output_name(&self) -> String {
        self.requested_output_name.clone().unwrap_or_else(|| {
            self.source_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
    }
}

/// Result of a conversion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionOutcome {
    pub output_path: Option<PathBuf>,
    pub success: bool,
    pub error_detail: Option<String>,
    pub cache_hit: bool,
    pub duration_ms: u64,
    /// Cache key of the request, when it got that far.
    pub fingerprint: Option<String>,
}

impl ConversionOutcome {
    pub(crate) fn converted(output_path: PathBuf, fingerprint: String, duration_ms: u64) -> Self {
        Self {
            output_path: Some(output_path),
            success: true,
            error_detail: None,
            cache_hit: false,
            duration_ms,
            fingerprint: Some(fingerprint),
        }
    }

    pub(crate) fn cached(output_path: PathBuf, fingerprint: String, duration_ms: u64) -> Self {
        Self {
            cache_hit: true,
            ..Self::converted(output_path, fingerprint, duration_ms)
        }
    }

    /// Outcome describing a failed request.
    pub fn failed(error: &ConvertError, duration_ms: u64) -> Self {
        Self {
            output_path: None,
            success: false,
            error_detail: Some(error.to_string()),
            cache_hit: false,
            duration_ms,
            fingerprint: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrchestratorStatus {
    pub gate: GateStatus,
    pub cache_entries: usize,
    pub cache_capacity: usize,
    pub worker_threads: usize,
    pub shutting_down: bool,
}

impl OrchestratorStatus {
    pub fn in_flight(&self) -> usize {
        self.gate.in_flight
    }

    pub fn available_permits(&self) -> usize {
        self.gate.available
    }
}
