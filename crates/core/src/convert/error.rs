//! Error types for the convert module.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::storage::StorageError;

/// Which side of a conversion a format was rejected on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatDirection {
    Input,
    Output,
}

impl fmt::Display for FormatDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// One failed backend attempt inside a fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendFailure {
    pub backend: String,
    pub reason: String,
    /// The backend could not run at all (tool missing).
    pub unavailable: bool,
}

fn describe_attempts(attempts: &[BackendFailure]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.backend, a.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors surfaced by conversion requests.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// Category name is not registered.
    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    /// Input or target format is not supported by the category.
    #[error("Unsupported {direction} format: {format}")]
    UnsupportedFormat {
        format: String,
        direction: FormatDirection,
    },

    /// Source already has the requested format.
    #[error("Source is already in {format} format")]
    IdenticalFormat { format: String },

    /// Both formats are supported but no route connects them.
    #[error("No conversion route from {from} to {to}")]
    UnsupportedConversionPair { from: String, to: String },

    /// Every backend able to serve the route is missing.
    #[error("No backend available ({}): {reason}", backends.join(", "))]
    BackendUnavailable {
        backends: Vec<String>,
        reason: String,
    },

    /// Every backend in the chain failed.
    #[error("Conversion {from} -> {to} failed: {}", describe_attempts(attempts))]
    ConversionFailed {
        from: String,
        to: String,
        attempts: Vec<BackendFailure>,
    },

    /// Hard conversion deadline exceeded.
    #[error("Conversion timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// The orchestrator stopped admitting conversions.
    #[error("Conversion service is shutting down")]
    ShuttingDown,

    /// Source file could not be read.
    #[error("Source file not found: {path}")]
    SourceNotFound { path: PathBuf },

    /// Placing or reading stored files failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error during conversion.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConvertError {
    /// Creates an unsupported input format error.
    pub fn unsupported_input(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
            direction: FormatDirection::Input,
        }
    }

    /// Creates an unsupported output format error.
    pub fn unsupported_output(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
            direction: FormatDirection::Output,
        }
    }

    /// Creates an unsupported conversion pair error.
    pub fn unsupported_pair(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::UnsupportedConversionPair {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Whether the request itself was invalid. These are terminal and
    /// never reach a backend.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::UnknownCategory(_)
                | Self::UnsupportedFormat { .. }
                | Self::IdenticalFormat { .. }
                | Self::UnsupportedConversionPair { .. }
        )
    }

    /// Whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Io(_))
    }

    /// Short label used in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownCategory(_) => "unknown_category",
            Self::UnsupportedFormat { .. } => "unsupported_format",
            Self::IdenticalFormat { .. } => "identical_format",
            Self::UnsupportedConversionPair { .. } => "unsupported_pair",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::ConversionFailed { .. } => "conversion_failed",
            Self::Timeout { .. } => "timeout",
            Self::ShuttingDown => "shutting_down",
            Self::SourceNotFound { .. } => "source_not_found",
            Self::Storage(_) => "storage",
            Self::Io(_) => "io",
        }
    }
}

/// Errors raised by a single backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend cannot run here (binary missing, feature absent).
    #[error("{tool} not available at {path}")]
    Unavailable { tool: String, path: PathBuf },

    /// The backend ran and failed.
    #[error("{reason}")]
    Failed {
        reason: String,
        stderr: Option<String>,
    },

    /// The backend exceeded its process deadline and was killed.
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// I/O error while preparing or collecting the backend's files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    /// Creates a failed error without captured stderr.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            stderr: None,
        }
    }

    /// Creates a failed error with captured stderr.
    pub fn failed_with_stderr(reason: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            stderr: Some(stderr.into()),
        }
    }

    /// Whether the backend could not run at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Reason recorded in a chain's attempt list.
    pub fn describe(&self) -> String {
        match self {
            Self::Failed {
                reason,
                stderr: Some(stderr),
            } if !stderr.trim().is_empty() => format!("{} ({})", reason, stderr.trim()),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_failed_lists_attempts() {
        let err = ConvertError::ConversionFailed {
            from: "wav".into(),
            to: "mp3".into(),
            attempts: vec![
                BackendFailure {
                    backend: "ffmpeg-preset".into(),
                    reason: "exit status 1".into(),
                    unavailable: false,
                },
                BackendFailure {
                    backend: "ffmpeg".into(),
                    reason: "exit status 1".into(),
                    unavailable: false,
                },
            ],
        };
        let message = err.to_string();
        assert!(message.contains("wav -> mp3"));
        assert!(message.contains("ffmpeg-preset: exit status 1"));
        assert!(message.contains("ffmpeg: exit status 1"));
    }

    #[test]
    fn test_validation_errors() {
        assert!(ConvertError::UnknownCategory("x".into()).is_validation());
        assert!(ConvertError::unsupported_pair("a", "b").is_validation());
        assert!(!ConvertError::Timeout { timeout_secs: 1 }.is_validation());
    }

    #[test]
    fn test_retryable() {
        assert!(ConvertError::Timeout { timeout_secs: 5 }.is_retryable());
        assert!(!ConvertError::IdenticalFormat {
            format: "png".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_backend_error_describe_includes_stderr() {
        let err = BackendError::failed_with_stderr("exit status 1", "bad input\n");
        assert_eq!(err.describe(), "exit status 1 (bad input)");
        assert_eq!(BackendError::failed("boom").describe(), "boom");
    }
}
