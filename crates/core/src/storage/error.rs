use std::path::PathBuf;
use thiserror::Error;

/// Failures while persisting uploads or placing conversion outputs.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Source file not found: {path}")]
    SourceNotFound { path: PathBuf },

    /// A `<category>/[user]/yyyy/mm/dd` partition could not be created.
    #[error("Cannot create storage partition {path}: {source}")]
    DirectoryCreationFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot copy {from} into storage at {to}: {cause}")]
    CopyFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        cause: std::io::Error,
    },

    #[error("Cannot move {from} into storage at {to}: {cause}")]
    MoveFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        cause: std::io::Error,
    },

    /// Deletion was asked for a path no storage root contains.
    #[error("Refusing to touch {path}: not inside a storage root")]
    OutsideRoots { path: PathBuf },

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn copy_failed(from: PathBuf, to: PathBuf, cause: std::io::Error) -> Self {
        Self::CopyFailed { from, to, cause }
    }

    pub fn move_failed(from: PathBuf, to: PathBuf, cause: std::io::Error) -> Self {
        Self::MoveFailed { from, to, cause }
    }

    /// Transient filesystem failures; a missing source or a rejected path
    /// will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::SourceNotFound { .. } | Self::OutsideRoots { .. })
    }
}
