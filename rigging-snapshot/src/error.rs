//! Error types for rigging-snapshot.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from snapshot operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The resource could not be read, written, replaced or removed.
    #[error("resource unavailable at {path}: {source}")]
    ResourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience constructor for [`SnapshotError::ResourceUnavailable`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SnapshotError {
    SnapshotError::ResourceUnavailable {
        path: path.into(),
        source,
    }
}
