use std::path::PathBuf;
use std::time::Duration;

use rigging_core::DaemonName;
use thiserror::Error;

/// Error surface for daemon control and readiness checks.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown daemon: {0}")]
    UnknownDaemon(DaemonName),

    #[error("control command failed: `{command}` (status {status:?}): {stdout} {stderr}")]
    ControlCommandFailed {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("{target} not {expected} after {attempts} attempts ({waited:?}): {last_unmet}")]
    ReadinessTimeout {
        target: String,
        expected: &'static str,
        attempts: u32,
        waited: Duration,
        last_unmet: String,
    },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
