use rigging_core::ConfigError;
use rigging_daemon::DaemonError;
use rigging_snapshot::SnapshotError;
use rigging_socket::SocketError;
use thiserror::Error;

/// Everything setup or teardown of a harness session can fail with.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error(transparent)]
    Daemon(#[from] DaemonError),

    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("teardown finished with {} failure(s): {}", failures.len(), failures.join("; "))]
    Teardown { failures: Vec<String> },
}
