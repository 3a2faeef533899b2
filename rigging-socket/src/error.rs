use std::time::Duration;

use thiserror::Error;

/// Error surface for socket controllers, listeners and queues.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("connection error on {address}: {source}")]
    Connection {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("address already bound by a live endpoint: {address}")]
    BindConflict { address: String },

    #[error("timed out after {waited:?} waiting on {address}")]
    Timeout { address: String, waited: Duration },

    #[error("queue closed: {0}")]
    QueueClosed(String),

    #[error("socket protocol error: {0}")]
    Protocol(String),

    #[error("not connected: {0}")]
    NotConnected(String),

    #[error("I/O error on {address}: {source}")]
    Io {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

pub(crate) fn io_err(address: impl ToString, source: std::io::Error) -> SocketError {
    SocketError::Io {
        address: address.to_string(),
        source,
    }
}

pub(crate) fn connection_err(address: impl ToString, source: std::io::Error) -> SocketError {
    SocketError::Connection {
        address: address.to_string(),
        source,
    }
}
