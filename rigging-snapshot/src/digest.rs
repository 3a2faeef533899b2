//! SHA-256 content digests used to skip no-op rewrites.

use std::io::ErrorKind;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{io_err, SnapshotError};

/// Hex-encoded SHA-256 of `bytes`.
pub fn of_bytes(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

/// Digest of the file at `path`, or `None` when it does not exist.
pub fn of_file(path: &Path) -> Result<Option<String>, SnapshotError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(of_bytes(&bytes))),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err(path, err)),
    }
}
