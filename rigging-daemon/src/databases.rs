//! Auxiliary databases the daemons leave behind between sessions.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{io_err, DaemonError};

const SIDECAR_SUFFIXES: [&str; 2] = ["-wal", "-shm"];

/// Remove every `*.db` file (and its `-wal`/`-shm` sidecars) in `dirs`.
///
/// Missing directories are skipped. Returns the removed paths.
pub fn clear_databases(dirs: &[PathBuf]) -> Result<Vec<PathBuf>, DaemonError> {
    let mut removed = Vec::new();
    for dir in dirs {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(io_err(dir, err)),
        };
        let mut databases: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "db"))
            .collect();
        databases.sort();

        for db in databases {
            remove_if_present(&db, &mut removed)?;
            for suffix in SIDECAR_SUFFIXES {
                let mut sidecar = db.clone().into_os_string();
                sidecar.push(suffix);
                remove_if_present(Path::new(&sidecar), &mut removed)?;
            }
        }
    }
    if !removed.is_empty() {
        tracing::info!(count = removed.len(), "databases cleared");
    }
    Ok(removed)
}

fn remove_if_present(path: &Path, removed: &mut Vec<PathBuf>) -> Result<(), DaemonError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            removed.push(path.to_path_buf());
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(path, err)),
    }
}
