//! Monitored product log files.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};

use crate::error::{io_err, DaemonError};

/// Empty every monitored log that exists; missing files are skipped.
///
/// Returns the paths actually truncated.
pub fn truncate_monitored_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>, DaemonError> {
    let mut truncated = Vec::new();
    for path in paths {
        match OpenOptions::new().write(true).truncate(true).open(path) {
            Ok(_) => {
                tracing::debug!(path = %path.display(), "monitored log truncated");
                truncated.push(path.clone());
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(io_err(path, err)),
        }
    }
    Ok(truncated)
}

/// Last `lines` lines of a file; `None` when it does not exist.
pub fn tail(path: &Path, lines: usize) -> Result<Option<Vec<String>>, DaemonError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(path, err)),
    };
    let reader = BufReader::new(file);

    if lines == 0 {
        return Ok(Some(Vec::new()));
    }
    let mut tail = VecDeque::<String>::with_capacity(lines);
    for line in reader.lines() {
        let line = line.map_err(|e| io_err(path, e))?;
        if tail.len() == lines {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Ok(Some(tail.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn truncate_empties_existing_and_skips_missing() {
        let dir = TempDir::new().unwrap();
        let present = dir.path().join("ossec.log");
        let missing = dir.path().join("alerts.log");
        std::fs::write(&present, "old run\n").unwrap();

        let truncated = truncate_monitored_files(&[present.clone(), missing.clone()]).unwrap();
        assert_eq!(truncated, vec![present.clone()]);
        assert_eq!(std::fs::metadata(&present).unwrap().len(), 0);
        assert!(!missing.exists());
    }

    #[test]
    fn tail_keeps_only_the_last_lines() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("ossec.log");
        std::fs::write(&log, "1\n2\n3\n4\n").unwrap();
        assert_eq!(tail(&log, 2).unwrap(), Some(vec!["3".to_string(), "4".to_string()]));
        assert_eq!(tail(&log, 10).unwrap().map(|l| l.len()), Some(4));
        assert_eq!(tail(&dir.path().join("none"), 5).unwrap(), None);
    }
}
