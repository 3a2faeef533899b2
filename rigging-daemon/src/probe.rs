//! Readiness probes evaluated against the filesystem.
//!
//! Every evaluation returns `None` when the expected condition holds and a
//! human-readable description of the missing piece otherwise.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use rigging_core::{DaemonName, HarnessConfig, ProbeSpec, SocketAddress};

/// Which side of the lifecycle a check is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    Up,
    Down,
}

impl Expect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Expect::Up => "running",
            Expect::Down => "stopped",
        }
    }
}

/// Log read positions recorded at the daemon's last start.
pub type Watermarks = HashMap<PathBuf, u64>;

pub fn evaluate(
    probe: &ProbeSpec,
    daemon: &DaemonName,
    config: &HarnessConfig,
    watermarks: Option<&Watermarks>,
    expect: Expect,
) -> Option<String> {
    match (probe, expect) {
        (ProbeSpec::LogContains { path, pattern }, Expect::Up) => {
            let path = config.resolve(path);
            let from = watermarks.and_then(|w| w.get(&path)).copied().unwrap_or(0);
            match log_contains(&path, pattern, from) {
                Ok(true) => None,
                Ok(false) => Some(format!("'{pattern}' not yet logged in {}", path.display())),
                Err(err) => Some(format!("cannot read {}: {err}", path.display())),
            }
        }
        (ProbeSpec::LogContains { .. }, Expect::Down) => None,
        (ProbeSpec::SocketExists { path }, expect) => {
            let path = config.resolve(path);
            socket_condition(&path, expect)
        }
        (ProbeSpec::PidFile { prefix }, expect) => {
            let prefix = prefix.as_deref().unwrap_or(daemon.as_str());
            pid_condition(&config.pid_dir(), prefix, expect)
        }
    }
}

/// Extra socket nodes; network addresses carry no node and always pass.
pub fn extra_socket_condition(address: &SocketAddress, expect: Expect) -> Option<String> {
    address.path().and_then(|path| socket_condition(path, expect))
}

fn socket_condition(path: &Path, expect: Expect) -> Option<String> {
    let exists = std::fs::symlink_metadata(path).is_ok();
    match (expect, exists) {
        (Expect::Up, false) => Some(format!("socket {} missing", path.display())),
        (Expect::Down, true) => Some(format!("socket {} still present", path.display())),
        _ => None,
    }
}

pub(crate) fn pid_condition(pid_dir: &Path, prefix: &str, expect: Expect) -> Option<String> {
    let alive: Vec<u32> = pid_files(pid_dir, prefix)
        .into_iter()
        .filter(|pid| pid_alive(*pid))
        .collect();
    match (expect, alive.is_empty()) {
        (Expect::Up, true) => Some(format!(
            "no live process recorded as {prefix}-<pid>.pid in {}",
            pid_dir.display()
        )),
        (Expect::Down, false) => Some(format!("{prefix} still running (pids {alive:?})")),
        _ => None,
    }
}

/// Pids recorded in `<dir>/<prefix>-<pid>.pid` names.
pub fn pid_files(dir: &Path, prefix: &str) -> Vec<u32> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut pids: Vec<u32> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_str()?;
            let pid = name.strip_prefix(prefix)?.strip_prefix('-')?.strip_suffix(".pid")?;
            pid.parse().ok()
        })
        .collect();
    pids.sort_unstable();
    pids
}

pub fn pid_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

/// Current length of a log file; 0 when it does not exist yet.
pub fn log_offset(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Whether `pattern` appears in the file after byte `from`.
///
/// A file shorter than `from` was truncated or rotated and is scanned whole.
pub fn log_contains(path: &Path, pattern: &str, from: u64) -> std::io::Result<bool> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let start = if from > len { 0 } else { from };
    file.seek(SeekFrom::Start(start))?;
    let mut tail = Vec::new();
    file.read_to_end(&mut tail)?;
    Ok(String::from_utf8_lossy(&tail).contains(pattern))
}
