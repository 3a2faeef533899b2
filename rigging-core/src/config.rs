//! Harness configuration file.
//!
//! # Storage layout
//!
//! ```text
//! ~/.rigging/
//!   harness.yaml   (product layout, control command, daemons, probes)
//! ```
//!
//! # API pattern
//!
//! Every function touching the default location has two forms:
//! - `fn_at(path: &Path, …)`: explicit file; used in tests with `TempDir`
//! - `fn(…)`: derives the path from `dirs::home_dir()`, delegates to `_at`
//!
//! Relative paths inside the file are resolved against `root`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::selection::HostType;
use crate::types::DaemonName;

pub const CONFIG_FILE_NAME: &str = "harness.yaml";

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Root of the harness YAML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Product service name, e.g. `wazuh-manager` or `wazuh-agent`.
    #[serde(default = "default_service")]
    pub service: String,
    /// Installation root; relative paths below are joined onto it.
    pub root: PathBuf,
    pub control: ControlConfig,
    #[serde(default)]
    pub daemons: Vec<DaemonSpec>,
    /// Directory holding `<daemon>-<pid>.pid` files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid_dir: Option<PathBuf>,
    #[serde(default)]
    pub poll: PollSettings,
    /// Main product configuration file (replaced wholesale per test).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    /// Flat `key=value` internal options file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_options_file: Option<PathBuf>,
    /// Log files truncated before and after a session.
    #[serde(default)]
    pub monitored_logs: Vec<PathBuf>,
    /// Directories whose `*.db` files are cleared on teardown.
    #[serde(default)]
    pub database_dirs: Vec<PathBuf>,
}

/// Product control surface: `<command> <action> [daemon] [debug_args…]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlConfig {
    pub command: PathBuf,
    #[serde(default)]
    pub debug_args: Vec<String>,
}

/// A daemon known to the harness together with its readiness probes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonSpec {
    pub name: DaemonName,
    #[serde(default)]
    pub probes: Vec<ProbeSpec>,
}

/// Declarative readiness probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeSpec {
    /// The log file contains `pattern` after the last start.
    LogContains { path: PathBuf, pattern: String },
    /// A socket node the daemon owns exists.
    SocketExists { path: PathBuf },
    /// A live process is recorded in `<pid_dir>/<prefix>-<pid>.pid`.
    PidFile {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
    },
}

/// Readiness polling budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    pub retries: u32,
    pub delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt (1 = fixed).
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            retries: 20,
            delay_ms: 500,
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_service() -> String {
    "wazuh-manager".to_string()
}

fn default_backoff_factor() -> u32 {
    1
}

fn default_max_delay_ms() -> u64 {
    5_000
}

// ---------------------------------------------------------------------------
// Accessors
// ---------------------------------------------------------------------------

impl HarnessConfig {
    /// Join a possibly-relative path onto `root`.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn daemon(&self, name: &DaemonName) -> Option<&DaemonSpec> {
        self.daemons.iter().find(|d| &d.name == name)
    }

    pub fn daemon_names(&self) -> Vec<DaemonName> {
        self.daemons.iter().map(|d| d.name.clone()).collect()
    }

    /// Host role derived from the service name.
    pub fn host_type(&self) -> HostType {
        if self.service.contains("agent") {
            HostType::Agent
        } else {
            HostType::Server
        }
    }

    pub fn control_command(&self) -> PathBuf {
        self.resolve(&self.control.command)
    }

    pub fn pid_dir(&self) -> PathBuf {
        match &self.pid_dir {
            Some(dir) => self.resolve(dir),
            None => self.root.join("var").join("run"),
        }
    }

    /// Structural checks, run once at load.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.control.command.as_os_str().is_empty() {
            return Err(ConfigError::ConfigurationMissing(
                "control.command is empty".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for daemon in &self.daemons {
            if daemon.name.0.trim().is_empty() {
                return Err(ConfigError::Invalid("daemon with empty name".to_string()));
            }
            if !seen.insert(&daemon.name) {
                return Err(ConfigError::Invalid(format!(
                    "daemon '{}' declared twice",
                    daemon.name
                )));
            }
        }
        if self.poll.retries == 0 {
            return Err(ConfigError::Invalid("poll.retries must be >= 1".to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// `<home>/.rigging/harness.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".rigging").join(CONFIG_FILE_NAME)
}

/// Default config location (convenience: uses `dirs::home_dir()`).
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(config_path_at(&home()?))
}

/// Load and validate a harness configuration file.
pub fn load_at(path: &Path) -> Result<HarnessConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::ConfigurationMissing(format!(
            "harness configuration not found at {}",
            path.display()
        )));
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let config: HarnessConfig =
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    config.validate()?;
    Ok(config)
}

/// Save a configuration atomically (`<path>.tmp` then rename).
pub fn save_at(path: &Path, config: &HarnessConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let yaml = serde_yaml::to_string(config)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
