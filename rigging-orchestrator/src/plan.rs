//! Declarative description of one harness session.
//!
//! ```yaml
//! config_changes:
//!   - path: etc/ossec.conf
//!     content: "<ossec_config>…</ossec_config>"
//! local_options:
//!   wazuh_db.debug: "2"
//! entries:
//!   - daemon: wazuh-db
//!     order: interceptor_first
//!     interceptor:
//!       address: { family: local, protocol: stream, location: queue/db/wdb }
//!       forward_to: { family: local, protocol: stream, location: queue/db/wdb.real }
//! receivers:
//!   - address: { family: local, protocol: datagram, location: queue/sockets/queue }
//! topology: all_daemons
//! clear_databases: true
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use rigging_core::{ConfigError, DaemonName, HarnessConfig, SocketAddress};
use rigging_socket::{Framing, InterceptSpec};
use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetupPlan {
    #[serde(default)]
    pub config_changes: Vec<ConfigChange>,
    /// Internal option overrides merged into the local options file.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub local_options: BTreeMap<String, String>,
    #[serde(default)]
    pub entries: Vec<InterceptEntry>,
    /// Sockets test code writes to once the daemons are up.
    #[serde(default)]
    pub receivers: Vec<ReceiverSpec>,
    #[serde(default)]
    pub topology: Topology,
    /// Log teardown failures instead of returning them.
    #[serde(default)]
    pub ignore_errors: bool,
    #[serde(default)]
    pub clear_databases: bool,
    #[serde(default = "default_true")]
    pub truncate_logs: bool,
}

/// Full replacement of one configuration resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigChange {
    pub path: PathBuf,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptEntry {
    pub daemon: DaemonName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interceptor: Option<InterceptSpec>,
    #[serde(default)]
    pub order: StartOrder,
}

/// Which side of an entry comes up first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOrder {
    /// The listener must exist before the daemon connects to it.
    #[default]
    InterceptorFirst,
    /// The daemon must be up before the listener binds.
    DaemonFirst,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverSpec {
    pub address: SocketAddress,
    #[serde(default)]
    pub framing: Framing,
}

/// Whether the product returns to a fully running state after teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// Restart the whole product once the session is over.
    #[default]
    AllDaemons,
    /// Leave the product stopped.
    Isolated,
}

fn default_true() -> bool {
    true
}

impl Default for SetupPlan {
    fn default() -> Self {
        Self {
            config_changes: Vec::new(),
            local_options: BTreeMap::new(),
            entries: Vec::new(),
            receivers: Vec::new(),
            topology: Topology::default(),
            ignore_errors: false,
            clear_databases: false,
            truncate_logs: true,
        }
    }
}

impl SetupPlan {
    /// Structural checks, run once before any side effect.
    pub fn validate(&self) -> Result<(), HarnessError> {
        if !self.receivers.is_empty() && self.entries.is_empty() {
            return Err(HarnessError::ConfigurationMissing(
                "receivers declared but no daemon entries to start".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for entry in &self.entries {
            if !seen.insert(&entry.daemon) {
                return Err(ConfigError::Invalid(format!(
                    "daemon '{}' has more than one entry",
                    entry.daemon
                ))
                .into());
            }
        }
        for change in &self.config_changes {
            if change.path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid("config change with empty path".to_string()).into());
            }
        }
        Ok(())
    }

    /// Anchor relative resource and socket paths at the product root.
    pub fn resolve_paths(&mut self, config: &HarnessConfig) {
        for change in &mut self.config_changes {
            change.path = config.resolve(&change.path);
        }
        for entry in &mut self.entries {
            if let Some(spec) = entry.interceptor.as_mut() {
                spec.address = resolve_address(&spec.address, config);
                spec.forward_to = spec.forward_to.as_ref().map(|a| resolve_address(a, config));
            }
        }
        for receiver in &mut self.receivers {
            receiver.address = resolve_address(&receiver.address, config);
        }
    }
}

fn resolve_address(address: &SocketAddress, config: &HarnessConfig) -> SocketAddress {
    match address.path() {
        Some(path) => SocketAddress::local(config.resolve(path), address.protocol()),
        None => address.clone(),
    }
}

pub fn load_plan(path: &Path) -> Result<SetupPlan, HarnessError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let plan: SetupPlan = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    plan.validate()?;
    Ok(plan)
}
