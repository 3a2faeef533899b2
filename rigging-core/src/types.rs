//! Domain types shared by every rigging crate.
//!
//! Socket addresses are immutable once constructed; all filesystem
//! locations use `PathBuf`/`Path` accessors rather than raw strings.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed name for a product daemon (e.g. `wazuh-analysisd`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DaemonName(pub String);

impl fmt::Display for DaemonName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for DaemonName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DaemonName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl DaemonName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Socket addresses
// ---------------------------------------------------------------------------

/// Address family of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    /// Unix domain socket backed by a filesystem node.
    Local,
    /// TCP/UDP over IP.
    Network,
}

/// Transport protocol of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Stream,
    Datagram,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Stream => write!(f, "stream"),
            Protocol::Datagram => write!(f, "datagram"),
        }
    }
}

/// Endpoint descriptor: `{family, protocol, location}`.
///
/// `location` is a filesystem path for [`Family::Local`] and a `host:port`
/// string for [`Family::Network`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SocketAddress {
    family: Family,
    protocol: Protocol,
    location: String,
}

impl SocketAddress {
    pub fn local(path: impl AsRef<Path>, protocol: Protocol) -> Self {
        Self {
            family: Family::Local,
            protocol,
            location: path.as_ref().to_string_lossy().into_owned(),
        }
    }

    pub fn network(host_port: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            family: Family::Network,
            protocol,
            location: host_port.into(),
        }
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn is_local(&self) -> bool {
        self.family == Family::Local
    }

    /// Filesystem node backing a local-domain address.
    pub fn path(&self) -> Option<&Path> {
        match self.family {
            Family::Local => Some(Path::new(&self.location)),
            Family::Network => None,
        }
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match (self.family, self.protocol) {
            (Family::Local, Protocol::Stream) => "unix",
            (Family::Local, Protocol::Datagram) => "unixgram",
            (Family::Network, Protocol::Stream) => "tcp",
            (Family::Network, Protocol::Datagram) => "udp",
        };
        write!(f, "{scheme}://{}", self.location)
    }
}

// ---------------------------------------------------------------------------
// Daemon lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state of a supervised daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonState::Stopped => write!(f, "stopped"),
            DaemonState::Starting => write!(f, "starting"),
            DaemonState::Running => write!(f, "running"),
            DaemonState::Stopping => write!(f, "stopping"),
            DaemonState::Failed => write!(f, "failed"),
        }
    }
}

/// Lifecycle action accepted by the product control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Start,
    Stop,
    Restart,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Restart => "restart",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "start" => Ok(Action::Start),
            "stop" => Ok(Action::Stop),
            "restart" => Ok(Action::Restart),
            other => Err(format!(
                "unknown action '{other}'; expected: start, stop, restart"
            )),
        }
    }
}

/// Target of a lifecycle action: one named daemon or the whole set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    All,
    Daemon(DaemonName),
}

impl Target {
    pub fn daemon(&self) -> Option<&DaemonName> {
        match self {
            Target::All => None,
            Target::Daemon(name) => Some(name),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::All => write!(f, "all"),
            Target::Daemon(name) => name.fmt(f),
        }
    }
}

impl From<Option<DaemonName>> for Target {
    fn from(name: Option<DaemonName>) -> Self {
        name.map_or(Target::All, Target::Daemon)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
