//! Resources held between setup and teardown.

use std::collections::HashMap;
use std::fmt;

use rigging_core::{DaemonName, SocketAddress};
use rigging_snapshot::ConfigSnapshot;
use rigging_socket::{InterceptListener, QueueObserver, SocketController};

use crate::plan::Topology;

/// Lifecycle of one session, as driven by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Configuring,
    Starting,
    Ready,
    Stopping,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrchestratorState::Idle => "idle",
            OrchestratorState::Configuring => "configuring",
            OrchestratorState::Starting => "starting",
            OrchestratorState::Ready => "ready",
            OrchestratorState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// One plan entry as far as setup got with it.
#[derive(Debug)]
pub(crate) struct StartedEntry {
    pub(crate) daemon: DaemonName,
    pub(crate) start_issued: bool,
    pub(crate) listener: Option<InterceptListener>,
    /// Local listener node the status checks must also account for.
    pub(crate) extra_sockets: Vec<SocketAddress>,
}

/// Handle returned by a successful setup; pass it back to teardown.
#[derive(Debug)]
pub struct Session {
    pub(crate) state: OrchestratorState,
    pub(crate) topology: Topology,
    pub(crate) ignore_errors: bool,
    pub(crate) clear_databases: bool,
    pub(crate) truncate_logs: bool,
    pub(crate) baseline_stopped: bool,
    pub(crate) snapshots: Vec<ConfigSnapshot>,
    pub(crate) entries: Vec<StartedEntry>,
    pub(crate) observers: HashMap<DaemonName, QueueObserver>,
    pub(crate) receivers: Vec<SocketController>,
}

impl Session {
    pub(crate) fn new(topology: Topology, ignore_errors: bool, clear_databases: bool, truncate_logs: bool) -> Self {
        Self {
            state: OrchestratorState::Idle,
            topology,
            ignore_errors,
            clear_databases,
            truncate_logs,
            baseline_stopped: false,
            snapshots: Vec::new(),
            entries: Vec::new(),
            observers: HashMap::new(),
            receivers: Vec::new(),
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Observer of the listener attached to `daemon`'s entry.
    pub fn observer(&mut self, daemon: &DaemonName) -> Option<&mut QueueObserver> {
        self.observers.get_mut(daemon)
    }

    /// Move an observer out, e.g. into a spawned reader task.
    pub fn take_observer(&mut self, daemon: &DaemonName) -> Option<QueueObserver> {
        self.observers.remove(daemon)
    }

    /// Connected receiver sockets in plan order.
    pub fn receivers_mut(&mut self) -> &mut [SocketController] {
        &mut self.receivers
    }

    pub fn snapshots(&self) -> &[ConfigSnapshot] {
        &self.snapshots
    }

    /// Bound address of `daemon`'s listener (resolved port for TCP).
    pub fn listener_address(&self, daemon: &DaemonName) -> Option<&SocketAddress> {
        self.entries
            .iter()
            .find(|e| &e.daemon == daemon)
            .and_then(|e| e.listener.as_ref())
            .map(InterceptListener::address)
    }

    pub(crate) fn transition(&mut self, next: OrchestratorState) {
        tracing::debug!(from = %self.state, to = %next, "session state");
        self.state = next;
    }
}
