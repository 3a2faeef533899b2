//! Session setup and teardown around the product daemons.
//!
//! # Phases
//!
//! ```text
//! Idle → Configuring → Starting → Ready → Stopping → Idle
//! ```
//!
//! - **Configuring**: snapshot and replace configuration resources, merge
//!   local option overrides, truncate monitored logs, stop every daemon and
//!   wait until all are down.
//! - **Starting**: per entry, bring up the listener and the daemon in the
//!   entry's order and wait for readiness (including the listener's local
//!   node); then connect receivers. For daemon-first entries the listener
//!   takes over a node the daemon already created, relaying to the local
//!   `forward_to` path it moves that node to.
//! - **Stopping**: per entry, shut the listener down, stop the daemon and
//!   wait until it is down; flush and close receivers.
//! - **Idle**: restore every snapshot, optionally clear databases, and for
//!   the all-daemons topology start the whole product again.
//!
//! A failed setup releases exactly what it had acquired before returning
//! the original error. Teardown always runs every step.

use std::path::PathBuf;
use std::time::Duration;

use rigging_core::{Action, DaemonName, HarnessConfig, SocketAddress, Target};
use rigging_daemon::{databases, logs, ServiceControl};
use rigging_snapshot::{options, ConfigSnapshot};
use rigging_socket::{InterceptListener, SocketController};

use crate::error::HarnessError;
use crate::plan::{InterceptEntry, SetupPlan, StartOrder, Topology};
use crate::session::{OrchestratorState, Session, StartedEntry};

pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Product files the orchestrator touches outside the plan itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductLayout {
    pub local_options_file: Option<PathBuf>,
    pub monitored_logs: Vec<PathBuf>,
    pub database_dirs: Vec<PathBuf>,
}

impl From<&HarnessConfig> for ProductLayout {
    fn from(config: &HarnessConfig) -> Self {
        Self {
            local_options_file: config.local_options_file.as_deref().map(|p| config.resolve(p)),
            monitored_logs: config.monitored_logs.iter().map(|p| config.resolve(p)).collect(),
            database_dirs: config.database_dirs.iter().map(|p| config.resolve(p)).collect(),
        }
    }
}

pub struct Orchestrator<C> {
    control: C,
    layout: ProductLayout,
    flush_timeout: Duration,
}

impl<C: ServiceControl> Orchestrator<C> {
    pub fn new(control: C, layout: ProductLayout) -> Self {
        Self {
            control,
            layout,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }

    /// Bounded wait for a pending unit on each receiver before closing it.
    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    pub fn layout(&self) -> &ProductLayout {
        &self.layout
    }

    /// Bring the product into the state `plan` describes.
    pub async fn setup(&self, plan: &SetupPlan) -> Result<Session, HarnessError> {
        plan.validate()?;
        let mut session = Session::new(
            plan.topology,
            plan.ignore_errors,
            plan.clear_databases,
            plan.truncate_logs,
        );

        match self.acquire(plan, &mut session).await {
            Ok(()) => {
                session.transition(OrchestratorState::Ready);
                tracing::info!(entries = session.entries.len(), "session ready");
                Ok(session)
            }
            Err(err) => {
                tracing::error!(error = %err, state = %session.state, "setup failed; releasing acquired resources");
                if let Err(release_err) = self.release(&mut session).await {
                    tracing::error!(error = %release_err, "release after failed setup was incomplete");
                }
                Err(err)
            }
        }
    }

    async fn acquire(&self, plan: &SetupPlan, session: &mut Session) -> Result<(), HarnessError> {
        session.transition(OrchestratorState::Configuring);

        for change in &plan.config_changes {
            session.snapshots.push(ConfigSnapshot::capture(&change.path)?);
            if let Some(snapshot) = session.snapshots.last_mut() {
                snapshot.apply(change.content.as_bytes())?;
                tracing::info!(path = %change.path.display(), "configuration replaced");
            }
        }

        if !plan.local_options.is_empty() {
            let path = self.layout.local_options_file.as_deref().ok_or_else(|| {
                HarnessError::ConfigurationMissing(
                    "local option overrides given but no local options file is configured".to_string(),
                )
            })?;
            session
                .snapshots
                .push(options::capture_and_merge(path, &plan.local_options)?);
        }

        if plan.truncate_logs {
            logs::truncate_monitored_files(&self.layout.monitored_logs)?;
        }

        session.baseline_stopped = true;
        self.control.control(&Target::All, Action::Stop, false).await?;
        self.control.check_status(false, &Target::All, &[]).await?;

        session.transition(OrchestratorState::Starting);
        for entry in &plan.entries {
            self.start_entry(entry, session).await?;
        }

        for receiver in &plan.receivers {
            let mut controller = SocketController::new(receiver.address.clone(), receiver.framing);
            controller.connect().await?;
            session.receivers.push(controller);
        }
        Ok(())
    }

    async fn start_entry(&self, entry: &InterceptEntry, session: &mut Session) -> Result<(), HarnessError> {
        let target = Target::Daemon(entry.daemon.clone());
        // The listener's local node takes part in both readiness checks,
        // whichever side creates it first.
        let extra: Vec<SocketAddress> = entry
            .interceptor
            .iter()
            .map(|spec| spec.address.clone())
            .filter(SocketAddress::is_local)
            .collect();
        session.entries.push(StartedEntry {
            daemon: entry.daemon.clone(),
            start_issued: false,
            listener: None,
            extra_sockets: extra.clone(),
        });
        let index = session.entries.len() - 1;

        match entry.order {
            StartOrder::InterceptorFirst => {
                self.start_listener(entry, index, session).await?;
                session.entries[index].start_issued = true;
                self.control.control(&target, Action::Start, true).await?;
                self.control.check_status(true, &target, &extra).await?;
            }
            StartOrder::DaemonFirst => {
                session.entries[index].start_issued = true;
                self.control.control(&target, Action::Start, true).await?;
                self.control.check_status(true, &target, &extra).await?;
                self.start_listener(entry, index, session).await?;
            }
        }
        tracing::info!(daemon = %entry.daemon, order = ?entry.order, "entry started");
        Ok(())
    }

    async fn start_listener(
        &self,
        entry: &InterceptEntry,
        index: usize,
        session: &mut Session,
    ) -> Result<(), HarnessError> {
        let Some(spec) = &entry.interceptor else {
            return Ok(());
        };
        let mut spec = spec.clone();
        // A daemon started first may already own the node at the address.
        if entry.order == StartOrder::DaemonFirst {
            spec.take_over = true;
        }
        let mut listener = InterceptListener::new(spec);
        if let Some(observer) = listener.observer() {
            session.observers.insert(entry.daemon.clone(), observer);
        }
        listener.start().await?;
        session.entries[index].listener = Some(listener);
        Ok(())
    }

    /// Release everything `session` holds and return the product to idle.
    pub async fn teardown(&self, mut session: Session) -> Result<(), HarnessError> {
        self.release(&mut session).await
    }

    async fn release(&self, session: &mut Session) -> Result<(), HarnessError> {
        session.transition(OrchestratorState::Stopping);
        let mut failures = Vec::new();

        for entry in session.entries.iter_mut() {
            let extra = entry.extra_sockets.clone();
            if let Some(listener) = entry.listener.as_mut() {
                record(&mut failures, "listener shutdown", &entry.daemon, listener.shutdown().await);
            }
            if entry.start_issued {
                let target = Target::Daemon(entry.daemon.clone());
                record(
                    &mut failures,
                    "stop",
                    &entry.daemon,
                    self.control.control(&target, Action::Stop, false).await,
                );
                record(
                    &mut failures,
                    "stop check",
                    &entry.daemon,
                    self.control.check_status(false, &target, &extra).await,
                );
            }
        }
        session.entries.clear();
        session.observers.clear();

        for receiver in session.receivers.iter_mut() {
            receiver.flush_and_close(self.flush_timeout).await;
        }
        session.receivers.clear();

        for snapshot in session.snapshots.iter().rev() {
            match snapshot.restore() {
                Ok(outcome) => tracing::debug!(outcome = ?outcome, "snapshot restored"),
                Err(err) => {
                    tracing::error!(path = %snapshot.resource().display(), error = %err, "snapshot restore failed");
                    failures.push(format!("restore {}: {err}", snapshot.resource().display()));
                }
            }
        }
        session.snapshots.clear();

        if session.clear_databases {
            if let Err(err) = databases::clear_databases(&self.layout.database_dirs) {
                failures.push(format!("clear databases: {err}"));
            }
        }
        if session.truncate_logs {
            if let Err(err) = logs::truncate_monitored_files(&self.layout.monitored_logs) {
                failures.push(format!("truncate logs: {err}"));
            }
        }

        if session.topology == Topology::AllDaemons && session.baseline_stopped {
            if let Err(err) = self.control.control(&Target::All, Action::Start, false).await {
                failures.push(format!("final start: {err}"));
            }
        }
        session.baseline_stopped = false;
        session.transition(OrchestratorState::Idle);

        if failures.is_empty() {
            tracing::info!("teardown complete");
            return Ok(());
        }
        for failure in &failures {
            tracing::warn!(failure = %failure, "teardown step failed");
        }
        if session.ignore_errors {
            Ok(())
        } else {
            Err(HarnessError::Teardown { failures })
        }
    }
}

fn record<T, E: std::fmt::Display>(
    failures: &mut Vec<String>,
    step: &str,
    daemon: &DaemonName,
    result: Result<T, E>,
) {
    if let Err(err) = result {
        failures.push(format!("{step} {daemon}: {err}"));
    }
}

