//! Daemon lifecycle through the product's control command.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use rigging_core::{Action, DaemonName, DaemonState, HarnessConfig, ProbeSpec, SocketAddress, Target};
use serde::Serialize;
use tokio::process::Command;
use tokio::sync::RwLock;

use crate::error::{io_err, DaemonError};
use crate::poll::PollPolicy;
use crate::probe::{self, Expect, Watermarks};

/// Captured result of one control command run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlOutput {
    pub command: String,
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Lifecycle operations the orchestrator drives.
#[async_trait]
pub trait ServiceControl: Send + Sync {
    /// Run `action` for one daemon or the whole set.
    async fn control(
        &self,
        target: &Target,
        action: Action,
        debug_mode: bool,
    ) -> Result<ControlOutput, DaemonError>;

    /// Poll until `target` is up (`running`) or down, including any extra
    /// socket nodes the caller owns.
    async fn check_status(
        &self,
        running: bool,
        target: &Target,
        extra_sockets: &[SocketAddress],
    ) -> Result<(), DaemonError>;
}

pub struct DaemonController {
    config: HarnessConfig,
    policy: PollPolicy,
    states: RwLock<HashMap<DaemonName, DaemonState>>,
    watermarks: RwLock<HashMap<DaemonName, Watermarks>>,
}

impl std::fmt::Debug for DaemonController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonController")
            .field("command", &self.config.control_command())
            .field("policy", &self.policy)
            .finish()
    }
}

impl DaemonController {
    pub fn new(config: HarnessConfig) -> Self {
        let policy = PollPolicy::from(&config.poll);
        Self {
            config,
            policy,
            states: RwLock::new(HashMap::new()),
            watermarks: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Last known state; `None` for daemons not in the configuration.
    pub async fn state(&self, name: &DaemonName) -> Option<DaemonState> {
        self.config.daemon(name)?;
        Some(self.states.read().await.get(name).copied().unwrap_or_default())
    }

    /// Every configured daemon with its last known state, in declared order.
    pub async fn states(&self) -> Vec<(DaemonName, DaemonState)> {
        let states = self.states.read().await;
        self.config
            .daemon_names()
            .into_iter()
            .map(|name| {
                let state = states.get(&name).copied().unwrap_or_default();
                (name, state)
            })
            .collect()
    }

    fn targets(&self, target: &Target) -> Result<Vec<DaemonName>, DaemonError> {
        match target {
            Target::All => Ok(self.config.daemon_names()),
            Target::Daemon(name) => match self.config.daemon(name) {
                Some(_) => Ok(vec![name.clone()]),
                None => Err(DaemonError::UnknownDaemon(name.clone())),
            },
        }
    }

    /// `<command> <action> [daemon] [debug_args…]`
    pub fn command_line(&self, target: &Target, action: Action, debug_mode: bool) -> (PathBuf, Vec<String>) {
        let mut args = vec![action.as_str().to_string()];
        if let Some(name) = target.daemon() {
            args.push(name.to_string());
        }
        if debug_mode && action != Action::Stop {
            args.extend(self.config.control.debug_args.iter().cloned());
        }
        (self.config.control_command(), args)
    }

    async fn set_state(&self, names: &[DaemonName], state: DaemonState) {
        let mut states = self.states.write().await;
        for name in names {
            states.insert(name.clone(), state);
        }
    }

    /// Log offsets at start time; log probes only count lines written later.
    async fn record_watermarks(&self, names: &[DaemonName]) {
        let mut watermarks = self.watermarks.write().await;
        for name in names {
            let Some(spec) = self.config.daemon(name) else {
                continue;
            };
            let marks: Watermarks = spec
                .probes
                .iter()
                .filter_map(|p| match p {
                    ProbeSpec::LogContains { path, .. } => {
                        let path = self.config.resolve(path);
                        let offset = probe::log_offset(&path);
                        Some((path, offset))
                    }
                    _ => None,
                })
                .collect();
            watermarks.insert(name.clone(), marks);
        }
    }

    fn unmet(
        &self,
        names: &[DaemonName],
        watermarks: &HashMap<DaemonName, Watermarks>,
        extra_sockets: &[SocketAddress],
        expect: Expect,
    ) -> Option<String> {
        for name in names {
            let Some(spec) = self.config.daemon(name) else {
                continue;
            };
            for p in &spec.probes {
                if let Some(unmet) = probe::evaluate(p, name, &self.config, watermarks.get(name), expect) {
                    return Some(format!("{name}: {unmet}"));
                }
            }
            // Process presence is always part of the check.
            let tracks_pid_file = spec.probes.iter().any(|p| matches!(p, ProbeSpec::PidFile { .. }));
            if !tracks_pid_file {
                if let Some(unmet) = probe::pid_condition(&self.config.pid_dir(), name.as_str(), expect) {
                    return Some(format!("{name}: {unmet}"));
                }
            }
        }
        extra_sockets
            .iter()
            .find_map(|address| probe::extra_socket_condition(address, expect))
    }
}

#[async_trait]
impl ServiceControl for DaemonController {
    async fn control(
        &self,
        target: &Target,
        action: Action,
        debug_mode: bool,
    ) -> Result<ControlOutput, DaemonError> {
        let names = self.targets(target)?;
        let (program, args) = self.command_line(target, action, debug_mode);
        let rendered = format!("{} {}", program.display(), args.join(" "));

        match action {
            Action::Start | Action::Restart => {
                self.record_watermarks(&names).await;
                self.set_state(&names, DaemonState::Starting).await;
            }
            Action::Stop => self.set_state(&names, DaemonState::Stopping).await,
        }

        tracing::info!(daemon = %target, action = %action, debug = debug_mode, "running control command");
        let output = Command::new(&program)
            .args(&args)
            .output()
            .await
            .map_err(|e| io_err(&program, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            self.set_state(&names, DaemonState::Failed).await;
            tracing::error!(command = %rendered, status = %output.status, stderr = %stderr, "control command failed");
            return Err(DaemonError::ControlCommandFailed {
                command: rendered,
                status: output.status.code(),
                stdout,
                stderr,
            });
        }

        Ok(ControlOutput {
            command: rendered,
            status: output.status.code(),
            stdout,
            stderr,
        })
    }

    async fn check_status(
        &self,
        running: bool,
        target: &Target,
        extra_sockets: &[SocketAddress],
    ) -> Result<(), DaemonError> {
        let names = self.targets(target)?;
        let expect = if running { Expect::Up } else { Expect::Down };
        let watermarks = self.watermarks.read().await.clone();

        let outcome = self
            .policy
            .run(|| self.unmet(&names, &watermarks, extra_sockets, expect))
            .await;

        match outcome {
            Ok(attempts) => {
                let state = if running { DaemonState::Running } else { DaemonState::Stopped };
                self.set_state(&names, state).await;
                tracing::info!(daemon = %target, state = %state, attempts, "daemon status confirmed");
                Ok(())
            }
            Err(exhausted) => {
                self.set_state(&names, DaemonState::Failed).await;
                tracing::warn!(
                    daemon = %target,
                    expected = expect.as_str(),
                    unmet = %exhausted.last_unmet,
                    "daemon status check exhausted its budget",
                );
                Err(DaemonError::ReadinessTimeout {
                    target: target.to_string(),
                    expected: expect.as_str(),
                    attempts: exhausted.attempts,
                    waited: exhausted.waited,
                    last_unmet: exhausted.last_unmet,
                })
            }
        }
    }
}
