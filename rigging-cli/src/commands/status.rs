//! `rigging status`: readiness checks and last known daemon states.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use rigging_core::{DaemonName, DaemonState, Protocol, SocketAddress, Target};
use rigging_daemon::{DaemonController, ServiceControl};

use super::{block_on, load_config};

/// Arguments for `rigging status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Check a single daemon instead of all configured ones.
    #[arg(long)]
    pub daemon: Option<String>,

    /// Wait for the target to be down instead of up.
    #[arg(long)]
    pub down: bool,

    /// Additional socket node that must exist (or be gone); repeatable.
    #[arg(long = "extra-socket")]
    pub extra_sockets: Vec<PathBuf>,
}

#[derive(Tabled)]
struct StateRow {
    #[tabled(rename = "daemon")]
    daemon: String,
    #[tabled(rename = "state")]
    state: String,
}

impl StatusArgs {
    pub fn run(self, config: Option<&Path>) -> Result<()> {
        let controller = DaemonController::new(load_config(config)?);
        let target = Target::from(self.daemon.map(DaemonName::from));
        let extra: Vec<SocketAddress> = self
            .extra_sockets
            .iter()
            .map(|path| SocketAddress::local(path, Protocol::Stream))
            .collect();
        let running = !self.down;

        let (outcome, states) = block_on(async {
            let outcome = controller.check_status(running, &target, &extra).await;
            (outcome, controller.states().await)
        })?;

        let rows: Vec<StateRow> = states
            .into_iter()
            .filter(|(name, _)| target.daemon().map_or(true, |d| d == name))
            .map(|(name, state)| StateRow {
                daemon: name.to_string(),
                state: paint(state),
            })
            .collect();
        if !rows.is_empty() {
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }

        outcome.with_context(|| {
            format!("{target} is not {}", if running { "running" } else { "stopped" })
        })
    }
}

fn paint(state: DaemonState) -> String {
    let label = state.to_string();
    match state {
        DaemonState::Running => label.green().to_string(),
        DaemonState::Stopped => label.bright_black().to_string(),
        DaemonState::Failed => label.red().bold().to_string(),
        DaemonState::Starting | DaemonState::Stopping => label.yellow().to_string(),
    }
}
