//! `rigging control`: drive the product control command.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use rigging_core::{Action, DaemonName, Target};
use rigging_daemon::{DaemonController, ServiceControl};

use super::{block_on, load_config};

/// Arguments for `rigging control`.
#[derive(Args, Debug)]
pub struct ControlArgs {
    /// start, stop or restart.
    pub action: Action,

    /// Daemon to act on (default: the whole product).
    pub daemon: Option<String>,

    /// Pass the configured debug arguments.
    #[arg(long)]
    pub debug: bool,

    /// Also wait until the target is up (or down, for stop).
    #[arg(long)]
    pub wait: bool,
}

impl ControlArgs {
    pub fn run(self, config: Option<&Path>) -> Result<()> {
        let ControlArgs {
            action,
            daemon,
            debug,
            wait,
        } = self;
        let controller = DaemonController::new(load_config(config)?);
        let target = Target::from(daemon.map(DaemonName::from));

        block_on(async {
            let output = controller
                .control(&target, action, debug)
                .await
                .with_context(|| format!("failed to {action} {target}"))?;
            if !output.stdout.is_empty() {
                println!("{}", output.stdout);
            }
            if wait {
                controller
                    .check_status(action != Action::Stop, &target, &[])
                    .await
                    .with_context(|| format!("{target} did not settle after {action}"))?;
            }
            println!("{action} {target}: ok");
            Ok::<_, anyhow::Error>(())
        })?
    }
}
