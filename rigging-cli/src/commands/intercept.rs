//! `rigging intercept`: run a setup plan and stream intercepted traffic.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tokio::sync::mpsc;

use rigging_core::DaemonName;
use rigging_daemon::DaemonController;
use rigging_orchestrator::{load_plan, Orchestrator, ProductLayout};
use rigging_socket::{QueueItem, Wait};

use super::{block_on, load_config};

/// Arguments for `rigging intercept`.
#[derive(Args, Debug)]
pub struct InterceptArgs {
    /// Setup plan (YAML).
    #[arg(long)]
    pub plan: PathBuf,

    /// Tear down after this many intercepted units.
    #[arg(long)]
    pub count: Option<usize>,

    /// Tear down after this many seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Emit one JSON object per intercepted unit.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct InterceptedJson<'a> {
    daemon: &'a str,
    received_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    peer: Option<&'a str>,
    text: &'a str,
}

impl InterceptArgs {
    pub fn run(self, config: Option<&Path>) -> Result<()> {
        let config = load_config(config)?;
        let mut plan = load_plan(&self.plan)
            .with_context(|| format!("failed to load plan {}", self.plan.display()))?;
        plan.resolve_paths(&config);

        let layout = ProductLayout::from(&config);
        let orchestrator = Orchestrator::new(DaemonController::new(config), layout);

        block_on(async move {
            let mut session = orchestrator.setup(&plan).await.context("setup failed")?;

            let (tx, mut rx) = mpsc::unbounded_channel::<(DaemonName, QueueItem)>();
            let mut readers = Vec::new();
            for entry in plan.entries.iter().filter(|e| e.interceptor.is_some()) {
                let Some(mut observer) = session.take_observer(&entry.daemon) else {
                    continue;
                };
                let tx = tx.clone();
                let daemon = entry.daemon.clone();
                readers.push(tokio::spawn(async move {
                    while let Ok(item) = observer.poll(Wait::Forever).await {
                        if tx.send((daemon.clone(), item)).is_err() {
                            break;
                        }
                    }
                }));
            }
            drop(tx);

            let deadline = async {
                match self.timeout {
                    Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::pin!(deadline);
            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);

            let mut seen = 0usize;
            loop {
                tokio::select! {
                    _ = &mut ctrl_c => break,
                    _ = &mut deadline => break,
                    received = rx.recv() => {
                        let Some((daemon, item)) = received else { break };
                        print_item(&daemon, &item, self.json);
                        seen += 1;
                        if self.count.is_some_and(|limit| seen >= limit) {
                            break;
                        }
                    }
                }
            }

            for reader in readers {
                reader.abort();
            }
            tracing::info!(intercepted = seen, "tearing down");
            orchestrator.teardown(session).await.context("teardown failed")?;
            Ok::<_, anyhow::Error>(())
        })?
    }
}

fn print_item(daemon: &DaemonName, item: &QueueItem, json: bool) {
    let text = item.text();
    if json {
        let payload = InterceptedJson {
            daemon: daemon.as_str(),
            received_at: item.received_at.to_rfc3339(),
            peer: item.peer.as_deref(),
            text: &text,
        };
        match serde_json::to_string(&payload) {
            Ok(line) => println!("{line}"),
            Err(err) => tracing::warn!(daemon = %daemon, error = %err, "failed to serialize intercepted unit"),
        }
    } else {
        println!(
            "{} {} {}",
            item.received_at.format("%H:%M:%S%.3f").to_string().bright_black(),
            daemon.as_str().bold(),
            text
        );
    }
}
