//! `rigging logs`: tail of every monitored product log.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use rigging_daemon::logs;

use super::load_config;

/// Arguments for `rigging logs`.
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Lines to show per file.
    #[arg(short = 'n', long, default_value_t = 100)]
    pub lines: usize,
}

impl LogsArgs {
    pub fn run(self, config: Option<&Path>) -> Result<()> {
        let config = load_config(config)?;
        if config.monitored_logs.is_empty() {
            println!("no monitored logs configured");
            return Ok(());
        }
        for (i, log) in config.monitored_logs.iter().enumerate() {
            let path = config.resolve(log);
            if i > 0 {
                println!();
            }
            println!("{}", format!("==> {} <==", path.display()).bold());
            match logs::tail(&path, self.lines)
                .with_context(|| format!("failed to read {}", path.display()))?
            {
                Some(lines) => lines.iter().for_each(|line| println!("{line}")),
                None => println!("{}", "(missing)".bright_black()),
            }
        }
        Ok(())
    }
}
