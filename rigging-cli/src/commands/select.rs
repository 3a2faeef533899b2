//! `rigging select`: which collected tests run on this host.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use rigging_core::selection::{self, SelectionContext, TestItem, TierFilter};
use rigging_core::{HostType, Platform};

use super::load_config;

/// Arguments for `rigging select`.
#[derive(Args, Debug)]
pub struct SelectArgs {
    /// YAML manifest with a `tests:` list.
    #[arg(long)]
    pub manifest: PathBuf,

    /// Allowed tier; repeatable. Overrides the range when given.
    #[arg(long = "tier")]
    pub tiers: Vec<i64>,

    #[arg(long, allow_negative_numbers = true)]
    pub tier_minimum: Option<i64>,

    #[arg(long, allow_negative_numbers = true)]
    pub tier_maximum: Option<i64>,

    /// Platform to select for (default: this host).
    #[arg(long)]
    pub platform: Option<Platform>,

    /// Host role (default: derived from the configured service, else server).
    #[arg(long)]
    pub host_type: Option<HostType>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct SelectionJson<'a> {
    selected: &'a [TestItem],
    deselected: &'a [TestItem],
}

#[derive(Tabled)]
struct SelectionRow {
    #[tabled(rename = "test")]
    id: String,
    #[tabled(rename = "tier")]
    tier: String,
    #[tabled(rename = "result")]
    result: String,
}

impl SelectArgs {
    pub fn run(self, config: Option<&Path>) -> Result<()> {
        let manifest = selection::load_manifest(&self.manifest)
            .with_context(|| format!("failed to read manifest {}", self.manifest.display()))?;

        let host_type = match self.host_type {
            Some(host_type) => host_type,
            None => load_config(config)
                .map(|c| c.host_type())
                .unwrap_or(HostType::Server),
        };
        let ctx = SelectionContext {
            platform: self.platform.or_else(Platform::current),
            host_type,
        };
        let default = TierFilter::default();
        let filter = TierFilter {
            allow: (!self.tiers.is_empty()).then(|| self.tiers.clone()),
            minimum: self.tier_minimum.unwrap_or(default.minimum),
            maximum: self.tier_maximum.unwrap_or(default.maximum),
        };

        let mut deselected: Vec<TestItem> = Vec::new();
        let selected = selection::select(manifest.tests, &filter, &ctx, &mut deselected);

        if self.json {
            let payload = SelectionJson {
                selected: &selected,
                deselected: &deselected,
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize selection JSON")?
            );
            return Ok(());
        }

        print_table(&selected, &deselected);
        Ok(())
    }
}

fn print_table(selected: &[TestItem], deselected: &[TestItem]) {
    println!(
        "{} selected | {} deselected",
        selected.len().to_string().green(),
        deselected.len().to_string().yellow(),
    );
    if selected.is_empty() && deselected.is_empty() {
        println!("Manifest has no tests.");
        return;
    }

    let row = |item: &TestItem, result: &str| SelectionRow {
        id: item.id.clone(),
        tier: item.tier.map_or_else(|| "-".to_string(), |t| t.to_string()),
        result: result.to_string(),
    };
    let rows: Vec<SelectionRow> = selected
        .iter()
        .map(|item| row(item, "selected"))
        .chain(deselected.iter().map(|item| row(item, "deselected")))
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}
