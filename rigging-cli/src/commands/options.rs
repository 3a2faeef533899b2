//! `rigging options`: edit the local internal options file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Subcommand;

use rigging_snapshot::{options, LocalOptions};

use super::load_config;

#[derive(Subcommand, Debug)]
pub enum OptionsCommand {
    /// Merge KEY=VALUE pairs into the file and show the change.
    Set {
        /// Entries as KEY=VALUE.
        #[arg(required = true)]
        pairs: Vec<String>,

        /// Edit this file instead of the configured one.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Print the file's entries.
    Show {
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

pub fn run(command: OptionsCommand, config: Option<&Path>) -> Result<()> {
    match command {
        OptionsCommand::Set { pairs, file } => {
            let path = options_file(file, config)?;
            let overrides = parse_pairs(&pairs)?;
            let snapshot = options::capture_and_merge(&path, &overrides)
                .with_context(|| format!("failed to update {}", path.display()))?;
            let diff = snapshot.diff();
            if diff.is_empty() {
                println!("{} unchanged", path.display());
            } else {
                print!("{diff}");
            }
            Ok(())
        }
        OptionsCommand::Show { file } => {
            let path = options_file(file, config)?;
            let text = match std::fs::read_to_string(&path) {
                Ok(text) => text,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to read {}", path.display()))
                }
            };
            for (key, value) in LocalOptions::parse(&text).to_map() {
                println!("{key}={value}");
            }
            Ok(())
        }
    }
}

fn options_file(file: Option<PathBuf>, config: Option<&Path>) -> Result<PathBuf> {
    if let Some(file) = file {
        return Ok(file);
    }
    let config = load_config(config)?;
    match config.local_options_file.as_deref() {
        Some(path) => Ok(config.resolve(path)),
        None => bail!("no local_options_file in the harness configuration; pass --file"),
    }
}

fn parse_pairs(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.trim().to_string()))
            }
            _ => bail!("expected KEY=VALUE, got '{pair}'"),
        })
        .collect()
}
