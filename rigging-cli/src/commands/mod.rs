pub mod control;
pub mod intercept;
pub mod logs;
pub mod options;
pub mod select;
pub mod send;
pub mod status;

use std::future::Future;
use std::path::Path;

use anyhow::{Context, Result};
use rigging_core::{config, HarnessConfig};

/// Load the harness configuration from `--config` or the default location.
pub fn load_config(path: Option<&Path>) -> Result<HarnessConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config::default_config_path().context("could not determine home directory")?,
    };
    config::load_at(&path)
        .with_context(|| format!("failed to load harness configuration {}", path.display()))
}

/// Run async harness code to completion on a fresh runtime.
pub fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    Ok(runtime.block_on(future))
}
