mod info;
mod provision;
mod run;

use std::path::Path;

use anyhow::{Context, Result};

use dynrescan_lib::config::ScanConfig;

pub use info::cmd_info;
pub use provision::cmd_provision;
pub use run::{RunArgs, cmd_run};

/// Loads the config file (if any) with environment overrides applied.
fn load_config(path: Option<&Path>) -> Result<ScanConfig> {
  let config = ScanConfig::load(path).context("Failed to load configuration")?;
  Ok(config)
}

/// Runs a future to completion on a fresh runtime.
fn block_on<F: std::future::Future>(future: F) -> Result<F::Output> {
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  Ok(rt.block_on(future))
}
