//! Implementation of the `dynrescan run` command.
//!
//! Runs the dynamic rescan step for one build and exits nonzero when the step
//! marks the build failed.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use tracing::warn;

use dynrescan_lib::args::BuildIdentity;
use dynrescan_lib::console::Console;
use dynrescan_lib::engine::ArtifactEngine;
use dynrescan_lib::node::SshResolver;
use dynrescan_lib::orchestrate::{ScanOrchestrator, StepOutcome, Workspace};

use super::{block_on, load_config};
use crate::output::{OutputFormat, format_duration, print_error, print_json, print_stat, print_success};

/// Process variables forwarded to the scan process.
const FORWARDED_PREFIXES: &[&str] = &["BUILD_", "JOB_"];

/// Options of a single step run.
pub struct RunArgs {
  pub workspace: String,
  pub node: Option<String>,
  pub build_name: Option<String>,
  pub job_name: Option<String>,
  pub env: Vec<String>,
  pub app: Option<String>,
  pub can_fail_job: bool,
  pub debug: bool,
}

/// Runs the step. Returns `true` when the build is marked failed.
pub fn cmd_run(config_path: Option<&Path>, args: RunArgs, format: OutputFormat) -> Result<bool> {
  let mut config = load_config(config_path)?;
  if let Some(app) = args.app {
    config.application_name = app;
  }
  config.can_fail_job |= args.can_fail_job;
  config.debug |= args.debug;
  config.validate().context("Invalid configuration")?;

  let build = BuildIdentity::new(
    args
      .build_name
      .or_else(|| std::env::var("BUILD_DISPLAY_NAME").ok())
      .unwrap_or_default(),
    args.job_name.or_else(|| std::env::var("JOB_NAME").ok()).unwrap_or_default(),
  );
  let env = forwarded_env(std::env::vars(), &args.env)?;
  let workspace = match args.node {
    Some(node) => Workspace::remote(node, args.workspace),
    None => Workspace::local(args.workspace),
  };

  // JSON goes to stdout, so the build log moves to stderr.
  let console = if format.is_json() {
    Console::writer(std::io::stderr())
  } else {
    Console::stdout()
  };
  let engine = ArtifactEngine::new(config.tool.staging_dir(), config.tool.filter(), config.tool.runtime.clone())
    .with_env(env.clone());
  let resolver = SshResolver::new(config.ssh_options());
  let step = ScanOrchestrator::new(config, build, resolver, engine, console).with_env(env);

  let start = Instant::now();
  let result = block_on(step.perform_until(&workspace, interrupted()))?;
  let elapsed = start.elapsed();

  match result {
    Ok(outcome) => {
      report(&outcome, format, elapsed)?;
      Ok(outcome.is_failure())
    }
    Err(err) => {
      if format.is_json() {
        print_json(&serde_json::json!({ "status": "failure", "error": err.to_string() }))?;
      } else {
        print_error(&format!("Build marked FAILURE: {}", err));
      }
      Ok(true)
    }
  }
}

fn report(outcome: &StepOutcome, format: OutputFormat, elapsed: std::time::Duration) -> Result<()> {
  if format.is_json() {
    return print_json(outcome);
  }

  println!();
  if outcome.is_failure() {
    print_error("Build marked FAILURE");
  } else {
    print_success("Dynamic rescan step finished");
  }
  if let Some(node) = &outcome.node {
    print_stat("Node", node);
  }
  if let Some(ready) = outcome.provisioned {
    print_stat("Scan tool ready", &ready.to_string());
  }
  if let Some(code) = outcome.exit_code {
    print_stat("Exit code", &code.to_string());
  }
  if let Some(error) = &outcome.error {
    print_stat("Error", error);
  }
  print_stat("Duration", &format_duration(elapsed));
  Ok(())
}

/// Resolves on Ctrl-C. Never resolves when the handler cannot be installed.
async fn interrupted() {
  if let Err(err) = tokio::signal::ctrl_c().await {
    warn!(error = %err, "cannot listen for Ctrl-C");
    std::future::pending::<()>().await;
  }
}

/// `BUILD_*`/`JOB_*` variables of `vars` plus explicit `KEY=VALUE` pairs,
/// the latter taking precedence.
fn forwarded_env(vars: impl IntoIterator<Item = (String, String)>, pairs: &[String]) -> Result<BTreeMap<String, String>> {
  let mut env: BTreeMap<String, String> = vars
    .into_iter()
    .filter(|(key, _)| FORWARDED_PREFIXES.iter().any(|prefix| key.starts_with(prefix)))
    .collect();

  for pair in pairs {
    match pair.split_once('=') {
      Some((key, value)) if !key.is_empty() => {
        env.insert(key.to_string(), value.to_string());
      }
      _ => bail!("Invalid --env value '{}', expected KEY=VALUE", pair),
    }
  }

  Ok(env)
}
