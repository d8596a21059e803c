//! The dynamic rescan step.
//!
//! A step runs one of two straight-line branches. A local workspace builds
//! the argument set and hands it to the [`ScanEngine`]. A remote workspace
//! resolves the node, provisions the scan tool onto it and launches the
//! canonical artifact there.
//!
//! Only node resolution, an undetermined node OS and interruption abort the
//! step with a [`ScanError`]. Every other failure is echoed to the console
//! and marks the build failed only when `can_fail_job` is set.

use std::collections::BTreeMap;
use std::future::Future;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::args::{BuildIdentity, NamingMode, ScanArguments};
use crate::config::ScanConfig;
use crate::console::Console;
use crate::consts::STEP_DISPLAY_NAME;
use crate::engine::{EngineError, ScanEngine};
use crate::invoke::{InvokeError, Invoker};
use crate::node::{ExecutionTarget, NodeError, NodeResolver};
use crate::provision::Provisioner;

const RULE: &str = "------------------------------------------------------------------------";

/// Fatal step failures. The build is always marked failed.
#[derive(Debug, Error)]
pub enum ScanError {
  #[error(transparent)]
  NodeResolution(#[from] NodeError),

  #[error("Failed to determine the OS of node {node}")]
  UnknownOs { node: String },

  #[error("The scan step was interrupted")]
  Interrupted,
}

/// Where the build's workspace lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
  /// Node hosting the workspace, `None` for the orchestrating machine.
  pub node: Option<String>,
  pub path: String,
}

impl Workspace {
  pub fn local(path: impl Into<String>) -> Self {
    Self {
      node: None,
      path: path.into(),
    }
  }

  pub fn remote(node: impl Into<String>, path: impl Into<String>) -> Self {
    Self {
      node: Some(node.into()),
      path: path.into(),
    }
  }

  pub fn is_remote(&self) -> bool {
    self.node.is_some()
  }
}

/// Terminal status the step leaves on the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
  /// The build keeps whatever status it had.
  Unmarked,
  Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
  Local,
  Remote,
}

/// What a completed step did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
  pub status: StepStatus,
  pub mode: ExecutionMode,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub node: Option<String>,
  /// Whether the scan tool was ready on the node. Local steps leave it unset.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub provisioned: Option<bool>,
  /// Return code of the scan tool, when it ran to completion.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub exit_code: Option<i32>,
  /// Message of a non-fatal failure.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl StepOutcome {
  fn new(mode: ExecutionMode, node: Option<String>) -> Self {
    Self {
      status: StepStatus::Unmarked,
      mode,
      node,
      provisioned: None,
      exit_code: None,
      error: None,
    }
  }

  pub fn is_failure(&self) -> bool {
    self.status == StepStatus::Failure
  }
}

/// Runs the dynamic rescan step for one build.
pub struct ScanOrchestrator<R, E> {
  config: ScanConfig,
  build: BuildIdentity,
  env: BTreeMap<String, String>,
  resolver: R,
  engine: E,
  console: Console,
}

impl<R: NodeResolver, E: ScanEngine> ScanOrchestrator<R, E> {
  pub fn new(config: ScanConfig, build: BuildIdentity, resolver: R, engine: E, console: Console) -> Self {
    Self {
      config,
      build,
      env: BTreeMap::new(),
      resolver,
      engine,
      console,
    }
  }

  /// Environment passed to the scan process on remote nodes.
  pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
    self.env = env;
    self
  }

  pub fn config(&self) -> &ScanConfig {
    &self.config
  }

  /// Runs the step, aborting with [`ScanError::Interrupted`] if `interrupt`
  /// completes first. Any child process of the step is killed.
  pub async fn perform_until<F>(&self, workspace: &Workspace, interrupt: F) -> Result<StepOutcome, ScanError>
  where
    F: Future<Output = ()>,
  {
    tokio::select! {
      outcome = self.perform(workspace) => outcome,
      _ = interrupt => {
        warn!("scan step interrupted");
        self.console.line("Scan interrupted, marking the build as failed");
        Err(ScanError::Interrupted)
      }
    }
  }

  pub async fn perform(&self, workspace: &Workspace) -> Result<StepOutcome, ScanError> {
    self.preamble(workspace);

    match &workspace.node {
      Some(node) => self.perform_remote(node).await,
      None => self.perform_local().await,
    }
  }

  fn preamble(&self, workspace: &Workspace) {
    let console = &self.console;
    console.line(RULE);
    console.line(STEP_DISPLAY_NAME);
    console.line(RULE);

    if !self.config.debug {
      return;
    }
    console.blank();
    console.line("[Debug mode is on]");
    console.blank();
    console.line(&format!("Can Fail Job: {}", self.config.can_fail_job));
    match self.engine.version_info() {
      Some(version) => {
        console.line("Version information:");
        console.line(&version);
      }
      None => console.line("Could not retrieve scan engine version information."),
    }
    console.blank();
    let kind = if workspace.is_remote() { "remote" } else { "local" };
    console.line(&format!("Processing files in [{}] workspace: ", kind));
    console.line(&workspace.path.replace('\\', "/"));
  }

  async fn perform_local(&self) -> Result<StepOutcome, ScanError> {
    let mut outcome = StepOutcome::new(ExecutionMode::Local, None);
    let args = ScanArguments::dynamic_rescan(&self.config, &self.build, NamingMode::LOCAL);

    if self.config.debug {
      self.console.blank();
      self.console.line("Calling wrapper with arguments:");
      self.console.line(&format!("[{}]", args.masked().join(", ")));
    }

    match self.engine.run(&args, &self.console).await {
      Ok(code) => {
        info!(exit_code = code, "local scan finished");
        outcome.exit_code = Some(code);
        if code != 0 && self.config.can_fail_job {
          self.console.line(&format!("Error- Returned code from wrapper:{}", code));
          outcome.status = StepStatus::Failure;
        }
      }
      Err(EngineError::Invoke(InvokeError::Interrupted { .. })) => return Err(ScanError::Interrupted),
      Err(err) => {
        error!(error = %err, "local scan failed");
        self.console.line(&err.to_string());
        outcome.error = Some(err.to_string());
        if self.config.can_fail_job {
          outcome.status = StepStatus::Failure;
        }
      }
    }

    Ok(outcome)
  }

  async fn perform_remote(&self, node: &str) -> Result<StepOutcome, ScanError> {
    let mut outcome = StepOutcome::new(ExecutionMode::Remote, Some(node.to_string()));
    let can_fail_job = self.config.can_fail_job;

    let target = self.resolver.resolve(node).await.inspect_err(|err| {
      error!(node = %node, error = %err, "node resolution failed");
      self.console.line(&err.to_string());
    })?;
    if target.os_family().is_none() {
      let err = ScanError::UnknownOs { node: node.to_string() };
      self.console.line(&err.to_string());
      return Err(err);
    }

    let provisioner = Provisioner::new(self.config.tool.staging_dir(), self.config.tool.filter())
      .with_debug(self.config.debug);
    let ready = provisioner.ensure(&target, &self.console, can_fail_job).await;
    outcome.provisioned = Some(ready);
    if !ready {
      if can_fail_job {
        self.console.line("Could not copy Veracode libs");
        outcome.status = StepStatus::Failure;
      }
      outcome.error = Some(format!("scan tool could not be provisioned on node {}", node));
      return Ok(outcome);
    }

    let args = ScanArguments::dynamic_rescan(&self.config, &self.build, NamingMode::REMOTE);
    let canonical = provisioner.canonical_path(&target);
    let invoker = Invoker::new(self.config.tool.runtime.clone()).with_echo(self.config.debug);

    match invoker.invoke(&target, &canonical, &args, &self.env, &self.console).await {
      Ok(result) => {
        outcome.exit_code = result.exit_code;
        if !result.success() && can_fail_job {
          let code = result.exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string());
          self.console.line(&format!("Error- Returned code from wrapper:{}", code));
          outcome.status = StepStatus::Failure;
        }
      }
      Err(InvokeError::UnknownOs { node }) => return Err(ScanError::UnknownOs { node }),
      Err(InvokeError::Interrupted { .. }) => return Err(ScanError::Interrupted),
      Err(err) => {
        error!(node = %node, error = %err, "remote scan failed");
        self.console.line(&err.to_string());
        outcome.error = Some(err.to_string());
        if can_fail_job {
          outcome.status = StepStatus::Failure;
        }
      }
    }

    Ok(outcome)
  }
}
