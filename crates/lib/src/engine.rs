//! The scan engine used for workspaces on the orchestrating machine.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;

use crate::args::ScanArguments;
use crate::artifact::{self, ArtifactError, ArtifactFilter};
use crate::console::Console;
use crate::invoke::{InvokeError, Invoker};
use crate::node::{LocalTarget, NodePath};

#[derive(Debug, Error)]
pub enum EngineError {
  #[error(transparent)]
  Artifact(#[from] ArtifactError),

  #[error(transparent)]
  Invoke(#[from] InvokeError),
}

/// Runs a scan request and reports the tool's return code.
pub trait ScanEngine: Sync {
  /// Build metadata of the engine, shown in debug output.
  fn version_info(&self) -> Option<String>;

  fn run(&self, arguments: &ScanArguments, console: &Console) -> impl Future<Output = Result<i32, EngineError>> + Send;
}

/// Runs the newest artifact of the local staging directory as a child process.
#[derive(Debug, Clone)]
pub struct ArtifactEngine {
  staging_dir: PathBuf,
  filter: ArtifactFilter,
  runtime: Vec<String>,
  env: BTreeMap<String, String>,
}

impl ArtifactEngine {
  pub fn new(staging_dir: impl Into<PathBuf>, filter: ArtifactFilter, runtime: Vec<String>) -> Self {
    Self {
      staging_dir: staging_dir.into(),
      filter,
      runtime,
      env: BTreeMap::new(),
    }
  }

  pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
    self.env = env;
    self
  }
}

impl ScanEngine for ArtifactEngine {
  fn version_info(&self) -> Option<String> {
    let artifact = artifact::local_artifact(&self.staging_dir, &self.filter).ok()?;
    Some(format!("{} (version {})", artifact.name, artifact.version))
  }

  async fn run(&self, arguments: &ScanArguments, console: &Console) -> Result<i32, EngineError> {
    let artifact = artifact::local_artifact(&self.staging_dir, &self.filter)?;
    debug!(artifact = %artifact.path.display(), "running local scan engine");

    let target = LocalTarget::this_machine(&self.staging_dir);
    let result = Invoker::new(self.runtime.clone())
      .invoke(&target, &NodePath::from_local(&artifact.path), arguments, &self.env, console)
      .await?;

    // Signal termination has no code; report it as a generic failure.
    Ok(result.exit_code.unwrap_or(-1))
  }
}
