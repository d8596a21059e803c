//! Lazy, version-aware provisioning of the scan tool onto a node.
//!
//! [`Provisioner::ensure`] is safe to call once per build: it copies the tool
//! only when the node has none or an older release, and otherwise just checks
//! that the canonical artifact is still there. A canonical artifact lost after
//! an interrupted pass is republished from the node's newest release copy.
//!
//! The tools directory is shared by every build that targets the node, and
//! the check-then-stage sequence is not guarded by a lock. Two builds can both
//! decide to clear and restage at once; the loser may see the artifact
//! missing and report a provisioning failure. Such failures are transient and
//! converge on the next build. The canonical name itself is published by
//! rename, so a present canonical artifact is always complete.

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::artifact::{self, ArtifactError, ArtifactFilter, StageError, StagedArtifact};
use crate::console::Console;
use crate::node::{ExecutionTarget, NodePath};
use crate::version::{ArtifactVersion, version_or_lowest};

/// Internal provisioning failures. [`Provisioner::ensure`] logs these and
/// reports `false`.
#[derive(Debug, Error)]
pub enum ProvisionError {
  #[error("failed to {action} {path} on node {node}: {source}")]
  Node {
    action: &'static str,
    node: String,
    path: NodePath,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  Artifact(#[from] ArtifactError),

  #[error(transparent)]
  Stage(#[from] StageError),
}

/// What a provisioning pass did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Provisioned {
  /// The node had no artifact; the tool was staged.
  Fresh { version: ArtifactVersion },
  /// The node had an older release; it was replaced.
  Upgraded { from: ArtifactVersion, to: ArtifactVersion },
  /// The node is current and its canonical artifact is present.
  Current { version: ArtifactVersion },
  /// The node was current by version but had lost its canonical artifact;
  /// it was republished from the node's release copy.
  Repaired { version: ArtifactVersion },
}

impl Provisioned {
  pub fn version(&self) -> ArtifactVersion {
    match self {
      Self::Fresh { version } | Self::Current { version } | Self::Repaired { version } => *version,
      Self::Upgraded { to, .. } => *to,
    }
  }
}

/// Ensures a current copy of the scan tool on nodes.
#[derive(Debug, Clone)]
pub struct Provisioner {
  staging_dir: PathBuf,
  filter: ArtifactFilter,
  debug: bool,
}

impl Provisioner {
  pub fn new(staging_dir: impl Into<PathBuf>, filter: ArtifactFilter) -> Self {
    Self {
      staging_dir: staging_dir.into(),
      filter,
      debug: false,
    }
  }

  /// Echo provisioning decisions to the console.
  pub fn with_debug(mut self, debug: bool) -> Self {
    self.debug = debug;
    self
  }

  pub fn staging_dir(&self) -> &Path {
    &self.staging_dir
  }

  /// Canonical artifact path on the node.
  pub fn canonical_path<T: ExecutionTarget>(&self, target: &T) -> NodePath {
    target.tools_dir().join(&self.filter.canonical_file_name())
  }

  /// Makes sure the node's tools directory holds a current canonical artifact.
  ///
  /// Returns `true` when the artifact is ready to invoke. Every failure is
  /// logged and reported as `false`; when `verbose_failures` is set the
  /// message is echoed to the console as well.
  pub async fn ensure<T: ExecutionTarget>(&self, target: &T, console: &Console, verbose_failures: bool) -> bool {
    match self.provision(target, console).await {
      Ok(outcome) => {
        info!(node = %target.node_id(), outcome = ?outcome, "provisioning finished");
        true
      }
      Err(err) => {
        warn!(node = %target.node_id(), error = %err, "provisioning failed");
        if verbose_failures {
          if matches!(err, ProvisionError::Stage(_)) {
            console.line("Failed to copy the veracode java-wrapper libraries");
          }
          console.line(&err.to_string());
        }
        false
      }
    }
  }

  /// One provisioning pass, reporting what was done.
  pub async fn provision<T: ExecutionTarget>(&self, target: &T, console: &Console) -> Result<Provisioned, ProvisionError> {
    let node = target.node_id().to_string();
    let dir = target.tools_dir().clone();
    let node_err = |action: &'static str, path: &NodePath, source: io::Error| ProvisionError::Node {
      action,
      node: node.clone(),
      path: path.clone(),
      source,
    };

    let exists = target.exists(&dir).await.map_err(|e| node_err("inspect", &dir, e))?;
    if !exists {
      if self.debug {
        console.line("Making remote dir");
      }
      target
        .create_dir_all(&dir)
        .await
        .map_err(|e| node_err("create", &dir, e))?;
    }

    let staged_names: Vec<String> = target
      .list_files(&dir, self.filter.extension())
      .await
      .map_err(|e| node_err("list", &dir, e))?
      .into_iter()
      .filter(|name| self.filter.matches(name) && !self.filter.is_canonical(name))
      .collect();

    if staged_names.is_empty() {
      debug!(node = %node, "no staged artifact on node");
      let staged = self.stage(target, &dir, console).await?;
      return Ok(Provisioned::Fresh { version: staged.version });
    }

    let local = artifact::local_artifact(&self.staging_dir, &self.filter)?;
    let (current, newest_name) = staged_names
      .iter()
      .map(|name| (version_or_lowest(name), name))
      .max()
      .map(|(version, name)| (version, name.clone()))
      .unwrap_or((ArtifactVersion::LOWEST, String::new()));

    if local.version > current {
      if self.debug {
        console.line("Newer veracode library version, copying it to remote machine");
      }
      info!(node = %node, from = %current, to = %local.version, "replacing staged scan tool");
      target.clear_dir(&dir).await.map_err(|e| node_err("clear", &dir, e))?;
      let staged = self.stage(target, &dir, console).await?;
      return Ok(Provisioned::Upgraded {
        from: current,
        to: staged.version,
      });
    }

    let canonical = dir.join(&self.filter.canonical_file_name());
    let present = target
      .exists(&canonical)
      .await
      .map_err(|e| node_err("inspect", &canonical, e))?;
    if present {
      return Ok(Provisioned::Current { version: current });
    }

    warn!(node = %node, path = %canonical, "canonical artifact missing, republishing");
    if self.debug {
      console.line("Veracode library missing on remote machine, restoring it");
    }
    artifact::publish(target, &dir.join(&newest_name), &dir, &self.filter.canonical_file_name()).await?;
    Ok(Provisioned::Repaired { version: current })
  }

  async fn stage<T: ExecutionTarget>(
    &self,
    target: &T,
    dir: &NodePath,
    console: &Console,
  ) -> Result<StagedArtifact, ProvisionError> {
    let staged = artifact::stage(target, &self.staging_dir, dir, &self.filter).await?;
    if self.debug {
      console.line(&format!(
        "Copied {} as {} (sha256 {})",
        staged.original, staged.canonical, staged.sha256.0
      ));
    }
    Ok(staged)
  }
}
