//! Copying the scan tool onto a node and publishing its canonical name.

use std::io;
use std::path::{Component, Path};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use super::{ArtifactError, ArtifactFilter, canonical_name, find_local_artifacts, newest};
use crate::consts::PUBLISH_TMP_SUFFIX;
use crate::node::{ExecutionTarget, NodePath};
use crate::util::hash::{ContentHash, hash_file};
use crate::version::ArtifactVersion;

#[derive(Debug, Error)]
pub enum StageError {
  #[error(transparent)]
  Artifact(#[from] ArtifactError),

  #[error("artifact name has no version segment to replace: {0}")]
  NoVersionSegment(String),

  #[error("failed to create {path} on node {node}: {source}")]
  CreateDir {
    node: String,
    path: NodePath,
    #[source]
    source: io::Error,
  },

  #[error("failed to copy {from} to {to} on node {node}: {source}")]
  Copy {
    node: String,
    from: String,
    to: NodePath,
    #[source]
    source: io::Error,
  },

  #[error("failed to publish {path} on node {node}: {source}")]
  Publish {
    node: String,
    path: NodePath,
    #[source]
    source: io::Error,
  },

  #[error("failed to hash {path}: {source}")]
  Hash {
    path: String,
    #[source]
    source: io::Error,
  },
}

/// Result of a successful staging pass.
#[derive(Debug, Clone, Serialize)]
pub struct StagedArtifact {
  /// The artifact under its release filename.
  pub original: NodePath,
  /// The same artifact under its canonical filename.
  pub canonical: NodePath,
  pub version: ArtifactVersion,
  pub sha256: ContentHash,
  pub files_copied: usize,
}

/// Copies every artifact under `source_dir` into `target_dir` on the node and
/// publishes the newest one under its canonical name.
///
/// The canonical copy is written to a temporary name first and renamed into
/// place, so readers never observe a partially written canonical artifact.
/// The release-named copy stays in place. Nothing is cleaned up on failure;
/// the next provisioning pass finds the canonical artifact missing and
/// republishes it with [`publish`].
pub async fn stage<T: ExecutionTarget>(
  target: &T,
  source_dir: &Path,
  target_dir: &NodePath,
  filter: &ArtifactFilter,
) -> Result<StagedArtifact, StageError> {
  let node = target.node_id().to_string();
  let artifacts = find_local_artifacts(source_dir, filter)?;
  let chosen = newest(&artifacts).cloned().ok_or_else(|| ArtifactError::NotFound {
    dir: source_dir.to_path_buf(),
    extension: filter.extension().to_string(),
  })?;

  let canonical_file = canonical_name(&chosen.name).ok_or_else(|| StageError::NoVersionSegment(chosen.name.clone()))?;

  let mut original = None;
  for artifact in &artifacts {
    let dest = node_path_for(target_dir, &artifact.relative);
    if let Some(parent) = parent_of(target_dir, &artifact.relative) {
      target
        .create_dir_all(&parent)
        .await
        .map_err(|source| StageError::CreateDir {
          node: node.clone(),
          path: parent.clone(),
          source,
        })?;
    }

    debug!(node = %node, from = %artifact.path.display(), to = %dest, "copying artifact");
    target
      .upload(&artifact.path, &dest)
      .await
      .map_err(|source| StageError::Copy {
        node: node.clone(),
        from: artifact.path.display().to_string(),
        to: dest.clone(),
        source,
      })?;

    if artifact.path == chosen.path {
      original = Some(dest);
    }
  }
  let original = original.unwrap_or_else(|| node_path_for(target_dir, &chosen.relative));

  let canonical = publish(target, &original, target_dir, &canonical_file).await?;

  let sha256 = hash_file(&chosen.path).map_err(|source| StageError::Hash {
    path: chosen.path.display().to_string(),
    source,
  })?;

  info!(
    node = %node,
    artifact = %chosen.name,
    version = %chosen.version,
    canonical = %canonical,
    "staged scan tool"
  );

  Ok(StagedArtifact {
    original,
    canonical,
    version: chosen.version,
    sha256,
    files_copied: artifacts.len(),
  })
}

/// Publishes `original`, already on the node, as `target_dir/canonical_file`.
///
/// Goes through a temporary name in the same directory so the canonical path
/// only ever appears complete.
pub async fn publish<T: ExecutionTarget>(
  target: &T,
  original: &NodePath,
  target_dir: &NodePath,
  canonical_file: &str,
) -> Result<NodePath, StageError> {
  let node = target.node_id();
  let canonical = target_dir.join(canonical_file);
  let temp = target_dir.join(&format!(".{}.{}{}", canonical_file, std::process::id(), PUBLISH_TMP_SUFFIX));

  target
    .copy_file(original, &temp)
    .await
    .map_err(|source| StageError::Copy {
      node: node.to_string(),
      from: original.to_string(),
      to: temp.clone(),
      source,
    })?;
  target
    .rename(&temp, &canonical)
    .await
    .map_err(|source| StageError::Publish {
      node: node.to_string(),
      path: canonical.clone(),
      source,
    })?;

  debug!(node = %node, from = %original, to = %canonical, "published canonical artifact");
  Ok(canonical)
}

fn components(relative: &Path) -> Vec<String> {
  relative
    .components()
    .filter_map(|c| match c {
      Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
      _ => None,
    })
    .collect()
}

fn node_path_for(base: &NodePath, relative: &Path) -> NodePath {
  components(relative).iter().fold(base.clone(), |path, part| path.join(part))
}

fn parent_of(base: &NodePath, relative: &Path) -> Option<NodePath> {
  let parts = components(relative);
  if parts.len() < 2 {
    return None;
  }
  Some(parts[..parts.len() - 1].iter().fold(base.clone(), |path, part| path.join(part)))
}
