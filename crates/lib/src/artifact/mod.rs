//! Scan tool artifacts: selection, canonical naming, staging.
//!
//! Releases of the scan tool are shipped under versioned filenames. Nodes
//! invoke the tool under a fixed canonical name instead, so the invocation
//! does not change when a newer release is provisioned.

use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

use crate::consts::{CANONICAL_STEM, PUBLISH_TMP_SUFFIX};
use crate::version::{ArtifactVersion, split_versioned, version_or_lowest};

mod stage;

pub use stage::{StageError, StagedArtifact, publish, stage};

#[derive(Debug, Error)]
pub enum ArtifactError {
  #[error("no scan tool artifact matching *{extension} in {}", .dir.display())]
  NotFound { dir: PathBuf, extension: String },

  #[error("failed to read staging directory {}: {source}", .dir.display())]
  Walk {
    dir: PathBuf,
    #[source]
    source: walkdir::Error,
  },
}

/// Inclusion filter for artifact files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFilter {
  extension: String,
}

impl ArtifactFilter {
  pub fn new(extension: impl Into<String>) -> Self {
    let extension = extension.into();
    let extension = if extension.starts_with('.') || extension.is_empty() {
      extension
    } else {
      format!(".{}", extension)
    };
    Self { extension }
  }

  pub fn extension(&self) -> &str {
    &self.extension
  }

  pub fn matches(&self, name: &str) -> bool {
    name.ends_with(&self.extension) && !name.ends_with(PUBLISH_TMP_SUFFIX)
  }

  /// The fixed name artifacts of this kind are published under.
  pub fn canonical_file_name(&self) -> String {
    format!("{}{}", CANONICAL_STEM, self.extension)
  }

  pub fn is_canonical(&self, name: &str) -> bool {
    name == self.canonical_file_name()
  }
}

/// Derives the canonical filename of a versioned artifact.
///
/// The stem and version segment are replaced by [`CANONICAL_STEM`]; the
/// extension is kept. Returns `None` when the name has no version segment.
///
/// `vosp-api-wrappers-java-23.8.12.0.jar` becomes `VeracodeJavaAPI.jar`.
pub fn canonical_name(name: &str) -> Option<String> {
  let parts = split_versioned(name)?;
  Some(format!("{}{}", CANONICAL_STEM, parts.extension))
}

/// An artifact found in the local staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArtifact {
  pub path: PathBuf,
  /// Path relative to the staging directory.
  pub relative: PathBuf,
  pub name: String,
  pub version: ArtifactVersion,
}

/// Recursively collects the artifacts under `dir`, sorted by relative path.
pub fn find_local_artifacts(dir: &Path, filter: &ArtifactFilter) -> Result<Vec<LocalArtifact>, ArtifactError> {
  let mut found = Vec::new();

  for entry in WalkDir::new(dir).sort_by_file_name() {
    let entry = entry.map_err(|source| ArtifactError::Walk {
      dir: dir.to_path_buf(),
      source,
    })?;
    if !entry.file_type().is_file() {
      continue;
    }
    let Some(name) = entry.file_name().to_str() else {
      continue;
    };
    if !filter.matches(name) {
      continue;
    }

    let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path()).to_path_buf();
    found.push(LocalArtifact {
      path: entry.path().to_path_buf(),
      relative,
      name: name.to_string(),
      version: version_or_lowest(name),
    });
  }

  Ok(found)
}

/// Picks the highest-versioned artifact; ties go to the later name.
pub fn newest(artifacts: &[LocalArtifact]) -> Option<&LocalArtifact> {
  artifacts.iter().max_by(|a, b| a.version.cmp(&b.version).then_with(|| a.name.cmp(&b.name)))
}

/// The artifact in the staging directory that provisioning publishes.
pub fn local_artifact(dir: &Path, filter: &ArtifactFilter) -> Result<LocalArtifact, ArtifactError> {
  let artifacts = find_local_artifacts(dir, filter)?;
  newest(&artifacts).cloned().ok_or_else(|| ArtifactError::NotFound {
    dir: dir.to_path_buf(),
    extension: filter.extension().to_string(),
  })
}
