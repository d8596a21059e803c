//! Version extraction from artifact filenames.
//!
//! Release filenames carry their version as a delimiter-bounded dotted
//! numeric segment right before the extension, e.g.
//! `vosp-api-wrappers-java-23.8.12.0.jar`. The segment is packed into a single
//! integer so versions compare with plain integer ordering.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// `<stem><-|_><version><.ext>?`; the version is the last numeric run before
/// the extension, with at most four components.
static VERSIONED_NAME: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^(?P<stem>.+?)[-_](?P<version>\d+(?:\.\d+){0,3})(?P<ext>\.[A-Za-z][A-Za-z0-9]*)?$")
    .expect("versioned filename pattern is valid")
});

/// Bits reserved for each version component.
const COMPONENT_BITS: u32 = 16;
const MAX_COMPONENTS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
  #[error("no version token in artifact name: {0}")]
  NoVersionToken(String),

  #[error("version component {component} out of range in artifact name: {name}")]
  ComponentOutOfRange { name: String, component: String },
}

/// A comparable artifact version.
///
/// Two artifacts with equal versions are interchangeable regardless of their
/// filenames. Unversioned names sit in their own slot below every packed
/// value, so `0.0.0.0` still outranks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ArtifactVersion(Option<u64>);

impl ArtifactVersion {
  /// Version assigned to artifacts whose name carries no parseable version.
  pub const LOWEST: Self = Self(None);

  /// A parsed version from its packed, left-aligned components.
  pub const fn from_packed(packed: u64) -> Self {
    Self(Some(packed))
  }

  /// The packed components, `None` for [`ArtifactVersion::LOWEST`].
  pub fn packed(&self) -> Option<u64> {
    self.0
  }
}

impl fmt::Display for ArtifactVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let Some(packed) = self.0 else {
      return f.write_str("unversioned");
    };
    let parts: Vec<String> = (0..MAX_COMPONENTS)
      .rev()
      .map(|i| ((packed >> (i as u32 * COMPONENT_BITS)) & 0xffff).to_string())
      .collect();
    write!(f, "{}", parts.join("."))
  }
}

impl Serialize for ArtifactVersion {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

/// The pieces of a versioned filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedName<'a> {
  pub stem: &'a str,
  pub version: &'a str,
  pub extension: &'a str,
}

/// Splits a filename into stem, version segment and extension.
///
/// Only the final path component is considered, so both `/` and `\`
/// separated paths are accepted.
pub fn split_versioned(name: &str) -> Option<VersionedName<'_>> {
  let file_name = file_name_of(name);
  let caps = VERSIONED_NAME.captures(file_name)?;
  Some(VersionedName {
    stem: caps.name("stem")?.as_str(),
    version: caps.name("version")?.as_str(),
    extension: caps.name("ext").map(|m| m.as_str()).unwrap_or(""),
  })
}

/// Extracts the version of an artifact from its filename.
pub fn extract_version(name: &str) -> Result<ArtifactVersion, VersionError> {
  let parts = split_versioned(name).ok_or_else(|| VersionError::NoVersionToken(name.to_string()))?;

  let mut packed: u64 = 0;
  let mut count = 0;
  for component in parts.version.split('.') {
    let value: u16 = component.parse().map_err(|_| VersionError::ComponentOutOfRange {
      name: name.to_string(),
      component: component.to_string(),
    })?;
    packed = (packed << COMPONENT_BITS) | u64::from(value);
    count += 1;
  }
  // Left-align so 23.8 and 23.8.0.0 compare equal.
  packed <<= COMPONENT_BITS * (MAX_COMPONENTS - count) as u32;

  Ok(ArtifactVersion::from_packed(packed))
}

/// Like [`extract_version`], but treats an unparseable name as the lowest
/// version instead of failing.
pub fn version_or_lowest(name: &str) -> ArtifactVersion {
  match extract_version(name) {
    Ok(version) => version,
    Err(err) => {
      tracing::debug!(error = %err, "treating artifact as lowest version");
      ArtifactVersion::LOWEST
    }
  }
}

fn file_name_of(path: &str) -> &str {
  path.rsplit(['/', '\\']).next().unwrap_or(path)
}
