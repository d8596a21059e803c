//! Execution targets: the nodes a scan can be provisioned onto and run on.
//!
//! A node is reached through an [`ExecutionTarget`], which exposes the few
//! filesystem and process capabilities provisioning and invocation need.
//! Production targets are [`LocalTarget`] (this machine, or any node whose
//! filesystem is mounted locally) and [`SshTarget`]. Targets are resolved
//! per invocation and never cached, since nodes can go offline between
//! builds.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tokio::process::Child;

use crate::platform::OsFamily;
use crate::platform::os::separator_of;

mod local;
mod ssh;

pub use local::{LocalResolver, LocalTarget};
pub use ssh::{SshOptions, SshResolver, SshTarget};

/// Failures to locate a node or its tools directory.
///
/// These are fatal for a scan step and are never retried.
#[derive(Debug, Error)]
pub enum NodeError {
  #[error("Cannot locate the remote node: {node}")]
  NotFound { node: String },

  #[error("Cannot reach node {node}: {message}")]
  Unreachable { node: String, message: String },

  #[error("Cannot retrieve the remote file path on node {node}")]
  NoToolsDir { node: String },
}

/// A path on a node, joined with the node's own separator.
///
/// Nodes may run a different OS than the orchestrator, so `PathBuf` is not
/// used for remote paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NodePath {
  raw: String,
  #[serde(skip)]
  separator: char,
}

impl NodePath {
  pub fn new(raw: impl Into<String>, separator: char) -> Self {
    Self {
      raw: raw.into(),
      separator,
    }
  }

  /// Builds a path, guessing the separator from the path itself.
  pub fn guess(raw: impl Into<String>) -> Self {
    let raw = raw.into();
    let separator = separator_of(&raw);
    Self { raw, separator }
  }

  pub fn from_local(path: &Path) -> Self {
    Self::new(path.to_string_lossy(), std::path::MAIN_SEPARATOR)
  }

  pub fn join(&self, name: &str) -> Self {
    let raw = if self.raw.is_empty() {
      name.to_string()
    } else if self.raw.ends_with(self.separator) {
      format!("{}{}", self.raw, name)
    } else {
      format!("{}{}{}", self.raw, self.separator, name)
    };
    Self::new(raw, self.separator)
  }

  /// Final component of the path.
  pub fn file_name(&self) -> &str {
    self
      .raw
      .trim_end_matches(self.separator)
      .rsplit(self.separator)
      .next()
      .unwrap_or("")
  }

  pub fn as_str(&self) -> &str {
    &self.raw
  }

  pub fn separator(&self) -> char {
    self.separator
  }
}

impl fmt::Display for NodePath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.raw)
  }
}

/// Capabilities of a node that can host and run the scan tool.
///
/// Filesystem methods operate on paths of the node; `upload` is the only
/// method that reads the orchestrator's local filesystem.
pub trait ExecutionTarget: Sync {
  /// Unique identifier of the node.
  fn node_id(&self) -> &str;

  /// Whether the node is a different machine than the orchestrator.
  fn is_remote(&self) -> bool;

  /// OS family of the node, `None` when it could not be determined.
  fn os_family(&self) -> Option<OsFamily>;

  /// Directory the scan tool is provisioned into on this node.
  fn tools_dir(&self) -> &NodePath;

  fn exists(&self, path: &NodePath) -> impl Future<Output = io::Result<bool>> + Send;

  fn create_dir_all(&self, path: &NodePath) -> impl Future<Output = io::Result<()>> + Send;

  /// Names of the regular files directly inside `dir` ending in `extension`.
  fn list_files(&self, dir: &NodePath, extension: &str) -> impl Future<Output = io::Result<Vec<String>>> + Send;

  /// Removes everything inside `dir`, keeping `dir` itself.
  fn clear_dir(&self, dir: &NodePath) -> impl Future<Output = io::Result<()>> + Send;

  /// Copies a local file onto the node, preserving permissions.
  fn upload(&self, local: &Path, dest: &NodePath) -> impl Future<Output = io::Result<()>> + Send;

  /// Copies a file within the node, preserving permissions.
  fn copy_file(&self, from: &NodePath, to: &NodePath) -> impl Future<Output = io::Result<()>> + Send;

  /// Renames a file within the node, replacing any existing destination.
  fn rename(&self, from: &NodePath, to: &NodePath) -> impl Future<Output = io::Result<()>> + Send;

  /// Starts `command` on the node with `env` applied on top of the node's
  /// environment. Stdout and stderr are piped; the child is killed when
  /// dropped.
  fn spawn(&self, command: &[String], env: &BTreeMap<String, String>) -> io::Result<Child>;
}

/// Resolves a node identifier to an execution target.
pub trait NodeResolver {
  type Target: ExecutionTarget;

  fn resolve(&self, node: &str) -> impl Future<Output = Result<Self::Target, NodeError>> + Send;
}
