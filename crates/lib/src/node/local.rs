//! Execution target backed by the local filesystem.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::fs;
use tokio::process::{Child, Command};
use tracing::debug;

use super::{ExecutionTarget, NodeError, NodePath, NodeResolver};
use crate::platform::OsFamily;

/// A node whose filesystem is reachable through local paths.
///
/// This is the orchestrating machine itself, or a node whose tools root is
/// mounted locally (in which case it is reported as remote).
#[derive(Debug, Clone)]
pub struct LocalTarget {
  node_id: String,
  remote: bool,
  os: OsFamily,
  tools_dir: NodePath,
}

impl LocalTarget {
  /// The orchestrating machine, provisioning into `tools_dir`.
  pub fn this_machine(tools_dir: &Path) -> Self {
    Self {
      node_id: "local".to_string(),
      remote: false,
      os: OsFamily::current(),
      tools_dir: NodePath::from_local(tools_dir),
    }
  }

  /// A node reached through a locally mounted root directory.
  pub fn mounted(node_id: impl Into<String>, tools_dir: &Path) -> Self {
    Self {
      node_id: node_id.into(),
      remote: true,
      os: OsFamily::current(),
      tools_dir: NodePath::from_local(tools_dir),
    }
  }
}

fn local(path: &NodePath) -> &Path {
  Path::new(path.as_str())
}

impl ExecutionTarget for LocalTarget {
  fn node_id(&self) -> &str {
    &self.node_id
  }

  fn is_remote(&self) -> bool {
    self.remote
  }

  fn os_family(&self) -> Option<OsFamily> {
    Some(self.os)
  }

  fn tools_dir(&self) -> &NodePath {
    &self.tools_dir
  }

  async fn exists(&self, path: &NodePath) -> io::Result<bool> {
    fs::try_exists(local(path)).await
  }

  async fn create_dir_all(&self, path: &NodePath) -> io::Result<()> {
    fs::create_dir_all(local(path)).await
  }

  async fn list_files(&self, dir: &NodePath, extension: &str) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = fs::read_dir(local(dir)).await?;
    while let Some(entry) = entries.next_entry().await? {
      if !entry.file_type().await?.is_file() {
        continue;
      }
      if let Some(name) = entry.file_name().to_str()
        && name.ends_with(extension)
      {
        names.push(name.to_string());
      }
    }
    names.sort();
    Ok(names)
  }

  async fn clear_dir(&self, dir: &NodePath) -> io::Result<()> {
    let mut entries = fs::read_dir(local(dir)).await?;
    while let Some(entry) = entries.next_entry().await? {
      let path = entry.path();
      if entry.file_type().await?.is_dir() {
        fs::remove_dir_all(&path).await?;
      } else {
        fs::remove_file(&path).await?;
      }
    }
    Ok(())
  }

  async fn upload(&self, source: &Path, dest: &NodePath) -> io::Result<()> {
    // fs::copy carries permission bits over.
    fs::copy(source, local(dest)).await.map(|_| ())
  }

  async fn copy_file(&self, from: &NodePath, to: &NodePath) -> io::Result<()> {
    fs::copy(local(from), local(to)).await.map(|_| ())
  }

  async fn rename(&self, from: &NodePath, to: &NodePath) -> io::Result<()> {
    fs::rename(local(from), local(to)).await
  }

  fn spawn(&self, command: &[String], env: &BTreeMap<String, String>) -> io::Result<Child> {
    let (program, args) = command
      .split_first()
      .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command line"))?;

    debug!(node = %self.node_id, program = %program, "spawning process");

    Command::new(program)
      .args(args)
      .envs(env)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()
  }
}

/// Resolves node names to locally mounted node roots.
#[derive(Debug, Clone, Default)]
pub struct LocalResolver {
  roots: BTreeMap<String, PathBuf>,
  tools_dir_name: String,
}

impl LocalResolver {
  pub fn new(tools_dir_name: impl Into<String>) -> Self {
    Self {
      roots: BTreeMap::new(),
      tools_dir_name: tools_dir_name.into(),
    }
  }

  /// Registers `root` as the mount point of `node`.
  pub fn with_node(mut self, node: impl Into<String>, root: impl Into<PathBuf>) -> Self {
    self.roots.insert(node.into(), root.into());
    self
  }
}

impl NodeResolver for LocalResolver {
  type Target = LocalTarget;

  async fn resolve(&self, node: &str) -> Result<LocalTarget, NodeError> {
    let root = self.roots.get(node).ok_or_else(|| NodeError::NotFound {
      node: node.to_string(),
    })?;

    if !fs::try_exists(root).await.unwrap_or(false) {
      return Err(NodeError::Unreachable {
        node: node.to_string(),
        message: format!("root {} is not mounted", root.display()),
      });
    }

    let root = dunce::canonicalize(root).unwrap_or_else(|_| root.clone());
    Ok(LocalTarget::mounted(node, &root.join(&self.tools_dir_name)))
  }
}
