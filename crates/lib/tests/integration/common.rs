//! Shared fixtures: a staging directory, node roots and a step builder.

use std::fs;
use std::path::{Path, PathBuf};

use dynrescan_lib::args::BuildIdentity;
use dynrescan_lib::config::{Credentials, ScanConfig, Secret};
use dynrescan_lib::console::Console;
use dynrescan_lib::engine::ArtifactEngine;
use dynrescan_lib::node::LocalResolver;
use dynrescan_lib::orchestrate::ScanOrchestrator;
use tempfile::TempDir;

pub const TOOLS_DIR: &str = "veracode";
pub const CANONICAL: &str = "VeracodeJavaAPI.jar";

/// Writes a scan tool stand-in that prints `label` and its arguments, then
/// exits with `code`.
pub fn write_tool(dir: &Path, name: &str, label: &str, code: i32) -> PathBuf {
  fs::create_dir_all(dir).unwrap();
  let path = dir.join(name);
  fs::write(&path, format!("echo \"{} $@\"\nexit {}\n", label, code)).unwrap();
  path
}

/// Isolated staging directory and node roots.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  pub fn staging_dir(&self) -> PathBuf {
    let p = self.temp.path().join("staging");
    fs::create_dir_all(&p).unwrap();
    p
  }

  /// Root of a node's filesystem; its tools directory is `<root>/veracode`.
  pub fn node_root(&self, node: &str) -> PathBuf {
    let p = self.temp.path().join("nodes").join(node);
    fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  pub fn tools_dir(&self, node: &str) -> PathBuf {
    self.node_root(node).join(TOOLS_DIR)
  }

  /// Puts a local release of the tool into the staging directory.
  pub fn stage_release(&self, version: &str, code: i32) -> PathBuf {
    write_tool(
      &self.staging_dir(),
      &format!("VeracodeJavaAPI-{}.jar", version),
      &format!("release {}", version),
      code,
    )
  }

  pub fn config(&self, can_fail_job: bool) -> ScanConfig {
    let mut config = ScanConfig {
      application_name: "storefront".to_string(),
      can_fail_job,
      credentials: Credentials {
        id: "api-id".to_string(),
        key: Secret::new("api-key"),
      },
      ..Default::default()
    };
    config.tool.staging_dir = Some(self.staging_dir());
    config.tool.runtime = vec!["/bin/sh".to_string()];
    config
  }

  pub fn resolver(&self, nodes: &[&str]) -> LocalResolver {
    nodes
      .iter()
      .fold(LocalResolver::new(TOOLS_DIR), |r, node| r.with_node(*node, self.node_root(node)))
  }

  pub fn orchestrator(
    &self,
    config: ScanConfig,
    resolver: LocalResolver,
    console: Console,
  ) -> ScanOrchestrator<LocalResolver, ArtifactEngine> {
    let engine = ArtifactEngine::new(self.staging_dir(), config.tool.filter(), config.tool.runtime.clone());
    ScanOrchestrator::new(
      config,
      BuildIdentity::new("#12", "shop/storefront"),
      resolver,
      engine,
      console,
    )
  }
}

/// Sorted file names directly inside `dir`.
pub fn file_names(dir: &Path) -> Vec<String> {
  let mut names: Vec<String> = fs::read_dir(dir)
    .unwrap()
    .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
    .collect();
  names.sort();
  names
}
