//! Step configuration.
//!
//! One struct replaces the recorder's loose flags. It is read from TOML, then
//! environment variables fill in credentials and the staging directory.
//!
//! ```toml
//! application_name = "storefront"
//! dvr_enabled = true
//! can_fail_job = true
//!
//! [credentials]
//! id = "..."
//!
//! [proxy]
//! enabled = true
//! host = "proxy.internal"
//! port = 3128
//!
//! [tool]
//! runtime = ["java", "-jar"]
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::artifact::ArtifactFilter;
use crate::consts::{API_ID_ENV, API_KEY_ENV, ARTIFACT_EXTENSION, STAGING_DIR_ENV, TOOLS_DIR_NAME};
use crate::node::SshOptions;
use crate::platform::paths;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config {}: {source}", .path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config {}: {source}", .path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("missing required setting: {0}")]
  Missing(&'static str),

  #[error("tool runtime must not contain empty entries")]
  EmptyRuntimeEntry,
}

/// A value that must never be printed.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
  pub fn new(value: impl Into<String>) -> Self {
    Self(value.into())
  }

  pub fn expose(&self) -> &str {
    &self.0
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl fmt::Debug for Secret {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.0.is_empty() {
      f.write_str("Secret(<empty>)")
    } else {
      f.write_str("Secret(<redacted>)")
    }
  }
}

/// API credentials for the scan service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Credentials {
  pub id: String,
  pub key: Secret,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
  pub enabled: bool,
  pub host: String,
  pub port: u16,
  pub user: Option<String>,
  pub password: Option<Secret>,
}

/// Where the scan tool comes from and how it is launched.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
  /// Local directory holding the versioned artifact; see [`paths::staging_dir`].
  pub staging_dir: Option<PathBuf>,
  /// Artifact file extension.
  pub extension: String,
  /// Launch prefix placed before the artifact path.
  pub runtime: Vec<String>,
  /// Tools directory name on nodes.
  pub tools_dir_name: String,
}

impl Default for ToolConfig {
  fn default() -> Self {
    Self {
      staging_dir: None,
      extension: ARTIFACT_EXTENSION.to_string(),
      runtime: vec!["java".to_string(), "-jar".to_string()],
      tools_dir_name: TOOLS_DIR_NAME.to_string(),
    }
  }
}

impl ToolConfig {
  pub fn staging_dir(&self) -> PathBuf {
    self.staging_dir.clone().unwrap_or_else(paths::staging_dir)
  }

  pub fn filter(&self) -> ArtifactFilter {
    ArtifactFilter::new(self.extension.as_str())
  }
}

/// How remote nodes are reached.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SshConfig {
  pub program: String,
  pub args: Vec<String>,
  pub scp_program: String,
  pub scp_args: Vec<String>,
  /// Root of the tools directory on nodes; the node's home when unset.
  pub tools_root: Option<String>,
}

impl Default for SshConfig {
  fn default() -> Self {
    let defaults = SshOptions::default();
    Self {
      program: defaults.program,
      args: defaults.args,
      scp_program: defaults.scp_program,
      scp_args: defaults.scp_args,
      tools_root: defaults.tools_root,
    }
  }
}

/// Configuration of one scan step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
  /// Application to rescan.
  pub application_name: String,
  /// Enable dynamic vulnerability rescan.
  pub dvr_enabled: bool,
  /// Mark the build failed when the scan or its setup fails.
  pub can_fail_job: bool,
  /// Echo diagnostics and the masked command line to the build console.
  pub debug: bool,
  pub credentials: Credentials,
  pub proxy: ProxyConfig,
  pub tool: ToolConfig,
  pub ssh: SshConfig,
}

impl ScanConfig {
  /// Reads a TOML config file.
  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Reads `path` when given, otherwise starts from defaults, then applies
  /// environment overrides.
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    let mut config = match path {
      Some(path) => Self::from_file(path)?,
      None => Self::default(),
    };
    config.apply_env();
    Ok(config)
  }

  /// Fills empty credentials from `VERACODE_API_ID`/`VERACODE_API_KEY` and
  /// lets `DYNRESCAN_STAGING_DIR` override the staging directory.
  pub fn apply_env(&mut self) {
    if self.credentials.id.is_empty()
      && let Ok(id) = std::env::var(API_ID_ENV)
    {
      self.credentials.id = id;
    }
    if self.credentials.key.is_empty()
      && let Ok(key) = std::env::var(API_KEY_ENV)
    {
      self.credentials.key = Secret::new(key);
    }
    if let Some(dir) = std::env::var_os(STAGING_DIR_ENV) {
      self.tool.staging_dir = Some(PathBuf::from(dir));
    }
  }

  /// Checks the settings a scan cannot run without.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.application_name.trim().is_empty() {
      return Err(ConfigError::Missing("application_name"));
    }
    if self.tool.runtime.iter().any(|entry| entry.trim().is_empty()) {
      return Err(ConfigError::EmptyRuntimeEntry);
    }
    if self.proxy.enabled && self.proxy.host.trim().is_empty() {
      return Err(ConfigError::Missing("proxy.host"));
    }
    Ok(())
  }

  pub fn ssh_options(&self) -> SshOptions {
    SshOptions {
      program: self.ssh.program.clone(),
      args: self.ssh.args.clone(),
      scp_program: self.ssh.scp_program.clone(),
      scp_args: self.ssh.scp_args.clone(),
      tools_root: self.ssh.tools_root.clone(),
      tools_dir_name: self.tool.tools_dir_name.clone(),
    }
  }
}
