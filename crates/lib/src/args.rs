//! Argument lists for the scan tool.
//!
//! Every list is built twice in lockstep: the real tokens and a masked copy
//! in which credential values are replaced, which is the only form ever
//! logged or echoed.

use serde::Serialize;

use crate::config::ScanConfig;
use crate::consts::MASK;

/// Ordered scan tool arguments with their masked counterpart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanArguments {
  arguments: Vec<String>,
  masked: Vec<String>,
}

impl ScanArguments {
  pub fn new() -> Self {
    Self::default()
  }

  /// Appends a flag and its value.
  pub fn push(&mut self, flag: &str, value: impl Into<String>) {
    let value = value.into();
    self.arguments.push(flag.to_string());
    self.arguments.push(value.clone());
    self.masked.push(flag.to_string());
    self.masked.push(value);
  }

  /// Appends a flag whose value must never be logged.
  pub fn push_secret(&mut self, flag: &str, value: impl Into<String>) {
    self.arguments.push(flag.to_string());
    self.arguments.push(value.into());
    self.masked.push(flag.to_string());
    self.masked.push(MASK.to_string());
  }

  pub fn arguments(&self) -> &[String] {
    &self.arguments
  }

  pub fn masked(&self) -> &[String] {
    &self.masked
  }

  pub fn len(&self) -> usize {
    self.arguments.len()
  }

  pub fn is_empty(&self) -> bool {
    self.arguments.is_empty()
  }

  /// Builds the arguments of a dynamic rescan request.
  pub fn dynamic_rescan(config: &ScanConfig, build: &BuildIdentity, naming: NamingMode) -> Self {
    let mut args = Self::new();
    args.push("-action", "DynamicRescan");
    args.push("-appname", config.application_name.as_str());
    args.push("-dvrenabled", config.dvr_enabled.to_string());
    args.push_secret("-vid", config.credentials.id.as_str());
    args.push_secret("-vkey", config.credentials.key.expose());

    let proxy = &config.proxy;
    if proxy.enabled {
      args.push("-phost", proxy.host.as_str());
      args.push("-pport", proxy.port.to_string());
      if let Some(user) = proxy.user.as_deref().filter(|u| !u.is_empty()) {
        args.push("-puser", user);
      }
      if let Some(password) = proxy.password.as_ref().filter(|p| !p.is_empty()) {
        args.push_secret("-ppassword", password.expose());
      }
    }

    args.push("-autoappname", naming.auto_application_name.to_string());
    args.push("-createappdesc", naming.create_auto_application_description.to_string());
    args.push("-autoscanname", naming.auto_scan_name.to_string());
    if !naming.auto_scan_name {
      args.push("-scanname", build.scan_name());
    }

    args
  }
}

/// Identity of the build a scan runs for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildIdentity {
  pub display_name: String,
  pub job_full_name: String,
}

impl BuildIdentity {
  pub fn new(display_name: impl Into<String>, job_full_name: impl Into<String>) -> Self {
    Self {
      display_name: display_name.into(),
      job_full_name: job_full_name.into(),
    }
  }

  fn scan_name(&self) -> String {
    match (self.job_full_name.is_empty(), self.display_name.is_empty()) {
      (false, false) => format!("{} - {}", self.job_full_name, self.display_name),
      (false, true) => self.job_full_name.clone(),
      _ => self.display_name.clone(),
    }
  }
}

/// How the scan tool should name the application and scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamingMode {
  pub auto_application_name: bool,
  pub auto_scan_name: bool,
  pub create_auto_application_description: bool,
}

impl NamingMode {
  /// Naming for scans run on the orchestrating machine.
  pub const LOCAL: Self = Self {
    auto_application_name: false,
    auto_scan_name: false,
    create_auto_application_description: false,
  };

  /// Naming for scans launched on a remote node.
  pub const REMOTE: Self = Self {
    auto_application_name: false,
    auto_scan_name: true,
    create_auto_application_description: false,
  };
}
