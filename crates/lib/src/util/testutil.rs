//! Test utilities for dynrescan-lib.
//!
//! Scan tool stand-ins: small shell scripts written under artifact-like
//! names and launched through `/bin/sh` as the runtime prefix.

use std::fs;
use std::path::{Path, PathBuf};

/// Runtime prefix that executes a script artifact.
#[cfg(unix)]
pub fn script_runtime() -> Vec<String> {
  vec!["/bin/sh".to_string()]
}

#[cfg(windows)]
pub fn script_runtime() -> Vec<String> {
  vec!["cmd.exe".to_string(), "/C".to_string()]
}

/// Writes a script artifact that prints its arguments and exits with `code`.
#[cfg(unix)]
pub fn write_tool(dir: &Path, name: &str, code: i32) -> PathBuf {
  write_script(dir, name, &format!("echo \"scan tool $@\"\nexit {}\n", code))
}

#[cfg(windows)]
pub fn write_tool(dir: &Path, name: &str, code: i32) -> PathBuf {
  write_script(dir, name, &format!("@echo scan tool %*\r\n@exit /b {}\r\n", code))
}

/// Writes an arbitrary script body under `dir/name`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
  fs::create_dir_all(dir).unwrap();
  let path = dir.join(name);
  fs::write(&path, body).unwrap();
  path
}
