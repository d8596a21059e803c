use std::path::PathBuf;

use crate::consts::{APP_NAME, STAGING_DIR_ENV};

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("USERPROFILE").map(PathBuf::from)
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("HOME").map(PathBuf::from)
}

/// Returns the directory for data files for the application
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  std::env::var_os("APPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("."))
    .join(APP_NAME)
}

/// Returns the directory for data files for the application
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  let data_home = std::env::var_os("XDG_DATA_HOME")
    .map(PathBuf::from)
    .or_else(|| home_dir().map(|home| home.join(".local").join("share")))
    .unwrap_or_else(|| PathBuf::from("."));
  data_home.join(APP_NAME)
}

/// Returns the local directory the scan tool artifact is staged in before
/// it is provisioned onto nodes.
///
/// `DYNRESCAN_STAGING_DIR` takes precedence over the data directory.
pub fn staging_dir() -> PathBuf {
  std::env::var_os(STAGING_DIR_ENV)
    .map(PathBuf::from)
    .unwrap_or_else(|| data_dir().join("staging"))
}
