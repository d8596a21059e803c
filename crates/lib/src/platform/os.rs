use std::fmt;

use serde::Serialize;

/// Operating system family of an execution node.
///
/// Only the distinction that affects path separators and command quoting is
/// modelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
  Posix,
  Windows,
}

impl OsFamily {
  /// Family of the machine this process runs on.
  pub fn current() -> Self {
    if cfg!(windows) { Self::Windows } else { Self::Posix }
  }

  pub fn is_posix(&self) -> bool {
    matches!(self, Self::Posix)
  }

  /// Path separator used on nodes of this family.
  pub fn separator(&self) -> char {
    match self {
      Self::Posix => '/',
      Self::Windows => '\\',
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Posix => "posix",
      Self::Windows => "windows",
    }
  }
}

impl fmt::Display for OsFamily {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// Guesses the separator of a node from one of its paths.
///
/// Used when the OS family of a node is not known yet.
pub fn separator_of(path: &str) -> char {
  if path.contains('\\') { '\\' } else { '/' }
}
