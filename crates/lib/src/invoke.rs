//! Launching the scan tool on a node.
//!
//! The command line is `[cmd.exe /C] <runtime...> <artifact> <args...>`,
//! where the `cmd.exe` prefix is only used on non-POSIX nodes. The child's
//! stdout and stderr are streamed line by line into the build console and the
//! call blocks until the process exits. A nonzero exit is a normal result,
//! not an error; callers decide what it means.

use std::collections::BTreeMap;
use std::io;

use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::args::ScanArguments;
use crate::console::Console;
use crate::node::{ExecutionTarget, NodePath};
use crate::platform::OsFamily;

#[derive(Debug, Error)]
pub enum InvokeError {
  #[error("Failed to determine the OS of node {node}")]
  UnknownOs { node: String },

  #[error("failed to launch {program} on node {node}: {source}")]
  Launch {
    node: String,
    program: String,
    #[source]
    source: io::Error,
  },

  #[error("scan process on node {node} was interrupted")]
  Interrupted { node: String },

  #[error("failed waiting for scan process on node {node}: {source}")]
  Wait {
    node: String,
    #[source]
    source: io::Error,
  },
}

/// Exit status of a scan process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessResult {
  /// `None` when the process was terminated by a signal.
  pub exit_code: Option<i32>,
}

impl ProcessResult {
  pub fn success(&self) -> bool {
    self.exit_code == Some(0)
  }
}

/// A command line and its masked rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
  pub tokens: Vec<String>,
  pub masked: Vec<String>,
}

impl CommandLine {
  /// Builds the launch command for a node of family `os`.
  pub fn build(os: OsFamily, runtime: &[String], artifact: &NodePath, args: &ScanArguments) -> Self {
    let mut prefix: Vec<String> = Vec::with_capacity(runtime.len() + 3);
    if !os.is_posix() {
      prefix.push("cmd.exe".to_string());
      prefix.push("/C".to_string());
    }
    prefix.extend(runtime.iter().cloned());
    prefix.push(artifact.as_str().to_string());

    let mut tokens = prefix.clone();
    tokens.extend(args.arguments().iter().cloned());
    let mut masked = prefix;
    masked.extend(args.masked().iter().cloned());

    Self { tokens, masked }
  }

  /// The masked command line as a single printable string.
  pub fn display(&self) -> String {
    shell_words::join(&self.masked)
  }
}

/// Launches the canonical artifact and reports its exit status.
#[derive(Debug, Clone)]
pub struct Invoker {
  runtime: Vec<String>,
  echo: bool,
}

impl Invoker {
  pub fn new(runtime: Vec<String>) -> Self {
    Self { runtime, echo: false }
  }

  /// Echo the masked command line to the console before launching.
  pub fn with_echo(mut self, echo: bool) -> Self {
    self.echo = echo;
    self
  }

  pub async fn invoke<T: ExecutionTarget>(
    &self,
    target: &T,
    artifact: &NodePath,
    args: &ScanArguments,
    env: &BTreeMap<String, String>,
    console: &Console,
  ) -> Result<ProcessResult, InvokeError> {
    let node = target.node_id().to_string();
    let os = target.os_family().ok_or_else(|| InvokeError::UnknownOs { node: node.clone() })?;
    let command = CommandLine::build(os, &self.runtime, artifact, args);

    if self.echo {
      if target.is_remote() {
        console.line("Invoking the following command in remote workspace:");
      } else {
        console.line("Invoking the following command:");
      }
      console.line(&command.display());
    }
    debug!(node = %node, command = %command.display(), "launching scan tool");

    let mut child = target.spawn(&command.tokens, env).map_err(|source| InvokeError::Launch {
      node: node.clone(),
      program: command.tokens.first().cloned().unwrap_or_default(),
      source,
    })?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
      tokio::spawn(forward_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
      tokio::spawn(forward_lines(stderr, tx.clone()));
    }
    drop(tx);

    while let Some(line) = rx.recv().await {
      console.line(&line);
    }

    let status = child.wait().await.map_err(|source| match source.kind() {
      io::ErrorKind::Interrupted => InvokeError::Interrupted { node: node.clone() },
      _ => InvokeError::Wait {
        node: node.clone(),
        source,
      },
    })?;

    let result = ProcessResult {
      exit_code: status.code(),
    };
    info!(node = %node, exit_code = ?result.exit_code, "scan tool exited");
    Ok(result)
  }
}

async fn forward_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::UnboundedSender<String>) {
  let mut reader = BufReader::new(reader);
  let mut buf = Vec::new();
  loop {
    buf.clear();
    match reader.read_until(b'\n', &mut buf).await {
      Ok(0) | Err(_) => break,
      Ok(_) => {
        let line = String::from_utf8_lossy(&buf);
        if tx.send(line.trim_end_matches(['\r', '\n']).to_string()).is_err() {
          break;
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::consts::MASK;
  use crate::node::LocalTarget;
  use crate::util::testutil::{script_runtime, write_tool};
  use tempfile::TempDir;

  fn args_with_secret() -> ScanArguments {
    let mut args = ScanArguments::new();
    args.push("-appname", "storefront");
    args.push_secret("-vkey", "s3cret");
    args
  }

  #[test]
  fn posix_command_line() {
    let artifact = NodePath::new("/home/ci/veracode/VeracodeJavaAPI.jar", '/');
    let runtime = vec!["java".to_string(), "-jar".to_string()];

    let command = CommandLine::build(OsFamily::Posix, &runtime, &artifact, &args_with_secret());

    assert_eq!(
      command.tokens,
      vec![
        "java",
        "-jar",
        "/home/ci/veracode/VeracodeJavaAPI.jar",
        "-appname",
        "storefront",
        "-vkey",
        "s3cret"
      ]
    );
    assert_eq!(command.masked.last().map(String::as_str), Some(MASK));
  }

  #[test]
  fn windows_command_line_goes_through_cmd() {
    let artifact = NodePath::new(r"C:\Users\ci\veracode\VeracodeJavaAPI.jar", '\\');
    let runtime = vec!["java".to_string(), "-jar".to_string()];

    let command = CommandLine::build(OsFamily::Windows, &runtime, &artifact, &ScanArguments::new());

    assert_eq!(
      command.tokens,
      vec!["cmd.exe", "/C", "java", "-jar", r"C:\Users\ci\veracode\VeracodeJavaAPI.jar"]
    );
  }

  #[test]
  fn display_never_contains_secret() {
    let artifact = NodePath::new("/t/VeracodeJavaAPI.jar", '/');
    let command = CommandLine::build(OsFamily::Posix, &[], &artifact, &args_with_secret());
    assert!(!command.display().contains("s3cret"));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn zero_exit_is_success() {
    let temp = TempDir::new().unwrap();
    let tool = write_tool(temp.path(), "VeracodeJavaAPI.jar", 0);
    let target = LocalTarget::this_machine(temp.path());
    let console = Console::capture();

    let result = Invoker::new(script_runtime())
      .invoke(&target, &NodePath::from_local(&tool), &args_with_secret(), &BTreeMap::new(), &console)
      .await
      .unwrap();

    assert!(result.success());
    assert!(console.contents().contains("scan tool -appname storefront"));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn nonzero_exit_is_reported_not_raised() {
    let temp = TempDir::new().unwrap();
    let tool = write_tool(temp.path(), "VeracodeJavaAPI.jar", 3);
    let target = LocalTarget::this_machine(temp.path());
    let console = Console::capture();

    let result = Invoker::new(script_runtime())
      .invoke(&target, &NodePath::from_local(&tool), &ScanArguments::new(), &BTreeMap::new(), &console)
      .await
      .unwrap();

    assert_eq!(result.exit_code, Some(3));
    assert!(!result.success());
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn env_is_passed_and_stderr_streamed() {
    let temp = TempDir::new().unwrap();
    let tool = crate::util::testutil::write_script(
      temp.path(),
      "VeracodeJavaAPI.jar",
      "echo \"job=$JOB_NAME\"\necho oops >&2\n",
    );
    let target = LocalTarget::this_machine(temp.path());
    let console = Console::capture();
    let mut env = BTreeMap::new();
    env.insert("JOB_NAME".to_string(), "storefront".to_string());

    Invoker::new(script_runtime())
      .invoke(&target, &NodePath::from_local(&tool), &ScanArguments::new(), &env, &console)
      .await
      .unwrap();

    let out = console.contents();
    assert!(out.contains("job=storefront"));
    assert!(out.contains("oops"));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn echo_prints_masked_command() {
    let temp = TempDir::new().unwrap();
    let tool = write_tool(temp.path(), "VeracodeJavaAPI.jar", 0);
    let target = LocalTarget::mounted("agent-1", temp.path());
    let console = Console::capture();

    Invoker::new(script_runtime())
      .with_echo(true)
      .invoke(&target, &NodePath::from_local(&tool), &args_with_secret(), &BTreeMap::new(), &console)
      .await
      .unwrap();

    let out = console.contents();
    assert!(out.contains("Invoking the following command in remote workspace:"));
    assert!(out.contains(MASK));
    assert!(out.lines().next().is_some_and(|l| !l.contains("s3cret")));
  }

  #[tokio::test]
  async fn missing_runtime_is_launch_error() {
    let temp = TempDir::new().unwrap();
    let target = LocalTarget::this_machine(temp.path());
    let console = Console::capture();

    let err = Invoker::new(vec!["/definitely/not/a/runtime".to_string()])
      .invoke(
        &target,
        &NodePath::from_local(&temp.path().join("VeracodeJavaAPI.jar")),
        &ScanArguments::new(),
        &BTreeMap::new(),
        &console,
      )
      .await
      .unwrap_err();

    assert!(matches!(err, InvokeError::Launch { .. }));
  }
}
