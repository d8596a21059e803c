//! Execution target for nodes reached over SSH.
//!
//! Filesystem capabilities map to one remote command each: POSIX utilities on
//! POSIX nodes, PowerShell one-liners elsewhere. Files are transferred with
//! `scp -p` so permissions survive the copy.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::process::{Output, Stdio};

use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::{ExecutionTarget, NodeError, NodePath, NodeResolver};
use crate::consts::TOOLS_DIR_NAME;
use crate::platform::OsFamily;
use crate::platform::os::separator_of;

/// Exit status ssh reports for its own (connection) failures.
const SSH_FAILURE: i32 = 255;

/// How to reach nodes over SSH.
#[derive(Debug, Clone)]
pub struct SshOptions {
  /// ssh binary.
  pub program: String,
  /// Extra ssh arguments, e.g. `-o BatchMode=yes`.
  pub args: Vec<String>,
  /// scp binary.
  pub scp_program: String,
  /// Extra scp arguments.
  pub scp_args: Vec<String>,
  /// Root the tools directory is placed under; the node's home when unset.
  pub tools_root: Option<String>,
  /// Name of the tools directory under the root.
  pub tools_dir_name: String,
}

impl Default for SshOptions {
  fn default() -> Self {
    Self {
      program: "ssh".to_string(),
      args: vec!["-o".to_string(), "BatchMode=yes".to_string()],
      scp_program: "scp".to_string(),
      scp_args: vec!["-o".to_string(), "BatchMode=yes".to_string()],
      tools_root: None,
      tools_dir_name: TOOLS_DIR_NAME.to_string(),
    }
  }
}

impl SshOptions {
  fn command(&self, host: &str, remote: &str) -> Command {
    let mut command = Command::new(&self.program);
    command
      .args(&self.args)
      .arg(host)
      .arg("--")
      .arg(remote)
      .stdin(Stdio::null())
      .kill_on_drop(true);
    command
  }

  async fn run(&self, host: &str, remote: &str) -> io::Result<Output> {
    debug!(host = %host, remote = %remote, "running remote command");
    self.command(host, remote).output().await
  }
}

/// A node reached over SSH.
#[derive(Debug, Clone)]
pub struct SshTarget {
  host: String,
  options: SshOptions,
  os: Option<OsFamily>,
  tools_dir: NodePath,
}

impl SshTarget {
  fn family(&self) -> OsFamily {
    self.os.unwrap_or(OsFamily::Posix)
  }

  async fn run_checked(&self, remote: &str, what: &str) -> io::Result<String> {
    let output = self.options.run(&self.host, remote).await?;
    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      return Err(io::Error::other(format!(
        "{} failed on {} (exit {:?}): {}",
        what,
        self.host,
        output.status.code(),
        stderr.trim()
      )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
  }
}

impl ExecutionTarget for SshTarget {
  fn node_id(&self) -> &str {
    &self.host
  }

  fn is_remote(&self) -> bool {
    true
  }

  fn os_family(&self) -> Option<OsFamily> {
    self.os
  }

  fn tools_dir(&self) -> &NodePath {
    &self.tools_dir
  }

  async fn exists(&self, path: &NodePath) -> io::Result<bool> {
    let output = self.options.run(&self.host, &script::exists(self.family(), path)).await?;
    match output.status.code() {
      Some(0) => Ok(true),
      Some(SSH_FAILURE) | None => Err(io::Error::other(format!(
        "cannot check {} on {}: {}",
        path,
        self.host,
        String::from_utf8_lossy(&output.stderr).trim()
      ))),
      Some(_) => Ok(false),
    }
  }

  async fn create_dir_all(&self, path: &NodePath) -> io::Result<()> {
    self
      .run_checked(&script::create_dir_all(self.family(), path), "mkdir")
      .await
      .map(|_| ())
  }

  async fn list_files(&self, dir: &NodePath, extension: &str) -> io::Result<Vec<String>> {
    let stdout = self
      .run_checked(&script::list_files(self.family(), dir, extension), "list")
      .await?;
    let mut names: Vec<String> = stdout
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty())
      .map(|line| NodePath::new(line, dir.separator()).file_name().to_string())
      .collect();
    names.sort();
    Ok(names)
  }

  async fn clear_dir(&self, dir: &NodePath) -> io::Result<()> {
    self
      .run_checked(&script::clear_dir(self.family(), dir), "clear")
      .await
      .map(|_| ())
  }

  async fn upload(&self, source: &Path, dest: &NodePath) -> io::Result<()> {
    let output = Command::new(&self.options.scp_program)
      .args(&self.options.scp_args)
      .arg("-p")
      .arg(source)
      .arg(format!("{}:{}", self.host, dest))
      .stdin(Stdio::null())
      .kill_on_drop(true)
      .output()
      .await?;
    if !output.status.success() {
      return Err(io::Error::other(format!(
        "scp to {} failed: {}",
        self.host,
        String::from_utf8_lossy(&output.stderr).trim()
      )));
    }
    Ok(())
  }

  async fn copy_file(&self, from: &NodePath, to: &NodePath) -> io::Result<()> {
    self
      .run_checked(&script::copy_file(self.family(), from, to), "copy")
      .await
      .map(|_| ())
  }

  async fn rename(&self, from: &NodePath, to: &NodePath) -> io::Result<()> {
    self
      .run_checked(&script::rename(self.family(), from, to), "rename")
      .await
      .map(|_| ())
  }

  fn spawn(&self, command: &[String], env: &BTreeMap<String, String>) -> io::Result<Child> {
    if command.is_empty() {
      return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty command line"));
    }
    let remote = script::command_line(self.family(), command, env);
    debug!(node = %self.host, "spawning remote process");

    self
      .options
      .command(&self.host, &remote)
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
  }
}

/// Resolves host names to SSH targets, probing reachability and OS family.
#[derive(Debug, Clone, Default)]
pub struct SshResolver {
  options: SshOptions,
}

impl SshResolver {
  pub fn new(options: SshOptions) -> Self {
    Self { options }
  }

  async fn detect_os(&self, host: &str) -> Result<Option<OsFamily>, NodeError> {
    let unreachable = |message: String| NodeError::Unreachable {
      node: host.to_string(),
      message,
    };

    let reply = self.options.run(host, "uname -s").await.map_err(|e| unreachable(e.to_string()))?;
    if reply.status.code() == Some(SSH_FAILURE) {
      return Err(unreachable(String::from_utf8_lossy(&reply.stderr).trim().to_string()));
    }
    if reply.status.success() {
      return Ok(Some(OsFamily::Posix));
    }

    let reply = self
      .options
      .run(host, "cmd /c ver")
      .await
      .map_err(|e| unreachable(e.to_string()))?;
    if reply.status.success() && String::from_utf8_lossy(&reply.stdout).contains("Windows") {
      return Ok(Some(OsFamily::Windows));
    }

    warn!(node = %host, "could not determine OS family");
    Ok(None)
  }

  async fn tools_root(&self, host: &str, os: Option<OsFamily>) -> Result<String, NodeError> {
    if let Some(root) = &self.options.tools_root {
      return Ok(root.clone());
    }

    let query = match os {
      Some(OsFamily::Windows) => "echo %USERPROFILE%",
      _ => "printf '%s' \"$HOME\"",
    };
    let no_dir = || NodeError::NoToolsDir { node: host.to_string() };
    let output = self.options.run(host, query).await.map_err(|_| no_dir())?;
    let home = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !output.status.success() || home.is_empty() || home.contains('%') {
      return Err(no_dir());
    }
    Ok(home)
  }
}

impl NodeResolver for SshResolver {
  type Target = SshTarget;

  async fn resolve(&self, node: &str) -> Result<SshTarget, NodeError> {
    if node.trim().is_empty() {
      return Err(NodeError::NotFound { node: node.to_string() });
    }

    let os = self.detect_os(node).await?;
    let root = self.tools_root(node, os).await?;
    let separator = os.map(|os| os.separator()).unwrap_or_else(|| separator_of(&root));
    let tools_dir = NodePath::new(root, separator).join(&self.options.tools_dir_name);

    debug!(node = %node, os = ?os, tools_dir = %tools_dir, "resolved ssh node");

    Ok(SshTarget {
      host: node.to_string(),
      options: self.options.clone(),
      os,
      tools_dir,
    })
  }
}

/// Remote command construction, one function per capability.
///
/// Windows scripts travel as `-EncodedCommand` payloads, so the remote `cmd`
/// that runs the ssh command line only ever sees base64 text.
mod script {
  use std::collections::BTreeMap;

  use base64::{Engine, engine::general_purpose::STANDARD};

  use super::NodePath;
  use crate::platform::OsFamily;

  fn sh(path: &NodePath) -> String {
    shell_words::quote(path.as_str()).into_owned()
  }

  /// PowerShell single-quoted literal.
  fn ps(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
      // PowerShell also closes single-quoted strings on the typographic quotes.
      if matches!(c, '\'' | '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}') {
        quoted.push(c);
      }
      quoted.push(c);
    }
    quoted.push('\'');
    quoted
  }

  fn powershell(body: &str) -> String {
    let utf16: Vec<u8> = body.encode_utf16().flat_map(u16::to_le_bytes).collect();
    format!(
      "powershell -NoProfile -NonInteractive -EncodedCommand {}",
      STANDARD.encode(utf16)
    )
  }

  /// Quotes one argument for the Windows C runtime argv parser.
  fn argv_quote(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    let mut backslashes = 0;
    for c in arg.chars() {
      match c {
        '\\' => backslashes += 1,
        '"' => {
          quoted.extend(std::iter::repeat_n('\\', backslashes * 2 + 1));
          quoted.push('"');
          backslashes = 0;
        }
        _ => {
          quoted.extend(std::iter::repeat_n('\\', backslashes));
          quoted.push(c);
          backslashes = 0;
        }
      }
    }
    quoted.extend(std::iter::repeat_n('\\', backslashes * 2));
    quoted.push('"');
    quoted
  }

  /// PowerShell starts the program itself; a nested `cmd.exe /C` would parse
  /// the arguments a second time.
  fn without_cmd_launcher(command: &[String]) -> &[String] {
    match command {
      [shell, flag, rest @ ..] if shell.eq_ignore_ascii_case("cmd.exe") && flag.eq_ignore_ascii_case("/C") => rest,
      _ => command,
    }
  }

  pub fn exists(os: OsFamily, path: &NodePath) -> String {
    match os {
      OsFamily::Posix => format!("test -e {}", sh(path)),
      OsFamily::Windows => powershell(&format!(
        "if (Test-Path -LiteralPath {}) {{ exit 0 }} else {{ exit 1 }}",
        ps(path.as_str())
      )),
    }
  }

  pub fn create_dir_all(os: OsFamily, path: &NodePath) -> String {
    match os {
      OsFamily::Posix => format!("mkdir -p {}", sh(path)),
      OsFamily::Windows => powershell(&format!(
        "New-Item -ItemType Directory -Force -Path {} | Out-Null",
        ps(path.as_str())
      )),
    }
  }

  pub fn list_files(os: OsFamily, dir: &NodePath, extension: &str) -> String {
    let pattern = format!("*{}", extension);
    match os {
      OsFamily::Posix => format!(
        "find {} -mindepth 1 -maxdepth 1 -type f -name {}",
        sh(dir),
        shell_words::quote(&pattern)
      ),
      OsFamily::Windows => powershell(&format!(
        "Get-ChildItem -LiteralPath {} -File -Filter {} | ForEach-Object {{ $_.Name }}",
        ps(dir.as_str()),
        ps(&pattern)
      )),
    }
  }

  pub fn clear_dir(os: OsFamily, dir: &NodePath) -> String {
    match os {
      OsFamily::Posix => format!("find {} -mindepth 1 -maxdepth 1 -exec rm -rf {{}} +", sh(dir)),
      OsFamily::Windows => powershell(&format!(
        "Get-ChildItem -LiteralPath {} -Force | Remove-Item -Recurse -Force",
        ps(dir.as_str())
      )),
    }
  }

  pub fn copy_file(os: OsFamily, from: &NodePath, to: &NodePath) -> String {
    match os {
      OsFamily::Posix => format!("cp -p {} {}", sh(from), sh(to)),
      OsFamily::Windows => powershell(&format!(
        "Copy-Item -LiteralPath {} -Destination {} -Force",
        ps(from.as_str()),
        ps(to.as_str())
      )),
    }
  }

  pub fn rename(os: OsFamily, from: &NodePath, to: &NodePath) -> String {
    match os {
      OsFamily::Posix => format!("mv -f {} {}", sh(from), sh(to)),
      OsFamily::Windows => powershell(&format!(
        "Move-Item -LiteralPath {} -Destination {} -Force",
        ps(from.as_str()),
        ps(to.as_str())
      )),
    }
  }

  /// Quoted command line with `env` applied for the remote login shell.
  ///
  /// On Windows, values reach the process through PowerShell literals and an
  /// argv-quoted argument string; no cmd parsing or `%` expansion applies.
  pub fn command_line(os: OsFamily, command: &[String], env: &BTreeMap<String, String>) -> String {
    match os {
      OsFamily::Posix => {
        let mut words: Vec<String> = Vec::with_capacity(command.len() + env.len() + 1);
        if !env.is_empty() {
          words.push("env".to_string());
          words.extend(env.iter().map(|(k, v)| format!("{}={}", k, v)));
        }
        words.extend(command.iter().cloned());
        shell_words::join(words)
      }
      OsFamily::Windows => {
        let mut body = String::new();
        for (key, value) in env {
          body.push_str(&format!(
            "[Environment]::SetEnvironmentVariable({}, {}); ",
            ps(key),
            ps(value)
          ));
        }
        if let Some((program, args)) = without_cmd_launcher(command).split_first() {
          body.push_str(&format!(
            "$p = Start-Process -FilePath {} -NoNewWindow -Wait -PassThru",
            ps(program)
          ));
          if !args.is_empty() {
            let line: Vec<String> = args.iter().map(|arg| argv_quote(arg)).collect();
            body.push_str(&format!(" -ArgumentList {}", ps(&line.join(" "))));
          }
          body.push_str("; exit $p.ExitCode");
        }
        powershell(&body)
      }
    }
  }

}
