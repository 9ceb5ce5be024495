//! External tool invocation.
//!
//! VCS clients, `patch`, `rsync` and the build shell are opaque subprocesses:
//! exit code 0 means success, anything else is a failure. Their output is
//! only kept for diagnostics.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::{debug, trace};

/// Errors from running an external tool.
#[derive(Debug, Error)]
pub enum ToolError {
  /// The binary could not be started at all.
  #[error("failed to run '{tool}': {source}")]
  Spawn {
    tool: String,
    #[source]
    source: std::io::Error,
  },

  /// The tool exited non-zero.
  #[error("'{}' failed with exit code {:?}{}", .command, .code, stderr_suffix(.stderr))]
  Failed {
    command: String,
    code: Option<i32>,
    stderr: String,
  },
}

fn stderr_suffix(stderr: &str) -> String {
  let trimmed = stderr.trim();
  if trimmed.is_empty() {
    String::new()
  } else {
    format!(": {}", trimmed.lines().last().unwrap_or(trimmed))
  }
}

/// Locations of the external binaries used by backends and the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tools {
  pub git: PathBuf,
  pub svn: PathBuf,
  pub cvs: PathBuf,
  pub patch: PathBuf,
  pub rsync: PathBuf,
  pub shell: PathBuf,
}

impl Default for Tools {
  fn default() -> Self {
    Self {
      git: PathBuf::from("git"),
      svn: PathBuf::from("svn"),
      cvs: PathBuf::from("cvs"),
      patch: PathBuf::from("patch"),
      rsync: PathBuf::from("rsync"),
      shell: PathBuf::from("/bin/sh"),
    }
  }
}

impl Tools {
  /// Defaults overridden by `E2_GIT`, `E2_SVN`, `E2_CVS`, `E2_PATCH`,
  /// `E2_RSYNC` and `E2_SHELL`.
  pub fn from_env() -> Self {
    let mut tools = Self::default();
    let overrides: [(&str, &mut PathBuf); 6] = [
      ("E2_GIT", &mut tools.git),
      ("E2_SVN", &mut tools.svn),
      ("E2_CVS", &mut tools.cvs),
      ("E2_PATCH", &mut tools.patch),
      ("E2_RSYNC", &mut tools.rsync),
      ("E2_SHELL", &mut tools.shell),
    ];
    for (var, slot) in overrides {
      if let Ok(value) = std::env::var(var)
        && !value.is_empty()
      {
        *slot = PathBuf::from(value);
      }
    }
    tools
  }
}

/// A single tool invocation.
pub struct ToolCommand {
  program: PathBuf,
  args: Vec<String>,
  cwd: Option<PathBuf>,
  env: BTreeMap<String, String>,
  clear_env: bool,
}

impl ToolCommand {
  pub fn new(program: impl AsRef<Path>) -> Self {
    Self {
      program: program.as_ref().to_path_buf(),
      args: Vec::new(),
      cwd: None,
      env: BTreeMap::new(),
      clear_env: false,
    }
  }

  pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
    self.args.push(arg.as_ref().to_string_lossy().into_owned());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
  {
    for arg in args {
      self.args.push(arg.as_ref().to_string_lossy().into_owned());
    }
    self
  }

  pub fn cwd(mut self, dir: impl AsRef<Path>) -> Self {
    self.cwd = Some(dir.as_ref().to_path_buf());
    self
  }

  pub fn env(mut self, key: &str, value: &str) -> Self {
    self.env.insert(key.to_string(), value.to_string());
    self
  }

  /// Start from an empty environment instead of inheriting ours.
  pub fn clear_env(mut self) -> Self {
    self.clear_env = true;
    self
  }

  fn display(&self) -> String {
    let mut parts = vec![self.program.display().to_string()];
    parts.extend(self.args.iter().cloned());
    parts.join(" ")
  }

  /// Run to completion and return stdout.
  pub fn output(self) -> Result<Vec<u8>, ToolError> {
    let command_line = self.display();
    debug!(command = %command_line, cwd = ?self.cwd, "running tool");

    let mut command = Command::new(&self.program);
    command.args(&self.args);
    if let Some(cwd) = &self.cwd {
      command.current_dir(cwd);
    }
    if self.clear_env {
      command.env_clear();
    }
    command.envs(&self.env);

    let output = command.output().map_err(|source| ToolError::Spawn {
      tool: self.program.display().to_string(),
      source,
    })?;

    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if !stderr.is_empty() {
      trace!(stderr = %stderr, "tool stderr");
    }

    if !output.status.success() {
      return Err(ToolError::Failed {
        command: command_line,
        code: output.status.code(),
        stderr,
      });
    }

    Ok(output.stdout)
  }

  /// Run to completion, returning trimmed stdout as text.
  pub fn output_string(self) -> Result<String, ToolError> {
    let stdout = self.output()?;
    Ok(String::from_utf8_lossy(&stdout).trim().to_string())
  }

  pub fn run(self) -> Result<(), ToolError> {
    self.output().map(|_| ())
  }
}
