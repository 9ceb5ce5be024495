//! Build sandboxes.
//!
//! A sandbox is a scratch directory per result:
//!
//! ```text
//! <sandbox>/
//!   build/<source>/   prepared sources, the script's working directory
//!   deps/<result>/    unpacked artifacts of direct dependencies
//!   out/              everything here becomes the result artifact
//!   env               profile sourced before the build script
//!   build-script
//! ```
//!
//! The build script runs under `sh -e` in a cleared environment that only
//! carries `PATH` and the `E2_*` locations.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::types::BuildError;
use crate::consts::{BUILD_SCRIPT, RESULT_ARCHIVE};
use crate::platform::ChrootArch;
use crate::tool::ToolCommand;

const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Paths inside one sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxLayout {
  pub result: String,
  pub root: PathBuf,
}

impl SandboxLayout {
  pub fn build_dir(&self) -> PathBuf {
    self.root.join("build")
  }

  pub fn source_dir(&self, source: &str) -> PathBuf {
    self.build_dir().join(source)
  }

  pub fn deps_dir(&self) -> PathBuf {
    self.root.join("deps")
  }

  pub fn dependency_dir(&self, dep: &str) -> PathBuf {
    self.deps_dir().join(dep)
  }

  pub fn out_dir(&self) -> PathBuf {
    self.root.join("out")
  }

  pub fn profile(&self) -> PathBuf {
    self.root.join("env")
  }

  pub fn script(&self) -> PathBuf {
    self.root.join(BUILD_SCRIPT)
  }

  pub fn archive(&self) -> PathBuf {
    self.root.join(RESULT_ARCHIVE)
  }
}

/// Where and how build scripts run.
pub trait Sandbox {
  /// An empty sandbox for `result`, replacing any leftover one.
  fn create(&self, result: &str) -> Result<SandboxLayout, BuildError>;

  /// Run the sandbox's build script.
  fn run(&self, layout: &SandboxLayout, arch: ChrootArch) -> Result<(), BuildError>;

  fn remove(&self, layout: &SandboxLayout) -> Result<(), BuildError>;
}

/// Plain directories on the host, one per result below `base`.
pub struct HostSandbox {
  base: PathBuf,
  shell: PathBuf,
}

impl HostSandbox {
  pub fn new(base: &Path, shell: &Path) -> Self {
    Self {
      base: base.to_path_buf(),
      shell: shell.to_path_buf(),
    }
  }

  fn command(&self, arch: ChrootArch) -> ToolCommand {
    if arch.needs_personality_switch() {
      ToolCommand::new("setarch").arg("i686").arg(&self.shell)
    } else {
      ToolCommand::new(&self.shell)
    }
  }
}

impl Sandbox for HostSandbox {
  fn create(&self, result: &str) -> Result<SandboxLayout, BuildError> {
    let layout = SandboxLayout {
      result: result.to_string(),
      root: self.base.join(result),
    };
    if layout.root.exists() {
      debug!(result, path = %layout.root.display(), "removing stale sandbox");
      fs::remove_dir_all(&layout.root).map_err(BuildError::io(&layout.root))?;
    }
    for dir in [layout.build_dir(), layout.deps_dir(), layout.out_dir()] {
      fs::create_dir_all(&dir).map_err(BuildError::io(&dir))?;
    }
    Ok(layout)
  }

  fn run(&self, layout: &SandboxLayout, arch: ChrootArch) -> Result<(), BuildError> {
    info!(result = %layout.result, %arch, "running build script");
    self
      .command(arch)
      .arg("-e")
      .arg("-c")
      .arg(". \"$E2_SANDBOX/env\"; . \"$E2_SANDBOX/build-script\"")
      .cwd(layout.build_dir())
      .clear_env()
      .env("PATH", SANDBOX_PATH)
      .env("HOME", &layout.root.to_string_lossy())
      .env("E2_RESULT", &layout.result)
      .env("E2_SANDBOX", &layout.root.to_string_lossy())
      .env("E2_BUILD", &layout.build_dir().to_string_lossy())
      .env("E2_DEPS", &layout.deps_dir().to_string_lossy())
      .env("E2_OUT", &layout.out_dir().to_string_lossy())
      .run()
      .map_err(|source| BuildError::Script {
        result: layout.result.clone(),
        source,
      })
  }

  fn remove(&self, layout: &SandboxLayout) -> Result<(), BuildError> {
    if layout.root.exists() {
      fs::remove_dir_all(&layout.root).map_err(BuildError::io(&layout.root))?;
    }
    Ok(())
  }
}

/// Quote for a POSIX shell: `it's` becomes `'it'\''s'`.
fn shell_quote(value: &str) -> String {
  format!("'{}'", value.replace('\'', r"'\''"))
}

/// Profile script exporting `env`, one `export K='v'` per line.
pub fn profile_script(env: &BTreeMap<String, String>) -> String {
  env
    .iter()
    .map(|(key, value)| format!("export {}={}\n", key, shell_quote(value)))
    .collect()
}

pub fn write_profile(layout: &SandboxLayout, env: &BTreeMap<String, String>) -> Result<(), BuildError> {
  let path = layout.profile();
  fs::write(&path, profile_script(env)).map_err(BuildError::io(&path))
}

/// Pack `out/` into the sandbox's result archive.
pub fn pack_output(layout: &SandboxLayout) -> Result<PathBuf, BuildError> {
  let archive = layout.archive();
  let file = File::create(&archive).map_err(BuildError::io(&archive))?;
  let mut builder = tar::Builder::new(file);
  builder
    .append_dir_all(".", layout.out_dir())
    .map_err(BuildError::io(&layout.out_dir()))?;
  builder
    .into_inner()
    .and_then(|file| file.sync_all())
    .map_err(BuildError::io(&archive))?;
  Ok(archive)
}

/// Unpack a result archive into `dest`.
pub fn unpack_archive(archive: &Path, dest: &Path) -> Result<(), BuildError> {
  fs::create_dir_all(dest).map_err(BuildError::io(dest))?;
  let file = File::open(archive).map_err(BuildError::io(archive))?;
  tar::Archive::new(file).unpack(dest).map_err(BuildError::io(archive))
}
