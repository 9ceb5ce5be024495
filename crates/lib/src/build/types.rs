use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheError;
use crate::project::ProjectError;
use crate::results::{BuildIdError, GraphError};
use crate::source::{SourceError, SourceSet};
use crate::tool::ToolError;
use crate::util::hash::Fingerprint;

/// How sources are selected and where artifacts are stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildMode {
  #[default]
  Tag,
  Branch,
  WorkingCopy,
  Release,
}

impl BuildMode {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Tag => "tag",
      Self::Branch => "branch",
      Self::WorkingCopy => "working-copy",
      Self::Release => "release",
    }
  }

  /// The source-set builds in this mode are prepared from.
  pub fn source_set(&self) -> SourceSet {
    match self {
      Self::Tag | Self::Release => SourceSet::Tag,
      Self::Branch => SourceSet::Branch,
      Self::WorkingCopy => SourceSet::WorkingCopy,
    }
  }

  /// Working-copy builds are not reproducible: never reused, never stored.
  pub fn is_reproducible(&self) -> bool {
    !matches!(self, Self::WorkingCopy)
  }
}

impl FromStr for BuildMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "tag" => Ok(Self::Tag),
      "branch" => Ok(Self::Branch),
      "working-copy" => Ok(Self::WorkingCopy),
      "release" => Ok(Self::Release),
      other => Err(format!(
        "unknown build mode '{}' (expected tag, branch, working-copy or release)",
        other
      )),
    }
  }
}

impl fmt::Display for BuildMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildSettings {
  /// Build even when the artifact for the build-id already exists.
  pub force_rebuild: bool,
  /// Leave the sandbox in place after a successful build.
  pub keep_sandbox: bool,
  /// Prepare the sandbox of the selected result but do not build it.
  pub playground: bool,
}

/// What to build.
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
  /// Selected results; empty means the project defaults.
  pub results: Vec<String>,
  pub mode: BuildMode,
  pub settings: BuildSettings,
}

/// Per-result outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultOutcome {
  Built,
  /// The artifact for this build-id already exists.
  UpToDate,
  /// Playground: the sandbox is ready at this path.
  Prepared(PathBuf),
  Failed(String),
  /// Not attempted because this dependency failed.
  DependencyFailed(String),
}

impl ResultOutcome {
  pub fn is_failure(&self) -> bool {
    matches!(self, Self::Failed(_) | Self::DependencyFailed(_))
  }
}

impl fmt::Display for ResultOutcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Built => f.write_str("built"),
      Self::UpToDate => f.write_str("up to date"),
      Self::Prepared(path) => write!(f, "sandbox prepared at {}", path.display()),
      Self::Failed(message) => write!(f, "failed: {}", message),
      Self::DependencyFailed(dep) => write!(f, "skipped, dependency {} failed", dep),
    }
  }
}

/// Everything a run did, in build order.
#[derive(Debug, Default)]
pub struct BuildReport {
  pub mode: BuildMode,
  pub order: Vec<String>,
  pub buildids: BTreeMap<String, Fingerprint>,
  pub outcomes: BTreeMap<String, ResultOutcome>,
}

impl BuildReport {
  pub fn is_success(&self) -> bool {
    !self.outcomes.values().any(ResultOutcome::is_failure)
  }

  pub fn outcome(&self, result: &str) -> Option<&ResultOutcome> {
    self.outcomes.get(result)
  }

  /// Failed and skipped results, in build order.
  pub fn failed_names(&self) -> Vec<&str> {
    self
      .order
      .iter()
      .filter(|name| self.outcomes.get(*name).is_some_and(ResultOutcome::is_failure))
      .map(String::as_str)
      .collect()
  }

  pub fn count(&self, pred: impl Fn(&ResultOutcome) -> bool) -> usize {
    self.outcomes.values().filter(|&o| pred(o)).count()
  }
}

/// Errors that stop a run, or a single result build.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Project(#[from] ProjectError),

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Source(#[from] SourceError),

  #[error(transparent)]
  BuildId(#[from] BuildIdError),

  #[error(transparent)]
  Cache(#[from] CacheError),

  #[error("failed to fetch sources: {}", .0.join(", "))]
  Fetch(Vec<String>),

  #[error("playground needs exactly one result, got {0}")]
  PlaygroundSelection(usize),

  #[error("build script of {result} failed: {source}")]
  Script {
    result: String,
    #[source]
    source: ToolError,
  },

  #[error("sandbox i/o on '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

impl BuildError {
  pub(crate) fn io(path: &std::path::Path) -> impl FnOnce(std::io::Error) -> BuildError + '_ {
    move |source| BuildError::Io {
      path: path.to_path_buf(),
      source,
    }
  }
}
