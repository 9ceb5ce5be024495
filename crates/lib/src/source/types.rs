//! Source sets, operation names and source errors.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheError;
use crate::project::ProjectError;
use crate::tool::ToolError;
use crate::validate::Problems;

/// Which state of a source to materialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceSet {
  /// A fixed tag.
  Tag,
  /// The head of a branch.
  Branch,
  /// Whatever is in the local working copy.
  WorkingCopy,
}

impl SourceSet {
  pub fn as_str(&self) -> &'static str {
    match self {
      SourceSet::Tag => "tag",
      SourceSet::Branch => "branch",
      SourceSet::WorkingCopy => "working-copy",
    }
  }
}

impl fmt::Display for SourceSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for SourceSet {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "tag" => Ok(SourceSet::Tag),
      "branch" => Ok(SourceSet::Branch),
      "working-copy" => Ok(SourceSet::WorkingCopy),
      other => Err(format!("unknown source set '{}'", other)),
    }
  }
}

/// The standard operations a backend may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceOp {
  Validate,
  Fetch,
  Prepare,
  Update,
  SourceId,
  Display,
  CheckWorkingCopy,
  WorkingCopyAvailable,
}

impl SourceOp {
  pub const ALL: [SourceOp; 8] = [
    SourceOp::Validate,
    SourceOp::Fetch,
    SourceOp::Prepare,
    SourceOp::Update,
    SourceOp::SourceId,
    SourceOp::Display,
    SourceOp::CheckWorkingCopy,
    SourceOp::WorkingCopyAvailable,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      SourceOp::Validate => "validate",
      SourceOp::Fetch => "fetch",
      SourceOp::Prepare => "prepare",
      SourceOp::Update => "update",
      SourceOp::SourceId => "sourceid",
      SourceOp::Display => "display",
      SourceOp::CheckWorkingCopy => "check-workingcopy",
      SourceOp::WorkingCopyAvailable => "working-copy-available",
    }
  }
}

impl fmt::Display for SourceOp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Error)]
pub enum SourceError {
  #[error("unknown source: {0}")]
  UnknownSource(String),

  #[error("source '{source_name}' has unknown type '{source_type}'")]
  UnknownSourceType { source_name: String, source_type: String },

  #[error("source type '{source_type}' does not support '{op}'")]
  UnsupportedOperation { source_type: String, op: SourceOp },

  #[error("operation '{0}' has not been declared")]
  UndeclaredOperation(SourceOp),

  #[error("a backend for source type '{0}' is already registered")]
  DuplicateBackend(String),

  #[error("invalid source {source_name}: {problems}")]
  Invalid { source_name: String, problems: Problems },

  #[error("source {source_name}: {message}")]
  Backend { source_name: String, message: String },

  #[error("source {source_name}: {source}")]
  Tool {
    source_name: String,
    #[source]
    source: ToolError,
  },

  #[error("source {source_name}: {source}")]
  Cache {
    source_name: String,
    #[source]
    source: CacheError,
  },

  #[error("source {source_name}: i/o error on '{path}': {source}")]
  Io {
    source_name: String,
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Project(#[from] ProjectError),
}

impl SourceError {
  pub fn backend(source_name: &str, message: impl Into<String>) -> Self {
    SourceError::Backend {
      source_name: source_name.to_string(),
      message: message.into(),
    }
  }

  pub fn tool(source_name: &str) -> impl FnOnce(ToolError) -> Self + '_ {
    move |source| SourceError::Tool {
      source_name: source_name.to_string(),
      source,
    }
  }

  pub fn cache(source_name: &str) -> impl FnOnce(CacheError) -> Self + '_ {
    move |source| SourceError::Cache {
      source_name: source_name.to_string(),
      source,
    }
  }

  pub fn io<'a>(source_name: &'a str, path: &'a std::path::Path) -> impl FnOnce(std::io::Error) -> Self + 'a {
    move |source| SourceError::Io {
      source_name: source_name.to_string(),
      path: path.to_path_buf(),
      source,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn source_set_names() {
    for set in [SourceSet::Tag, SourceSet::Branch, SourceSet::WorkingCopy] {
      assert_eq!(set.as_str().parse::<SourceSet>().unwrap(), set);
    }
    assert!("release".parse::<SourceSet>().is_err());
  }

  #[test]
  fn operation_names_are_unique() {
    let names: std::collections::BTreeSet<_> = SourceOp::ALL.iter().map(|op| op.as_str()).collect();
    assert_eq!(names.len(), SourceOp::ALL.len());
  }
}
