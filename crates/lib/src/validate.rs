//! Accumulated configuration problems.
//!
//! Validation never stops at the first problem: every check appends to a
//! [`Problems`] list and the caller decides from the count whether to abort.

use std::fmt;

/// An ordered list of configuration problems for one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Problems {
  entries: Vec<String>,
}

impl Problems {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, problem: impl Into<String>) {
    self.entries.push(problem.into());
  }

  /// Append all problems of `other`, each prefixed with `prefix: `.
  pub fn extend_prefixed(&mut self, prefix: &str, other: Problems) {
    self
      .entries
      .extend(other.entries.into_iter().map(|p| format!("{}: {}", prefix, p)));
  }

  pub fn count(&self) -> usize {
    self.entries.len()
  }

  /// True when at least one problem was recorded.
  pub fn is_fatal(&self) -> bool {
    !self.entries.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.entries.iter().map(String::as_str)
  }

  /// `Ok(())` when empty, otherwise `Err(self)`.
  pub fn into_result(self) -> Result<(), Problems> {
    if self.is_fatal() { Err(self) } else { Ok(()) }
  }
}

impl fmt::Display for Problems {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} problem(s)", self.entries.len())?;
    for entry in &self.entries {
      write!(f, "\n  - {}", entry)?;
    }
    Ok(())
  }
}

impl std::error::Error for Problems {}

/// A name usable as `export NAME=...`: non-empty, no `=`, no whitespace.
pub fn is_env_name(name: &str) -> bool {
  !name.is_empty() && !name.contains('=') && !name.chars().any(char::is_whitespace)
}
