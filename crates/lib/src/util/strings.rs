//! Ordered, duplicate-free name sets.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A sorted set of names (results, sources, licences).
///
/// Iteration is always in byte order of the names, which keeps every
/// traversal built on top of it reproducible across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StringSet(BTreeSet<String>);

impl StringSet {
  pub fn new() -> Self {
    Self::default()
  }

  /// Insert a name. Returns `false` if it was already present.
  pub fn insert(&mut self, name: impl Into<String>) -> bool {
    self.0.insert(name.into())
  }

  pub fn contains(&self, name: &str) -> bool {
    self.0.contains(name)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.0.iter().map(String::as_str)
  }

  /// Add every name of `other`.
  pub fn extend_from(&mut self, other: &StringSet) {
    self.0.extend(other.0.iter().cloned());
  }

  pub fn to_vec(&self) -> Vec<String> {
    self.0.iter().cloned().collect()
  }

  /// Join the names with `sep`.
  pub fn concat(&self, sep: &str) -> String {
    self.to_vec().join(sep)
  }
}

impl<S: Into<String>> FromIterator<S> for StringSet {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    Self(iter.into_iter().map(Into::into).collect())
  }
}

impl<'a> IntoIterator for &'a StringSet {
  type Item = &'a String;
  type IntoIter = std::collections::btree_set::Iter<'a, String>;

  fn into_iter(self) -> Self::IntoIter {
    self.0.iter()
  }
}

impl fmt::Display for StringSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.concat(" "))
  }
}
