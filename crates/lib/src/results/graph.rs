//! Result dependency graph and topological ordering.
//!
//! This module handles:
//! - Building the results -> dependencies graph from a project
//! - Cycle detection, reporting the full cycle path
//! - Transitive closure of a result selection
//! - A deterministic build order in which every dependency precedes its
//!   dependents and ties are broken by name
//!
//! Construction validates the whole graph: an unknown dependency or a cycle
//! means there is no graph at all, so every order handed out is complete.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::{debug, trace};

use crate::project::Project;
use crate::util::strings::StringSet;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
  #[error("unknown result: {0}")]
  UnknownResult(String),

  #[error("result '{result}' depends on unknown result '{dependency}'")]
  UnknownDependency { result: String, dependency: String },

  #[error("dependency cycle: {}", .path.join(" -> "))]
  Cycle { path: Vec<String> },
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
  InProgress,
  Done,
}

/// The acyclic results -> dependencies relation of a project.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
  edges: BTreeMap<String, StringSet>,
}

impl DependencyGraph {
  pub fn new(project: &Project) -> Result<Self, GraphError> {
    Self::from_edges(
      project
        .results
        .values()
        .map(|r| (r.name.clone(), r.depends.clone()))
        .collect(),
    )
  }

  /// Build a graph from `result -> direct dependencies`.
  pub fn from_edges(edges: BTreeMap<String, StringSet>) -> Result<Self, GraphError> {
    for (result, deps) in &edges {
      if let Some(missing) = deps.iter().find(|d| !edges.contains_key(*d)) {
        return Err(GraphError::UnknownDependency {
          result: result.clone(),
          dependency: missing.to_string(),
        });
      }
    }
    let graph = Self { edges };
    graph.check_acyclic()?;
    debug!(results = graph.edges.len(), "built dependency graph");
    Ok(graph)
  }

  pub fn contains(&self, result: &str) -> bool {
    self.edges.contains_key(result)
  }

  pub fn direct_dependencies(&self, result: &str) -> Result<&StringSet, GraphError> {
    self
      .edges
      .get(result)
      .ok_or_else(|| GraphError::UnknownResult(result.to_string()))
  }

  /// The seeds plus everything reachable from them.
  ///
  /// All seeds are checked before the traversal starts.
  pub fn transitive_closure<S: AsRef<str>>(&self, seeds: &[S]) -> Result<StringSet, GraphError> {
    for seed in seeds {
      self.direct_dependencies(seed.as_ref())?;
    }

    let mut closure = StringSet::new();
    let mut pending: Vec<&str> = seeds.iter().map(|s| s.as_ref()).collect();
    while let Some(name) = pending.pop() {
      if !closure.insert(name) {
        continue;
      }
      pending.extend(self.edges[name].iter());
    }
    Ok(closure)
  }

  /// Build order for the closure of `seeds`.
  pub fn topological_order<S: AsRef<str>>(&self, seeds: &[S]) -> Result<Vec<String>, GraphError> {
    let closure = self.transitive_closure(seeds)?;
    Ok(self.order_of(&closure))
  }

  /// Build order for every result of the project.
  pub fn full_order(&self) -> Vec<String> {
    let all: StringSet = self.edges.keys().cloned().collect();
    self.order_of(&all)
  }

  /// Dependencies of one result: direct ones in name order, or the whole
  /// closure (without the result itself) in build order.
  pub fn dependencies(&self, result: &str, recursive: bool) -> Result<Vec<String>, GraphError> {
    if !recursive {
      return Ok(self.direct_dependencies(result)?.to_vec());
    }
    let mut order = self.topological_order(&[result])?;
    order.retain(|name| name != result);
    Ok(order)
  }

  /// Kahn's algorithm over a dependency-closed subset, always taking the
  /// smallest ready name next.
  fn order_of(&self, subset: &StringSet) -> Vec<String> {
    let mut waiting: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for name in subset.iter() {
      let deps = &self.edges[name];
      waiting.insert(name, deps.len());
      for dep in deps.iter() {
        dependents.entry(dep).or_default().push(name);
      }
    }

    let mut ready: BTreeSet<&str> = waiting.iter().filter(|(_, n)| **n == 0).map(|(k, _)| *k).collect();
    let mut order = Vec::with_capacity(subset.len());
    while let Some(name) = ready.pop_first() {
      trace!(result = name, "ordered");
      order.push(name.to_string());
      for dependent in dependents.get(name).into_iter().flatten() {
        if let Some(count) = waiting.get_mut(dependent) {
          *count -= 1;
          if *count == 0 {
            ready.insert(*dependent);
          }
        }
      }
    }
    order
  }

  /// Depth-first search with in-progress / done marks.
  fn check_acyclic(&self) -> Result<(), GraphError> {
    let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
    let mut stack: Vec<&str> = Vec::new();
    for name in self.edges.keys() {
      self.visit(name, &mut marks, &mut stack)?;
    }
    Ok(())
  }

  fn visit<'a>(
    &'a self,
    name: &'a str,
    marks: &mut BTreeMap<&'a str, Mark>,
    stack: &mut Vec<&'a str>,
  ) -> Result<(), GraphError> {
    match marks.get(name) {
      Some(Mark::Done) => return Ok(()),
      Some(Mark::InProgress) => {
        let start = stack.iter().position(|n| *n == name).unwrap_or(0);
        let mut path: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
        path.push(name.to_string());
        return Err(GraphError::Cycle { path });
      }
      None => {}
    }

    marks.insert(name, Mark::InProgress);
    stack.push(name);
    for dep in self.edges[name].iter() {
      self.visit(dep, marks, stack)?;
    }
    stack.pop();
    marks.insert(name, Mark::Done);
    Ok(())
  }
}
