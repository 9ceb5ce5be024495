//! Build-ids: content identities of results.
//!
//! A build-id covers, in this order:
//!
//! 1. the result name, the `result` discriminator and its sorted environment
//! 2. the content of `res/<name>/` (config, build script, helpers)
//! 3. the source-id of every source, sorted by source name
//! 4. the build-id of every direct dependency, sorted by name
//! 5. the project identity
//!
//! Dependencies are hashed by their own build-id, so a change anywhere in
//! the closure changes every build-id above it.

use std::cell::RefCell;
use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use super::graph::{DependencyGraph, GraphError};
use crate::project::ProjectError;
use crate::source::{Registry, SourceCtx, SourceError, SourceSet};
use crate::util::hash::{ContentHasher, Fingerprint, HashError, hash_directory};

#[derive(Debug, Error)]
pub enum BuildIdError {
  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Source(#[from] SourceError),

  #[error(transparent)]
  Project(#[from] ProjectError),

  #[error("failed to hash result files: {0}")]
  Hash(#[from] HashError),
}

/// Build-id memo table for one run and one source set.
pub struct BuildIds<'a> {
  ctx: SourceCtx<'a>,
  registry: &'a Registry,
  graph: &'a DependencyGraph,
  set: SourceSet,
  memo: RefCell<BTreeMap<String, Fingerprint>>,
}

impl<'a> BuildIds<'a> {
  pub fn new(ctx: SourceCtx<'a>, registry: &'a Registry, graph: &'a DependencyGraph, set: SourceSet) -> Self {
    Self {
      ctx,
      registry,
      graph,
      set,
      memo: RefCell::new(BTreeMap::new()),
    }
  }

  pub fn source_set(&self) -> SourceSet {
    self.set
  }

  /// The build-id of `result`, computing dependencies first.
  pub fn buildid(&self, result: &str) -> Result<Fingerprint, BuildIdError> {
    if let Some(id) = self.memo.borrow().get(result) {
      return Ok(id.clone());
    }

    let deps = self.graph.direct_dependencies(result)?;
    let mut dep_ids = Vec::with_capacity(deps.len());
    for dep in deps.iter() {
      dep_ids.push((dep, self.buildid(dep)?));
    }

    let project = self.ctx.project;
    let config = project.result(result)?;
    let mut hasher = ContentHasher::new();
    hasher
      .append_field("name", &config.name)
      .append_field("type", "result");
    for (key, value) in &config.env {
      hasher.append_field(&format!("env.{}", key), value);
    }

    let dir = project.result_dir(result);
    if dir.is_dir() {
      hasher.append_field("files", hash_directory(&dir, &[])?.as_str());
    }

    for source in config.sources.iter() {
      let id = self.registry.sourceid(self.ctx, source, self.set)?;
      hasher.append_field(&format!("source.{}", source), id.as_str());
    }
    for (dep, id) in &dep_ids {
      hasher.append_field(&format!("depends.{}", dep), id.as_str());
    }
    hasher.append_field("project", project.identity()?.as_str());

    let id = hasher.finish();
    debug!(result, set = %self.set, buildid = %id, "computed build-id");
    self.memo.borrow_mut().insert(result.to_string(), id.clone());
    Ok(id)
  }

  /// Build-ids of `results`, in the given order.
  pub fn buildids(&self, results: &[String]) -> Result<Vec<(String, Fingerprint)>, BuildIdError> {
    results
      .iter()
      .map(|name| Ok((name.clone(), self.buildid(name)?)))
      .collect()
  }
}
