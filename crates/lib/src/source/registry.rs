//! Source backend registry and operation dispatch.
//!
//! Startup is two-phased: operations are declared first, then backends
//! register against them. A backend claiming an operation nobody declared
//! is rejected at registration time.
//!
//! Callers never talk to a backend directly. Every operation goes through
//! the registry by source name; the registry resolves the source's declared
//! type to its backend, re-validates the source, and then dispatches.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use tracing::{debug, info, warn};

use super::sourceid;
use super::types::{SourceError, SourceOp, SourceSet};
use crate::cache::Cache;
use crate::project::{Project, SourceConfig};
use crate::util::hash::{ContentHasher, Fingerprint};
use crate::validate::Problems;

/// What a backend operation may look at.
#[derive(Clone, Copy)]
pub struct SourceCtx<'a> {
  pub project: &'a Project,
  pub cache: &'a Cache,
}

fn unsupported(source: &SourceConfig, op: SourceOp) -> SourceError {
  SourceError::UnsupportedOperation {
    source_type: source.source_type.clone(),
    op,
  }
}

/// One source type's implementation of the standard operations.
///
/// Only the operations listed by [`SourceBackend::operations`] are ever
/// dispatched; the defaults exist so a backend implements just what it
/// supports.
pub trait SourceBackend {
  fn operations(&self) -> &[SourceOp];

  /// Append every backend specific problem of `source` to `problems`.
  fn validate(&self, _ctx: SourceCtx<'_>, _source: &SourceConfig, _problems: &mut Problems) {}

  /// Make the source available locally. Must be a no-op when it already is.
  fn fetch(&self, _ctx: SourceCtx<'_>, source: &SourceConfig) -> Result<(), SourceError> {
    Err(unsupported(source, SourceOp::Fetch))
  }

  /// Materialize the source for `set` into `dest`.
  fn prepare(
    &self,
    _ctx: SourceCtx<'_>,
    source: &SourceConfig,
    _set: SourceSet,
    _dest: &Path,
  ) -> Result<(), SourceError> {
    Err(unsupported(source, SourceOp::Prepare))
  }

  /// Refresh an existing working copy in place.
  fn update(&self, _ctx: SourceCtx<'_>, source: &SourceConfig) -> Result<(), SourceError> {
    Err(unsupported(source, SourceOp::Update))
  }

  /// Feed the backend specific identity of `source` for `set`.
  fn sourceid(
    &self,
    _ctx: SourceCtx<'_>,
    source: &SourceConfig,
    _set: SourceSet,
    _hasher: &mut ContentHasher,
  ) -> Result<(), SourceError> {
    Err(unsupported(source, SourceOp::SourceId))
  }

  fn display(&self, _ctx: SourceCtx<'_>, source: &SourceConfig) -> Result<Vec<String>, SourceError> {
    Err(unsupported(source, SourceOp::Display))
  }

  /// Check that the working copy matches the configuration.
  fn check_workingcopy(&self, _ctx: SourceCtx<'_>, source: &SourceConfig) -> Result<(), SourceError> {
    Err(unsupported(source, SourceOp::CheckWorkingCopy))
  }

  fn working_copy_available(&self, _ctx: SourceCtx<'_>, source: &SourceConfig) -> Result<bool, SourceError> {
    Err(unsupported(source, SourceOp::WorkingCopyAvailable))
  }
}

/// Outcome of a best-effort operation over many sources.
#[derive(Debug, Default)]
pub struct BatchReport {
  pub succeeded: Vec<String>,
  /// Sources whose type does not implement the operation.
  pub skipped: Vec<String>,
  pub failed: Vec<(String, SourceError)>,
}

impl BatchReport {
  pub fn is_success(&self) -> bool {
    self.failed.is_empty()
  }

  pub fn failed_names(&self) -> Vec<&str> {
    self.failed.iter().map(|(name, _)| name.as_str()).collect()
  }
}

/// The set of known source types and the per-run identity memo tables.
#[derive(Default)]
pub struct Registry {
  declared: BTreeSet<SourceOp>,
  backends: BTreeMap<String, Box<dyn SourceBackend>>,
  sourceids: RefCell<BTreeMap<(String, SourceSet), Fingerprint>>,
  licenceids: RefCell<BTreeMap<String, Fingerprint>>,
}

impl Registry {
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry with every standard operation and the git, svn, cvs and
  /// files backends.
  pub fn with_default_backends() -> Result<Self, SourceError> {
    let mut registry = Self::new();
    for op in SourceOp::ALL {
      registry.declare_operation(op);
    }
    registry.register_backend("cvs", Box::new(super::cvs::CvsBackend))?;
    registry.register_backend("files", Box::new(super::files::FilesBackend))?;
    registry.register_backend("git", Box::new(super::git::GitBackend))?;
    registry.register_backend("svn", Box::new(super::svn::SvnBackend))?;
    Ok(registry)
  }

  pub fn declare_operation(&mut self, op: SourceOp) {
    self.declared.insert(op);
  }

  pub fn register_backend(&mut self, source_type: &str, backend: Box<dyn SourceBackend>) -> Result<(), SourceError> {
    if self.backends.contains_key(source_type) {
      return Err(SourceError::DuplicateBackend(source_type.to_string()));
    }
    if let Some(op) = backend.operations().iter().find(|op| !self.declared.contains(*op)) {
      return Err(SourceError::UndeclaredOperation(*op));
    }
    debug!(source_type, ops = backend.operations().len(), "registered source backend");
    self.backends.insert(source_type.to_string(), backend);
    Ok(())
  }

  pub fn source_types(&self) -> impl Iterator<Item = &str> {
    self.backends.keys().map(String::as_str)
  }

  /// Fail on the first source whose type has no backend.
  pub fn check_types(&self, project: &Project) -> Result<(), SourceError> {
    for source in project.sources.values() {
      self.backend(source)?;
    }
    Ok(())
  }

  fn backend(&self, source: &SourceConfig) -> Result<&dyn SourceBackend, SourceError> {
    self
      .backends
      .get(&source.source_type)
      .map(|b| b.as_ref())
      .ok_or_else(|| SourceError::UnknownSourceType {
        source_name: source.name.clone(),
        source_type: source.source_type.clone(),
      })
  }

  /// Resolve `op` for `source` to the backend implementing it.
  fn dispatch(&self, op: SourceOp, source: &SourceConfig) -> Result<&dyn SourceBackend, SourceError> {
    if !self.declared.contains(&op) {
      return Err(SourceError::UndeclaredOperation(op));
    }
    let backend = self.backend(source)?;
    if !backend.operations().contains(&op) {
      return Err(unsupported(source, op));
    }
    Ok(backend)
  }

  /// Look up a source, resolve its backend and validate it.
  fn checked<'p>(&self, ctx: SourceCtx<'p>, name: &str) -> Result<&'p SourceConfig, SourceError> {
    let source = ctx
      .project
      .sources
      .get(name)
      .ok_or_else(|| SourceError::UnknownSource(name.to_string()))?;
    self.backend(source)?;
    self.validate(ctx, source)?;
    Ok(source)
  }

  fn validate(&self, ctx: SourceCtx<'_>, source: &SourceConfig) -> Result<(), SourceError> {
    let mut problems = sourceid::common_problems(ctx.project, source);
    self
      .dispatch(SourceOp::Validate, source)?
      .validate(ctx, source, &mut problems);
    problems.into_result().map_err(|problems| SourceError::Invalid {
      source_name: source.name.clone(),
      problems,
    })
  }

  /// Collect every configuration problem of one source.
  pub fn validate_source(&self, ctx: SourceCtx<'_>, name: &str) -> Result<(), SourceError> {
    self.checked(ctx, name).map(|_| ())
  }

  pub fn fetch_source(&self, ctx: SourceCtx<'_>, name: &str) -> Result<(), SourceError> {
    let source = self.checked(ctx, name)?;
    info!(source = name, "fetching source");
    self.dispatch(SourceOp::Fetch, source)?.fetch(ctx, source)
  }

  pub fn prepare_source(&self, ctx: SourceCtx<'_>, name: &str, set: SourceSet, dest: &Path) -> Result<(), SourceError> {
    let source = self.checked(ctx, name)?;
    info!(source = name, %set, dest = %dest.display(), "preparing source");
    self.dispatch(SourceOp::Prepare, source)?.prepare(ctx, source, set, dest)
  }

  pub fn update_source(&self, ctx: SourceCtx<'_>, name: &str) -> Result<(), SourceError> {
    let source = self.checked(ctx, name)?;
    info!(source = name, "updating source");
    self.dispatch(SourceOp::Update, source)?.update(ctx, source)
  }

  pub fn display(&self, ctx: SourceCtx<'_>, name: &str) -> Result<Vec<String>, SourceError> {
    let source = self.checked(ctx, name)?;
    self.dispatch(SourceOp::Display, source)?.display(ctx, source)
  }

  pub fn check_workingcopy(&self, ctx: SourceCtx<'_>, name: &str) -> Result<(), SourceError> {
    let source = self.checked(ctx, name)?;
    self
      .dispatch(SourceOp::CheckWorkingCopy, source)?
      .check_workingcopy(ctx, source)
  }

  pub fn working_copy_available(&self, ctx: SourceCtx<'_>, name: &str) -> Result<bool, SourceError> {
    let source = self.checked(ctx, name)?;
    self
      .dispatch(SourceOp::WorkingCopyAvailable, source)?
      .working_copy_available(ctx, source)
  }

  /// Source-id of `name` for `set`, computed at most once per registry.
  pub fn sourceid(&self, ctx: SourceCtx<'_>, name: &str, set: SourceSet) -> Result<Fingerprint, SourceError> {
    let key = (name.to_string(), set);
    if let Some(id) = self.sourceids.borrow().get(&key) {
      return Ok(id.clone());
    }

    let source = self.checked(ctx, name)?;
    let backend = self.dispatch(SourceOp::SourceId, source)?;
    let mut hasher = ContentHasher::new();
    sourceid::append_common(&mut hasher, source);
    for licence in source.licence_names().iter() {
      hasher.append_fingerprint(&self.licenceid(ctx, licence)?);
    }
    backend.sourceid(ctx, source, set, &mut hasher)?;
    let id = hasher.finish();

    debug!(source = name, %set, sourceid = %id, "computed source-id");
    self.sourceids.borrow_mut().insert(key, id.clone());
    Ok(id)
  }

  /// Licence-id of `name`, computed at most once per registry.
  pub fn licenceid(&self, ctx: SourceCtx<'_>, name: &str) -> Result<Fingerprint, SourceError> {
    if let Some(id) = self.licenceids.borrow().get(name) {
      return Ok(id.clone());
    }
    let id = sourceid::licenceid(ctx, name)?;
    self.licenceids.borrow_mut().insert(name.to_string(), id.clone());
    Ok(id)
  }

  /// Fetch (or update) each source, continuing past failures.
  pub fn fetch_sources<S: AsRef<str>>(&self, ctx: SourceCtx<'_>, names: &[S], update: bool) -> BatchReport {
    let mut report = BatchReport::default();
    for name in names {
      let name = name.as_ref();
      let outcome = self.fetch_source(ctx, name).and_then(|()| {
        if update {
          self.update_source(ctx, name)
        } else {
          Ok(())
        }
      });
      match outcome {
        Ok(()) => report.succeeded.push(name.to_string()),
        Err(e) => {
          warn!(source = name, error = %e, "source operation failed");
          report.failed.push((name.to_string(), e));
        }
      }
    }
    report
  }

  /// Check each source's working copy, continuing past failures.
  pub fn check_sources<S: AsRef<str>>(&self, ctx: SourceCtx<'_>, names: &[S]) -> BatchReport {
    let mut report = BatchReport::default();
    for name in names {
      let name = name.as_ref();
      match self.check_workingcopy(ctx, name) {
        Ok(()) => report.succeeded.push(name.to_string()),
        Err(SourceError::UnsupportedOperation { .. }) => {
          debug!(source = name, "no working copy to check");
          report.skipped.push(name.to_string());
        }
        Err(e) => {
          warn!(source = name, error = %e, "working copy check failed");
          report.failed.push((name.to_string(), e));
        }
      }
    }
    report
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tool::Tools;
  use crate::util::testutil::TestProject;
  use std::cell::Cell;
  use std::rc::Rc;

  /// Counts content hashing calls; supports a configurable subset of operations.
  struct Counting {
    ops: Vec<SourceOp>,
    calls: Rc<Cell<usize>>,
  }

  impl SourceBackend for Counting {
    fn operations(&self) -> &[SourceOp] {
      &self.ops
    }

    fn validate(&self, _ctx: SourceCtx<'_>, source: &SourceConfig, problems: &mut Problems) {
      if source.attr_str("ref").is_none() {
        problems.push("ref missing");
      }
    }

    fn sourceid(
      &self,
      _ctx: SourceCtx<'_>,
      source: &SourceConfig,
      _set: SourceSet,
      hasher: &mut ContentHasher,
    ) -> Result<(), SourceError> {
      self.calls.set(self.calls.get() + 1);
      hasher.append_field("ref", source.attr_str("ref").unwrap_or_default());
      Ok(())
    }
  }

  fn counting(calls: &Rc<Cell<usize>>) -> Box<dyn SourceBackend> {
    Box::new(Counting {
      ops: vec![SourceOp::Validate, SourceOp::SourceId],
      calls: calls.clone(),
    })
  }

  fn registry(calls: &Rc<Cell<usize>>) -> Registry {
    let mut registry = Registry::new();
    for op in SourceOp::ALL {
      registry.declare_operation(op);
    }
    registry.register_backend("counting", counting(calls)).unwrap();
    registry
  }

  fn fixture() -> TestProject {
    TestProject::new()
      .source(SourceConfig::new("lib", "counting").with_licences(["test"]).with_attr("ref", "v1"))
      .source(SourceConfig::new("broken", "counting"))
      .source(SourceConfig::new("alien", "hg").with_licences(["test"]))
  }

  fn cache(fixture: &TestProject) -> Cache {
    Cache::for_project(&fixture.project, Tools::default())
  }

  mod registration {
    use super::*;

    #[test]
    fn duplicate_backend_is_rejected() {
      let mut registry = Registry::with_default_backends().unwrap();
      let err = registry
        .register_backend("git", Box::new(crate::source::git::GitBackend))
        .unwrap_err();
      assert!(matches!(err, SourceError::DuplicateBackend(t) if t == "git"));
    }

    #[test]
    fn operations_must_be_declared_first() {
      let calls = Rc::new(Cell::new(0));
      let mut registry = Registry::new();
      registry.declare_operation(SourceOp::Validate);
      let err = registry.register_backend("counting", counting(&calls)).unwrap_err();
      assert!(matches!(err, SourceError::UndeclaredOperation(SourceOp::SourceId)));
    }

    #[test]
    fn default_backends() {
      let registry = Registry::with_default_backends().unwrap();
      assert_eq!(registry.source_types().collect::<Vec<_>>(), vec!["cvs", "files", "git", "svn"]);
    }

    #[test]
    fn check_types_reports_unknown_type() {
      let calls = Rc::new(Cell::new(0));
      let fixture = fixture();
      let err = registry(&calls).check_types(&fixture.project).unwrap_err();
      assert!(matches!(err, SourceError::UnknownSourceType { source_type, .. } if source_type == "hg"));
    }
  }

  mod dispatch {
    use super::*;

    #[test]
    fn unsupported_operation() {
      let calls = Rc::new(Cell::new(0));
      let fixture = fixture();
      let cache = cache(&fixture);
      let ctx = SourceCtx {
        project: &fixture.project,
        cache: &cache,
      };
      let err = registry(&calls).fetch_source(ctx, "lib").unwrap_err();
      assert!(matches!(err, SourceError::UnsupportedOperation { op: SourceOp::Fetch, .. }));
    }

    #[test]
    fn unknown_type_and_unknown_source() {
      let calls = Rc::new(Cell::new(0));
      let fixture = fixture();
      let cache = cache(&fixture);
      let ctx = SourceCtx {
        project: &fixture.project,
        cache: &cache,
      };
      let registry = registry(&calls);
      for result in [
        registry.validate_source(ctx, "alien"),
        registry.fetch_source(ctx, "alien"),
        registry.sourceid(ctx, "alien", SourceSet::Tag).map(|_| ()),
      ] {
        assert!(matches!(
          result,
          Err(SourceError::UnknownSourceType { ref source_name, ref source_type })
            if source_name == "alien" && source_type == "hg"
        ));
      }
      assert!(matches!(
        registry.display(ctx, "nope"),
        Err(SourceError::UnknownSource(_))
      ));
    }

    #[test]
    fn validation_collects_common_and_backend_problems() {
      let calls = Rc::new(Cell::new(0));
      let fixture = fixture();
      let cache = cache(&fixture);
      let ctx = SourceCtx {
        project: &fixture.project,
        cache: &cache,
      };
      match registry(&calls).validate_source(ctx, "broken").unwrap_err() {
        SourceError::Invalid { problems, .. } => {
          assert_eq!(problems.count(), 2);
          assert!(problems.iter().any(|p| p == "ref missing"));
        }
        other => panic!("unexpected error: {other}"),
      }
    }
  }

  mod identity {
    use super::*;

    #[test]
    fn sourceid_is_memoized_per_set() {
      let calls = Rc::new(Cell::new(0));
      let fixture = fixture();
      let cache = cache(&fixture);
      let ctx = SourceCtx {
        project: &fixture.project,
        cache: &cache,
      };
      let registry = registry(&calls);

      let first = registry.sourceid(ctx, "lib", SourceSet::Tag).unwrap();
      let second = registry.sourceid(ctx, "lib", SourceSet::Tag).unwrap();
      assert_eq!(first, second);
      assert_eq!(calls.get(), 1);

      registry.sourceid(ctx, "lib", SourceSet::Branch).unwrap();
      assert_eq!(calls.get(), 2);
    }

    #[test]
    fn fresh_registry_recomputes_identically() {
      let calls = Rc::new(Cell::new(0));
      let fixture = fixture();
      let cache = cache(&fixture);
      let ctx = SourceCtx {
        project: &fixture.project,
        cache: &cache,
      };
      let a = registry(&calls).sourceid(ctx, "lib", SourceSet::Tag).unwrap();
      let b = registry(&calls).sourceid(ctx, "lib", SourceSet::Tag).unwrap();
      assert_eq!(a, b);
      assert_eq!(calls.get(), 2);
    }
  }
}
