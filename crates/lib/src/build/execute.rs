//! Build orchestration.
//!
//! A run happens in two phases:
//!
//! 1. [`plan`]: resolve the selection, order its dependency closure, check
//!    and fetch the sources involved and compute every build-id. Nothing is
//!    built; `build --buildid` stops here.
//! 2. [`execute`]: walk the order and build each result in a sandbox,
//!    skipping results whose artifact already exists for their build-id.
//!
//! A failed result does not stop the run. Results depending on it are
//! reported as [`ResultOutcome::DependencyFailed`] without being attempted.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use super::sandbox::{self, Sandbox, SandboxLayout};
use super::types::{BuildError, BuildMode, BuildReport, BuildRequest, BuildSettings, ResultOutcome};
use crate::cache::{CacheError, CacheFlags};
use crate::consts::RESULT_ARCHIVE;
use crate::platform::ChrootArch;
use crate::project::Project;
use crate::results::{BuildIds, DependencyGraph, GraphError};
use crate::source::{Registry, SourceCtx};
use crate::util::hash::Fingerprint;
use crate::util::strings::StringSet;

/// Resolved order and identities of one run.
#[derive(Debug)]
pub struct BuildPlan {
  pub mode: BuildMode,
  pub settings: BuildSettings,
  /// The selected results, before adding dependencies.
  pub selected: StringSet,
  /// The dependency closure of the selection, dependencies first.
  pub order: Vec<String>,
  pub buildids: BTreeMap<String, Fingerprint>,
  graph: DependencyGraph,
}

impl BuildPlan {
  /// `(name, build-id)` in build order.
  pub fn ordered_buildids(&self) -> Vec<(&str, &Fingerprint)> {
    self
      .order
      .iter()
      .filter_map(|name| self.buildids.get(name).map(|id| (name.as_str(), id)))
      .collect()
  }

  fn buildid(&self, result: &str) -> Result<&Fingerprint, BuildError> {
    self
      .buildids
      .get(result)
      .ok_or_else(|| GraphError::UnknownResult(result.to_string()).into())
  }
}

/// Server and location of a result artifact.
///
/// Regular builds go to the result server below `<project>/results/`,
/// release builds to the release server below
/// `<project>/releases/<release_id>/`.
pub fn artifact_location(project: &Project, mode: BuildMode, result: &str, buildid: &Fingerprint) -> (String, String) {
  match mode {
    BuildMode::Release => (
      project.info.release_server.clone(),
      format!(
        "{}/releases/{}/{}/{}/{}",
        project.info.name, project.info.release_id, result, buildid, RESULT_ARCHIVE
      ),
    ),
    _ => (
      project.info.result_server.clone(),
      format!("{}/results/{}/{}/{}", project.info.name, result, buildid, RESULT_ARCHIVE),
    ),
  }
}

/// Resolve, fetch and identify everything a request needs.
///
/// Unknown result names fail here, before any side effect.
pub fn plan(ctx: SourceCtx<'_>, registry: &Registry, request: &BuildRequest) -> Result<BuildPlan, BuildError> {
  let project = ctx.project;
  let selected = project.select_results(&request.results)?;
  if request.settings.playground && selected.len() != 1 {
    return Err(BuildError::PlaygroundSelection(selected.len()));
  }

  let graph = DependencyGraph::new(project)?;
  let order = graph.topological_order(&selected.to_vec())?;
  registry.check_types(project)?;

  let mut sources = StringSet::new();
  for name in &order {
    sources.extend_from(&project.result(name)?.sources);
  }
  for source in sources.iter() {
    registry.validate_source(ctx, source)?;
  }

  info!(results = order.len(), sources = sources.len(), mode = %request.mode, "fetching sources");
  let fetched = registry.fetch_sources(ctx, &sources.to_vec(), false);
  if !fetched.is_success() {
    let failed = fetched.failed_names().into_iter().map(str::to_string).collect();
    return Err(BuildError::Fetch(failed));
  }

  let ids = BuildIds::new(ctx, registry, &graph, request.mode.source_set());
  let buildids = ids.buildids(&order)?.into_iter().collect();

  Ok(BuildPlan {
    mode: request.mode,
    settings: request.settings,
    selected,
    order,
    buildids,
    graph,
  })
}

/// Build every result of `plan`, in order.
pub fn execute(ctx: SourceCtx<'_>, registry: &Registry, sandbox: &dyn Sandbox, plan: &BuildPlan) -> BuildReport {
  let mut report = BuildReport {
    mode: plan.mode,
    order: plan.order.clone(),
    buildids: plan.buildids.clone(),
    outcomes: BTreeMap::new(),
  };
  let builder = ResultBuilder {
    ctx,
    registry,
    sandbox,
    plan,
  };

  for name in &plan.order {
    let outcome = match failed_dependency(plan, &report, name) {
      Some(dep) => {
        warn!(result = %name, dependency = %dep, "skipping, dependency failed");
        ResultOutcome::DependencyFailed(dep)
      }
      None => builder.build(name).unwrap_or_else(|e| {
        warn!(result = %name, error = %e, "build failed");
        ResultOutcome::Failed(e.to_string())
      }),
    };
    debug!(result = %name, %outcome, "result done");
    report.outcomes.insert(name.clone(), outcome);
  }

  info!(
    total = report.order.len(),
    built = report.count(|o| *o == ResultOutcome::Built),
    failed = report.failed_names().len(),
    "build finished"
  );
  report
}

/// [`plan`] followed by [`execute`].
pub fn build_results(
  ctx: SourceCtx<'_>,
  registry: &Registry,
  sandbox: &dyn Sandbox,
  request: &BuildRequest,
) -> Result<BuildReport, BuildError> {
  let plan = plan(ctx, registry, request)?;
  Ok(execute(ctx, registry, sandbox, &plan))
}

fn failed_dependency(plan: &BuildPlan, report: &BuildReport, result: &str) -> Option<String> {
  let deps = plan.graph.direct_dependencies(result).ok()?;
  deps
    .iter()
    .find(|dep| report.outcome(dep).is_some_and(ResultOutcome::is_failure))
    .map(str::to_string)
}

struct ResultBuilder<'a> {
  ctx: SourceCtx<'a>,
  registry: &'a Registry,
  sandbox: &'a dyn Sandbox,
  plan: &'a BuildPlan,
}

impl ResultBuilder<'_> {
  fn build(&self, result: &str) -> Result<ResultOutcome, BuildError> {
    let buildid = self.plan.buildid(result)?;
    let playground = self.plan.settings.playground && self.plan.selected.contains(result);

    if !playground && self.is_up_to_date(result, buildid) {
      info!(result, %buildid, "up to date");
      return Ok(ResultOutcome::UpToDate);
    }

    let layout = self.sandbox.create(result)?;
    self.populate(&layout, result)?;
    if playground {
      info!(result, path = %layout.root.display(), "playground ready");
      return Ok(ResultOutcome::Prepared(layout.root));
    }

    let arch = self
      .ctx
      .project
      .info
      .chroot_arch
      .parse::<ChrootArch>()
      .unwrap_or(ChrootArch::X86_64);
    if let Err(e) = self.sandbox.run(&layout, arch) {
      warn!(result, path = %layout.root.display(), "sandbox kept for inspection");
      return Err(e);
    }

    let archive = sandbox::pack_output(&layout)?;
    self.store(result, buildid, &archive)?;
    if !self.plan.settings.keep_sandbox {
      self.sandbox.remove(&layout)?;
    }
    info!(result, %buildid, "built");
    Ok(ResultOutcome::Built)
  }

  /// Probe the artifact store. Working-copy builds are never up to date;
  /// a failing probe means "build it".
  fn is_up_to_date(&self, result: &str, buildid: &Fingerprint) -> bool {
    if self.plan.settings.force_rebuild || !self.plan.mode.is_reproducible() {
      return false;
    }
    let (server, location) = artifact_location(self.ctx.project, self.plan.mode, result, buildid);
    match self.ctx.cache.file_exists(&server, &location) {
      Ok(exists) => exists,
      Err(e) => {
        warn!(result, server = %server, error = %e, "cannot probe result server, building");
        false
      }
    }
  }

  fn populate(&self, layout: &SandboxLayout, result: &str) -> Result<(), BuildError> {
    let project = self.ctx.project;
    let config = project.result(result)?;
    let set = self.plan.mode.source_set();

    let mut env = BTreeMap::new();
    for source in config.sources.iter() {
      debug!(result, source, %set, "preparing source");
      self
        .registry
        .prepare_source(self.ctx, source, set, &layout.source_dir(source))?;
      env.extend(project.source(source)?.env.clone());
    }
    env.extend(config.env.clone());
    sandbox::write_profile(layout, &env)?;

    for dep in self.plan.graph.direct_dependencies(result)?.iter() {
      let archive = self.dependency_archive(dep)?;
      sandbox::unpack_archive(&archive, &layout.dependency_dir(dep))?;
    }

    let script = project.build_script(result);
    fs::copy(&script, layout.script()).map_err(BuildError::io(&script))?;
    Ok(())
  }

  /// The artifact of a dependency: from this run's output directory, or
  /// from the artifact store when it was up to date.
  fn dependency_archive(&self, dep: &str) -> Result<PathBuf, BuildError> {
    let project = self.ctx.project;
    let buildid = self.plan.buildid(dep)?;
    let out_dir = project.out_dir(dep, buildid);
    let local = out_dir.join(RESULT_ARCHIVE);
    if local.is_file() {
      return Ok(local);
    }
    fs::create_dir_all(&out_dir).map_err(BuildError::io(&out_dir))?;
    let (server, location) = artifact_location(project, self.plan.mode, dep, buildid);
    Ok(
      self
        .ctx
        .cache
        .fetch_file(&server, &location, &out_dir, None, CacheFlags::default())?,
    )
  }

  /// Copy the artifact to `out/` and, for reproducible modes, push it to
  /// the artifact store. Disabled writeback is not an error.
  fn store(&self, result: &str, buildid: &Fingerprint, archive: &std::path::Path) -> Result<(), BuildError> {
    let project = self.ctx.project;
    let out_dir = project.out_dir(result, buildid);
    fs::create_dir_all(&out_dir).map_err(BuildError::io(&out_dir))?;
    let local = out_dir.join(RESULT_ARCHIVE);
    fs::copy(archive, &local).map_err(BuildError::io(&local))?;

    if !self.plan.mode.is_reproducible() {
      return Ok(());
    }
    let (server, location) = artifact_location(project, self.plan.mode, result, buildid);
    match self.ctx.cache.push_file(&local, &server, &location) {
      Ok(()) => Ok(()),
      Err(CacheError::WritebackDisabled(server)) => {
        warn!(result, server = %server, "writeback disabled, result not stored");
        Ok(())
      }
      Err(e) => Err(e.into()),
    }
  }
}
