//! The `svn` source type.
//!
//! `branch` and `tag` are paths below `server:location`, e.g. `trunk` and
//! `tags/1.0`. The working copy is a checkout of `workingcopy_subdir`
//! (default: the branch).

use std::path::Path;

use tracing::{debug, info};

use super::registry::{SourceBackend, SourceCtx};
use super::types::{SourceError, SourceOp, SourceSet};
use super::vcs;
use crate::cache::transport::join_url as join;
use crate::project::SourceConfig;
use crate::tool::ToolCommand;
use crate::util::hash::ContentHasher;
use crate::validate::Problems;

pub struct SvnBackend;

fn subdir(source: &SourceConfig) -> &str {
  source
    .attr_str("workingcopy_subdir")
    .unwrap_or_else(|| vcs::attr(source, "branch"))
}

/// Repository URL of the path exported for `set`.
fn set_url(ctx: SourceCtx<'_>, source: &SourceConfig, set: SourceSet) -> Result<Option<String>, SourceError> {
  let base = vcs::remote_url(ctx, source)?;
  Ok(match set {
    SourceSet::Tag => Some(join(&base, vcs::attr(source, "tag"))),
    SourceSet::Branch => Some(join(&base, vcs::attr(source, "branch"))),
    SourceSet::WorkingCopy => None,
  })
}

impl SourceBackend for SvnBackend {
  fn operations(&self) -> &[SourceOp] {
    &SourceOp::ALL
  }

  fn validate(&self, ctx: SourceCtx<'_>, source: &SourceConfig, problems: &mut Problems) {
    vcs::require(source, &["server", "location", "branch", "tag"], problems);
    vcs::check_server(ctx, source, problems);
    vcs::check_working(source, problems);
  }

  fn fetch(&self, ctx: SourceCtx<'_>, source: &SourceConfig) -> Result<(), SourceError> {
    let working = vcs::working_path(ctx, source);
    if working.join(".svn").is_dir() {
      debug!(source = %source.name, path = %working.display(), "working copy exists");
      return Ok(());
    }
    let url = join(&vcs::remote_url(ctx, source)?, subdir(source));
    info!(source = %source.name, %url, "checking out");
    ToolCommand::new(&ctx.cache.tools().svn)
      .arg("checkout")
      .arg(&url)
      .arg(&working)
      .run()
      .map_err(SourceError::tool(&source.name))
  }

  fn update(&self, ctx: SourceCtx<'_>, source: &SourceConfig) -> Result<(), SourceError> {
    ToolCommand::new(&ctx.cache.tools().svn)
      .arg("update")
      .cwd(vcs::working_path(ctx, source))
      .run()
      .map_err(SourceError::tool(&source.name))
  }

  fn prepare(&self, ctx: SourceCtx<'_>, source: &SourceConfig, set: SourceSet, dest: &Path) -> Result<(), SourceError> {
    let Some(url) = set_url(ctx, source, set)? else {
      return vcs::copy_tree(&source.name, &vcs::working_path(ctx, source), dest, &[".svn"]);
    };
    ToolCommand::new(&ctx.cache.tools().svn)
      .arg("export")
      .arg("--force")
      .arg(&url)
      .arg(dest)
      .run()
      .map_err(SourceError::tool(&source.name))
  }

  fn sourceid(
    &self,
    ctx: SourceCtx<'_>,
    source: &SourceConfig,
    set: SourceSet,
    hasher: &mut ContentHasher,
  ) -> Result<(), SourceError> {
    let Some(url) = set_url(ctx, source, set)? else {
      vcs::append_working_copy(hasher);
      return Ok(());
    };
    let revision = ToolCommand::new(&ctx.cache.tools().svn)
      .args(["info", "--show-item", "last-changed-revision"])
      .arg(&url)
      .output_string()
      .map_err(SourceError::tool(&source.name))?;
    hasher
      .append_field("server", vcs::attr(source, "server"))
      .append_field("location", vcs::attr(source, "location"))
      .append_field("path", &url)
      .append_field("revision", &revision);
    Ok(())
  }

  fn display(&self, _ctx: SourceCtx<'_>, source: &SourceConfig) -> Result<Vec<String>, SourceError> {
    Ok(vcs::display(
      source,
      &["server", "location", "branch", "tag", "workingcopy_subdir", "working"],
    ))
  }

  fn check_workingcopy(&self, ctx: SourceCtx<'_>, source: &SourceConfig) -> Result<(), SourceError> {
    let expected = join(&vcs::remote_url(ctx, source)?, subdir(source));
    let actual = ToolCommand::new(&ctx.cache.tools().svn)
      .args(["info", "--show-item", "url"])
      .cwd(vcs::working_path(ctx, source))
      .output_string()
      .map_err(SourceError::tool(&source.name))?;
    let mut problems = Problems::new();
    if actual.trim_end_matches('/') != expected.trim_end_matches('/') {
      problems.push(format!("working copy url is '{}', expected '{}'", actual, expected));
    }
    problems.into_result().map_err(|problems| SourceError::Invalid {
      source_name: source.name.clone(),
      problems,
    })
  }

  fn working_copy_available(&self, ctx: SourceCtx<'_>, source: &SourceConfig) -> Result<bool, SourceError> {
    Ok(vcs::working_path(ctx, source).join(".svn").is_dir())
  }
}
