//! The `git` source type.
//!
//! The working copy (default `in/<name>`) is a clone of `server:location`.
//! Tag and branch builds export the tagged commit or the remote branch head
//! with `git archive`, so uncommitted changes never leak into them.

use std::io::Cursor;
use std::path::Path;

use gix::remote::Direction;
use tracing::{debug, info};

use super::registry::{SourceBackend, SourceCtx};
use super::types::{SourceError, SourceOp, SourceSet};
use super::vcs;
use crate::project::SourceConfig;
use crate::tool::ToolCommand;
use crate::util::hash::ContentHasher;
use crate::validate::Problems;

pub struct GitBackend;

fn git_err(source: &SourceConfig) -> impl Fn(String) -> SourceError + '_ {
  move |message| SourceError::backend(&source.name, message)
}

fn open(ctx: SourceCtx<'_>, source: &SourceConfig) -> Result<gix::Repository, SourceError> {
  let path = vcs::working_path(ctx, source);
  gix::open(&path).map_err(|e| {
    SourceError::backend(
      &source.name,
      format!("cannot open working copy {}: {} (run fetch-sources)", path.display(), e),
    )
  })
}

fn clone_repo(url: &str, branch: &str, dest: &Path) -> Result<(), String> {
  let mut prepared = gix::prepare_clone(url, dest)
    .map_err(|e| format!("failed to clone '{}': {}", url, e))?
    .with_ref_name(Some(branch))
    .map_err(|e| format!("invalid branch '{}': {}", branch, e))?;

  let (mut checkout, _outcome) = prepared
    .fetch_then_checkout(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| format!("failed to clone '{}': {}", url, e))?;

  checkout
    .main_worktree(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| format!("failed to check out '{}': {}", branch, e))?;
  Ok(())
}

fn fetch_updates(repo: &gix::Repository) -> Result<(), String> {
  let remote = repo
    .find_default_remote(Direction::Fetch)
    .ok_or_else(|| "no remote configured".to_string())?
    .map_err(|e| e.to_string())?;

  remote
    .connect(Direction::Fetch)
    .map_err(|e| format!("failed to connect: {}", e))?
    .prepare_fetch(gix::progress::Discard, Default::default())
    .map_err(|e| format!("failed to fetch: {}", e))?
    .receive(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| format!("failed to fetch: {}", e))?;
  Ok(())
}

fn resolve_revision(repo: &gix::Repository, rev: &str) -> Result<String, String> {
  let spec = format!("{}^{{commit}}", rev);
  let resolved = repo
    .rev_parse(spec.as_str())
    .map_err(|e| format!("revision '{}' not found: {}", rev, e))?;
  let id = resolved
    .single()
    .ok_or_else(|| format!("revision '{}' is ambiguous", rev))?;
  Ok(id.to_string())
}

/// The ref a tag or branch build exports.
fn revision(source: &SourceConfig, set: SourceSet) -> Option<String> {
  match set {
    SourceSet::Tag => Some(format!("refs/tags/{}", vcs::attr(source, "tag"))),
    SourceSet::Branch => Some(format!("refs/remotes/origin/{}", vcs::attr(source, "branch"))),
    SourceSet::WorkingCopy => None,
  }
}

impl SourceBackend for GitBackend {
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
    if working.join(".git").exists() {
      debug!(source = %source.name, path = %working.display(), "working copy exists");
      return Ok(());
    }
    let url = vcs::remote_url(ctx, source)?;
    info!(source = %source.name, %url, path = %working.display(), "cloning repository");
    let parent = working.parent().unwrap_or(ctx.project.root.as_path());
    std::fs::create_dir_all(parent).map_err(SourceError::io(&source.name, parent))?;

    // Clone next to the working copy and move it into place once complete,
    // so an interrupted clone never looks like a working copy.
    let staging = tempfile::Builder::new()
      .prefix(".e2-clone-")
      .tempdir_in(parent)
      .map_err(SourceError::io(&source.name, parent))?;
    let staged = staging.path().join("checkout");
    clone_repo(&url, vcs::attr(source, "branch"), &staged).map_err(git_err(source))?;
    std::fs::rename(&staged, &working).map_err(SourceError::io(&source.name, &working))
  }

  fn update(&self, ctx: SourceCtx<'_>, source: &SourceConfig) -> Result<(), SourceError> {
    let repo = open(ctx, source)?;
    fetch_updates(&repo).map_err(git_err(source))?;
    let working = vcs::working_path(ctx, source);
    ToolCommand::new(&ctx.cache.tools().git)
      .arg("merge")
      .arg("--ff-only")
      .arg(format!("origin/{}", vcs::attr(source, "branch")))
      .cwd(&working)
      .run()
      .map_err(SourceError::tool(&source.name))
  }

  fn prepare(&self, ctx: SourceCtx<'_>, source: &SourceConfig, set: SourceSet, dest: &Path) -> Result<(), SourceError> {
    let working = vcs::working_path(ctx, source);
    std::fs::create_dir_all(dest).map_err(SourceError::io(&source.name, dest))?;
    let Some(rev) = revision(source, set) else {
      return vcs::copy_tree(&source.name, &working, dest, &[".git"]);
    };

    let archive = ToolCommand::new(&ctx.cache.tools().git)
      .arg("archive")
      .arg("--format=tar")
      .arg(&rev)
      .cwd(&working)
      .output()
      .map_err(SourceError::tool(&source.name))?;
    tar::Archive::new(Cursor::new(archive))
      .unpack(dest)
      .map_err(SourceError::io(&source.name, dest))
  }

  fn sourceid(
    &self,
    ctx: SourceCtx<'_>,
    source: &SourceConfig,
    set: SourceSet,
    hasher: &mut ContentHasher,
  ) -> Result<(), SourceError> {
    let Some(rev) = revision(source, set) else {
      vcs::append_working_copy(hasher);
      return Ok(());
    };
    let repo = open(ctx, source)?;
    let commit = resolve_revision(&repo, &rev).map_err(git_err(source))?;
    hasher
      .append_field("server", vcs::attr(source, "server"))
      .append_field("location", vcs::attr(source, "location"))
      .append_field("ref", &rev)
      .append_field("commit", &commit);
    Ok(())
  }

  fn display(&self, _ctx: SourceCtx<'_>, source: &SourceConfig) -> Result<Vec<String>, SourceError> {
    Ok(vcs::display(source, &["server", "location", "branch", "tag", "working"]))
  }

  /// The working copy's origin must point at the configured location and
  /// the configured branch must exist.
  fn check_workingcopy(&self, ctx: SourceCtx<'_>, source: &SourceConfig) -> Result<(), SourceError> {
    let repo = open(ctx, source)?;
    let expected = vcs::remote_url(ctx, source)?;
    let mut problems = Problems::new();

    match repo.find_remote("origin") {
      Ok(remote) => {
        let actual = remote
          .url(Direction::Fetch)
          .map(|u| u.to_bstring().to_string())
          .unwrap_or_default();
        if actual.trim_end_matches('/') != expected.trim_end_matches('/') {
          problems.push(format!("origin is '{}', expected '{}'", actual, expected));
        }
      }
      Err(e) => problems.push(format!("no origin remote: {}", e)),
    }

    let branch = format!("refs/heads/{}", vcs::attr(source, "branch"));
    if repo.find_reference(branch.as_str()).is_err() {
      problems.push(format!("branch '{}' missing in working copy", vcs::attr(source, "branch")));
    }

    problems.into_result().map_err(|problems| SourceError::Invalid {
      source_name: source.name.clone(),
      problems,
    })
  }

  fn working_copy_available(&self, ctx: SourceCtx<'_>, source: &SourceConfig) -> Result<bool, SourceError> {
    Ok(vcs::working_path(ctx, source).join(".git").exists())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::Cache;
  use crate::tool::Tools;
  use crate::util::testutil::TestProject;

  fn source() -> SourceConfig {
    SourceConfig::new("lib", "git")
      .with_licences(["test"])
      .with_attr("server", ".")
      .with_attr("location", "repos/lib.git")
      .with_attr("branch", "main")
      .with_attr("tag", "v1.0")
  }

  #[test]
  fn validation_collects_all_problems() {
    let fixture = TestProject::new();
    let cache = Cache::for_project(&fixture.project, Tools::default());
    let ctx = SourceCtx {
      project: &fixture.project,
      cache: &cache,
    };
    let mut problems = Problems::new();
    GitBackend.validate(ctx, &SourceConfig::new("lib", "git").with_attr("server", "ghost"), &mut problems);
    // location, branch, tag, unknown server
    assert_eq!(problems.count(), 4, "{problems}");

    let mut problems = Problems::new();
    GitBackend.validate(ctx, &source(), &mut problems);
    assert!(!problems.is_fatal());
  }

  #[test]
  fn working_copy_identity_needs_no_repository() {
    let fixture = TestProject::new();
    let cache = Cache::for_project(&fixture.project, Tools::default());
    let ctx = SourceCtx {
      project: &fixture.project,
      cache: &cache,
    };
    let mut a = ContentHasher::new();
    GitBackend.sourceid(ctx, &source(), SourceSet::WorkingCopy, &mut a).unwrap();
    let mut b = ContentHasher::new();
    b.append_line(crate::consts::WORKING_COPY_ID);
    assert_eq!(a.finish(), b.finish());

    assert!(!GitBackend.working_copy_available(ctx, &source()).unwrap());
    assert!(GitBackend.sourceid(ctx, &source(), SourceSet::Tag, &mut ContentHasher::new()).is_err());
  }

  #[test]
  fn failed_clone_leaves_nothing_behind() {
    let fixture = TestProject::new();
    let cache = Cache::for_project(&fixture.project, Tools::default());
    let ctx = SourceCtx {
      project: &fixture.project,
      cache: &cache,
    };
    let missing = source().with_attr("location", "repos/missing.git");
    assert!(GitBackend.fetch(ctx, &missing).is_err());

    let working = fixture.root().join("in/lib");
    assert!(!working.exists());
    assert_eq!(std::fs::read_dir(fixture.root().join("in")).unwrap().count(), 0);
    assert!(!GitBackend.working_copy_available(ctx, &missing).unwrap());
  }

  #[test]
  fn revisions_per_set() {
    assert_eq!(revision(&source(), SourceSet::Tag).unwrap(), "refs/tags/v1.0");
    assert_eq!(revision(&source(), SourceSet::Branch).unwrap(), "refs/remotes/origin/main");
    assert!(revision(&source(), SourceSet::WorkingCopy).is_none());
  }

  #[test]
  fn display_lines() {
    let fixture = TestProject::new();
    let cache = Cache::for_project(&fixture.project, Tools::default());
    let ctx = SourceCtx {
      project: &fixture.project,
      cache: &cache,
    };
    let lines = GitBackend.display(ctx, &source()).unwrap();
    assert_eq!(lines.first().unwrap(), "type       = git");
    assert!(lines.contains(&"branch     = main".to_string()));
    assert_eq!(lines.last().unwrap(), "licences   = test");
  }
}
