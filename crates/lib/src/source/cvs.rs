//! The `cvs` source type.
//!
//! The CVS root is derived from the server URL, optionally extended by the
//! `cvsroot` attribute: `file:///srv/cvs` becomes `/srv/cvs`, and
//! `ssh://host/srv/cvs` becomes `:ext:host:/srv/cvs`.

use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use super::registry::{SourceBackend, SourceCtx};
use super::types::{SourceError, SourceOp, SourceSet};
use super::vcs;
use crate::project::SourceConfig;
use crate::tool::ToolCommand;
use crate::util::hash::ContentHasher;
use crate::validate::Problems;

pub struct CvsBackend;

/// CVS root for a server URL plus an optional path below it.
fn cvsroot_for(url: &str, sub: Option<&str>) -> Option<String> {
  let root = if let Some(path) = url.strip_prefix("file://") {
    path.trim_end_matches('/').to_string()
  } else if let Some(rest) = url.strip_prefix("ssh://").or_else(|| url.strip_prefix("rsync+ssh://")) {
    let (host, path) = rest.split_once('/')?;
    format!(":ext:{}:/{}", host, path.trim_end_matches('/'))
  } else {
    return None;
  };
  Some(match sub {
    Some(sub) if !sub.is_empty() => format!("{}/{}", root, sub.trim_matches('/')),
    _ => root,
  })
}

fn cvsroot(ctx: SourceCtx<'_>, source: &SourceConfig) -> Result<String, SourceError> {
  let server = ctx
    .cache
    .server(vcs::attr(source, "server"))
    .map_err(SourceError::cache(&source.name))?;
  cvsroot_for(&server.url, source.attr_str("cvsroot"))
    .ok_or_else(|| SourceError::backend(&source.name, format!("no CVS root for server url '{}'", server.url)))
}

/// Revision selected for `set`; `HEAD` means the trunk.
fn revision(source: &SourceConfig, set: SourceSet) -> Option<&str> {
  match set {
    SourceSet::Tag => Some(vcs::attr(source, "tag")),
    SourceSet::Branch => Some(vcs::attr(source, "branch")),
    SourceSet::WorkingCopy => None,
  }
}

fn revision_args(rev: &str) -> Vec<String> {
  if rev == "HEAD" {
    Vec::new()
  } else {
    vec!["-r".to_string(), rev.to_string()]
  }
}

/// Run `cvs -d <root> <args>` in `cwd`.
fn cvs(ctx: SourceCtx<'_>, root: &str, cwd: &Path) -> ToolCommand {
  ToolCommand::new(&ctx.cache.tools().cvs).arg("-d").arg(root).cwd(cwd)
}

fn split(source_name: &str, path: &Path) -> Result<(std::path::PathBuf, String), SourceError> {
  match (path.parent(), path.file_name()) {
    (Some(parent), Some(name)) => Ok((parent.to_path_buf(), name.to_string_lossy().into_owned())),
    _ => Err(SourceError::backend(source_name, format!("invalid path {}", path.display()))),
  }
}

impl SourceBackend for CvsBackend {
  fn operations(&self) -> &[SourceOp] {
    &SourceOp::ALL
  }

  fn validate(&self, ctx: SourceCtx<'_>, source: &SourceConfig, problems: &mut Problems) {
    vcs::require(source, &["server", "module", "branch", "tag"], problems);
    vcs::check_server(ctx, source, problems);
    vcs::check_working(source, problems);
    if let Some(server) = source.attr_str("server").and_then(|s| ctx.project.servers.get(s))
      && cvsroot_for(&server.url, None).is_none()
    {
      problems.push(format!("server '{}' cannot host a CVS repository", server.name));
    }
  }

  fn fetch(&self, ctx: SourceCtx<'_>, source: &SourceConfig) -> Result<(), SourceError> {
    let working = vcs::working_path(ctx, source);
    if working.join("CVS").is_dir() {
      debug!(source = %source.name, path = %working.display(), "working copy exists");
      return Ok(());
    }
    let root = cvsroot(ctx, source)?;
    let (parent, name) = split(&source.name, &working)?;
    fs::create_dir_all(&parent).map_err(SourceError::io(&source.name, &parent))?;
    info!(source = %source.name, cvsroot = %root, "checking out");
    cvs(ctx, &root, &parent)
      .arg("checkout")
      .arg("-R")
      .args(revision_args(vcs::attr(source, "branch")))
      .arg("-d")
      .arg(&name)
      .arg(vcs::attr(source, "module"))
      .run()
      .map_err(SourceError::tool(&source.name))
  }

  fn update(&self, ctx: SourceCtx<'_>, source: &SourceConfig) -> Result<(), SourceError> {
    let root = cvsroot(ctx, source)?;
    cvs(ctx, &root, &vcs::working_path(ctx, source))
      .arg("update")
      .arg("-R")
      .args(revision_args(vcs::attr(source, "branch")))
      .run()
      .map_err(SourceError::tool(&source.name))
  }

  fn prepare(&self, ctx: SourceCtx<'_>, source: &SourceConfig, set: SourceSet, dest: &Path) -> Result<(), SourceError> {
    let Some(rev) = revision(source, set) else {
      return vcs::copy_tree(&source.name, &vcs::working_path(ctx, source), dest, &["CVS"]);
    };
    let root = cvsroot(ctx, source)?;
    let (parent, name) = split(&source.name, dest)?;
    fs::create_dir_all(&parent).map_err(SourceError::io(&source.name, &parent))?;
    // export needs a revision; the trunk is HEAD
    cvs(ctx, &root, &parent)
      .arg("export")
      .arg("-R")
      .arg("-r")
      .arg(rev)
      .arg("-d")
      .arg(&name)
      .arg(vcs::attr(source, "module"))
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
    let Some(rev) = revision(source, set) else {
      vcs::append_working_copy(hasher);
      return Ok(());
    };
    if set == SourceSet::Branch {
      warn!(source = %source.name, branch = rev, "cvs branch identity covers the branch name only");
    }
    hasher
      .append_field("cvsroot", &cvsroot(ctx, source)?)
      .append_field("module", vcs::attr(source, "module"))
      .append_field(set.as_str(), rev);
    Ok(())
  }

  fn display(&self, _ctx: SourceCtx<'_>, source: &SourceConfig) -> Result<Vec<String>, SourceError> {
    Ok(vcs::display(
      source,
      &["server", "cvsroot", "module", "branch", "tag", "working"],
    ))
  }

  /// `CVS/Root` and `CVS/Repository` must match the configuration.
  fn check_workingcopy(&self, ctx: SourceCtx<'_>, source: &SourceConfig) -> Result<(), SourceError> {
    let meta = vcs::working_path(ctx, source).join("CVS");
    let read = |name: &str| {
      let path = meta.join(name);
      fs::read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(SourceError::io(&source.name, &path))
    };
    let expected_root = cvsroot(ctx, source)?;
    let mut problems = Problems::new();
    let root = read("Root")?;
    if root != expected_root {
      problems.push(format!("CVS/Root is '{}', expected '{}'", root, expected_root));
    }
    let repository = read("Repository")?;
    if repository != vcs::attr(source, "module") {
      problems.push(format!(
        "CVS/Repository is '{}', expected '{}'",
        repository,
        vcs::attr(source, "module")
      ));
    }
    problems.into_result().map_err(|problems| SourceError::Invalid {
      source_name: source.name.clone(),
      problems,
    })
  }

  fn working_copy_available(&self, ctx: SourceCtx<'_>, source: &SourceConfig) -> Result<bool, SourceError> {
    Ok(vcs::working_path(ctx, source).join("CVS").is_dir())
  }
}
