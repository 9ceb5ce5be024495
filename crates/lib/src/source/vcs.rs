//! Helpers shared by the version control source types.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::registry::SourceCtx;
use super::types::SourceError;
use crate::consts::WORKING_COPY_ID;
use crate::project::SourceConfig;
use crate::util::hash::ContentHasher;
use crate::validate::Problems;

/// Append `<key> missing` for every absent string attribute.
pub(crate) fn require(source: &SourceConfig, keys: &[&str], problems: &mut Problems) {
  for key in keys {
    if source.attr_str(key).is_none_or(str::is_empty) {
      problems.push(format!("{} missing", key));
    }
  }
}

/// The `server` attribute must name a known server.
pub(crate) fn check_server(ctx: SourceCtx<'_>, source: &SourceConfig, problems: &mut Problems) {
  if let Some(server) = source.attr_str("server")
    && !ctx.project.servers.contains_key(server)
  {
    problems.push(format!("unknown server '{}'", server));
  }
}

/// The `working` attribute must stay inside the project.
pub(crate) fn check_working(source: &SourceConfig, problems: &mut Problems) {
  if let Some(working) = source.attr_str("working") {
    let path = Path::new(working);
    if path.is_absolute() || path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
      problems.push(format!("working copy '{}' must be relative to the project", working));
    }
  }
}

/// Absolute path of the source's working copy.
pub(crate) fn working_path(ctx: SourceCtx<'_>, source: &SourceConfig) -> PathBuf {
  let rel = source
    .attr_str("working")
    .map(str::to_string)
    .unwrap_or_else(|| ctx.project.default_working_copy(&source.name));
  ctx.project.root.join(rel)
}

/// URL of `server` + `location`.
pub(crate) fn remote_url(ctx: SourceCtx<'_>, source: &SourceConfig) -> Result<String, SourceError> {
  let server = source.attr_str("server").unwrap_or_default();
  let location = source.attr_str("location").unwrap_or_default();
  ctx
    .cache
    .remote_url(server, location)
    .map_err(SourceError::cache(&source.name))
}

/// A string attribute that validation already guaranteed.
pub(crate) fn attr<'s>(source: &'s SourceConfig, key: &str) -> &'s str {
  source.attr_str(key).unwrap_or_default()
}

/// Working-copy builds identify the source by a fixed marker, never by
/// content.
pub(crate) fn append_working_copy(hasher: &mut ContentHasher) {
  hasher.append_line(WORKING_COPY_ID);
}

/// Copy a working copy into `dest`, leaving out VCS metadata directories.
pub(crate) fn copy_tree(source_name: &str, from: &Path, dest: &Path, exclude: &[&str]) -> Result<(), SourceError> {
  if !from.is_dir() {
    return Err(SourceError::backend(
      source_name,
      format!("working copy {} does not exist", from.display()),
    ));
  }
  let walker = WalkDir::new(from).sort_by_file_name().into_iter().filter_entry(|e| {
    e.file_name()
      .to_str()
      .map(|name| !exclude.contains(&name))
      .unwrap_or(true)
  });
  for entry in walker {
    let entry = entry.map_err(|e| SourceError::backend(source_name, e.to_string()))?;
    let rel = entry.path().strip_prefix(from).unwrap_or(entry.path());
    let target = dest.join(rel);
    let file_type = entry.file_type();
    if file_type.is_dir() {
      fs::create_dir_all(&target).map_err(SourceError::io(source_name, &target))?;
    } else if file_type.is_symlink() {
      let link = fs::read_link(entry.path()).map_err(SourceError::io(source_name, entry.path()))?;
      #[cfg(unix)]
      std::os::unix::fs::symlink(&link, &target).map_err(SourceError::io(source_name, &target))?;
      #[cfg(not(unix))]
      let _ = link;
    } else if file_type.is_file() {
      fs::copy(entry.path(), &target).map_err(SourceError::io(source_name, &target))?;
    }
  }
  Ok(())
}

/// Display lines common to the version control types.
pub(crate) fn display(source: &SourceConfig, keys: &[&str]) -> Vec<String> {
  let mut lines = vec![format!("{:<10} = {}", "type", source.source_type)];
  for key in keys {
    if let Some(value) = source.attr_str(key) {
      lines.push(format!("{:<10} = {}", key, value));
    }
  }
  lines.push(format!("{:<10} = {}", "licences", source.licence_names()));
  lines
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::Cache;
  use crate::tool::Tools;
  use crate::util::testutil::{TestProject, write_file};
  use tempfile::TempDir;

  #[test]
  fn required_and_working_checks() {
    let source = SourceConfig::new("s", "git")
      .with_attr("branch", "")
      .with_attr("working", "../outside");
    let mut problems = Problems::new();
    require(&source, &["server", "branch"], &mut problems);
    check_working(&source, &mut problems);
    assert_eq!(problems.count(), 3, "{problems}");
  }

  #[test]
  fn working_path_defaults_below_in() {
    let fixture = TestProject::new();
    let cache = Cache::for_project(&fixture.project, Tools::default());
    let ctx = SourceCtx {
      project: &fixture.project,
      cache: &cache,
    };
    let source = SourceConfig::new("lib", "git");
    assert_eq!(working_path(ctx, &source), fixture.root().join("in/lib"));
    let source = source.with_attr("working", "checkouts/lib");
    assert_eq!(working_path(ctx, &source), fixture.root().join("checkouts/lib"));
  }

  #[test]
  fn copy_tree_skips_metadata() {
    let from = TempDir::new().unwrap();
    write_file(from.path(), "src/a.c", "a");
    write_file(from.path(), ".git/HEAD", "ref");
    let dest = TempDir::new().unwrap();
    copy_tree("s", from.path(), dest.path(), &[".git"]).unwrap();
    assert!(dest.path().join("src/a.c").is_file());
    assert!(!dest.path().join(".git").exists());
  }
}
