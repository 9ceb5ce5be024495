//! The `files` source type: plain files from servers.
//!
//! ```lua
//! e2source {
//!   type = "files",
//!   server = "upstream",            -- default for every file
//!   licences = { "zlib" },
//!   file = {
//!     { location = "zlib/zlib-1.3.tar.gz", sha256 = "...", unpack = "zlib-1.3" },
//!     { location = "zlib/fix-build.patch", patch = 1 },
//!     { server = ".", location = "extra/config.site", copy = "." },
//!   },
//! }
//! ```
//!
//! Each file has exactly one action: `unpack` an archive and take the named
//! top-level directory, `copy` into a directory, or apply as a `patch` with
//! the given strip level. Files are processed in the declared order.

use std::fs;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::registry::{SourceBackend, SourceCtx};
use super::sourceid;
use super::types::{SourceError, SourceOp, SourceSet};
use crate::cache::{CacheFlags, verify_checksum};
use crate::project::SourceConfig;
use crate::tool::ToolCommand;
use crate::util::hash::ContentHasher;
use crate::util::strings::StringSet;
use crate::validate::Problems;

const ARCHIVE_SUFFIXES: [&str; 3] = [".tar.gz", ".tgz", ".tar"];

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileEntry {
  server: Option<String>,
  location: Option<String>,
  sha256: Option<String>,
  unpack: Option<String>,
  copy: Option<String>,
  patch: Option<Value>,
  licences: Option<StringSet>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
  Unpack(String),
  Copy(String),
  Patch(u32),
}

/// A validated file entry.
#[derive(Debug, Clone)]
struct File {
  server: String,
  location: String,
  sha256: Option<String>,
  action: Action,
  licences: StringSet,
}

impl File {
  fn basename(&self) -> &str {
    self.location.rsplit('/').next().unwrap_or(&self.location)
  }
}

fn patch_level(value: &Value) -> Option<u32> {
  match value {
    Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
    Value::String(s) => s.parse().ok(),
    _ => None,
  }
}

/// Parse the file list, appending a problem for every defect.
fn parse_files(source: &SourceConfig, problems: &mut Problems) -> Vec<File> {
  let entries = match source.attrs.get("file") {
    Some(Value::Array(entries)) => entries,
    Some(_) => {
      problems.push("file must be a list of tables");
      return Vec::new();
    }
    None => {
      problems.push("file list missing");
      return Vec::new();
    }
  };
  let default_server = source.attr_str("server");

  let mut files = Vec::new();
  for (i, value) in entries.iter().enumerate() {
    let mut p = Problems::new();
    let entry: FileEntry = match serde_json::from_value(value.clone()) {
      Ok(entry) => entry,
      Err(e) => {
        problems.push(format!("file {}: {}", i + 1, e));
        continue;
      }
    };

    let server = entry.server.clone().or(default_server.map(str::to_string));
    if server.is_none() {
      p.push("server missing");
    }
    if entry.location.is_none() {
      p.push("location missing");
    }

    let mut actions = Vec::new();
    if let Some(dir) = &entry.unpack {
      actions.push(Action::Unpack(dir.clone()));
      let location = entry.location.as_deref().unwrap_or_default();
      if !ARCHIVE_SUFFIXES.iter().any(|s| location.ends_with(s)) {
        p.push("unsupported archive format");
      }
    }
    if let Some(dir) = &entry.copy {
      actions.push(Action::Copy(dir.clone()));
    }
    if let Some(level) = &entry.patch {
      match patch_level(level) {
        Some(level) => actions.push(Action::Patch(level)),
        None => p.push(format!("invalid patch level {}", level)),
      }
    }
    match actions.len() {
      0 if entry.patch.is_none() => p.push("one of unpack, copy or patch is required"),
      0 | 1 => {}
      _ => p.push("unpack, copy and patch are mutually exclusive"),
    }

    if p.is_fatal() {
      problems.extend_prefixed(&format!("file {}", i + 1), p);
      continue;
    }
    if let (Some(server), Some(location), Some(action)) = (server, entry.location, actions.pop()) {
      files.push(File {
        server,
        location,
        sha256: entry.sha256.map(|s| s.to_lowercase()),
        action,
        licences: entry.licences.unwrap_or_default(),
      });
    }
  }
  files
}

/// Files of an already validated source.
fn files_of(source: &SourceConfig) -> Vec<File> {
  parse_files(source, &mut Problems::new())
}

fn unpack_archive(archive: &Path, into: &Path) -> std::io::Result<()> {
  let name = archive.to_string_lossy();
  let file = fs::File::open(archive)?;
  if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
    tar::Archive::new(GzDecoder::new(file)).unpack(into)
  } else {
    tar::Archive::new(file).unpack(into)
  }
}

/// Move every entry of `from` into `to`.
fn move_contents(from: &Path, to: &Path) -> std::io::Result<()> {
  fs::create_dir_all(to)?;
  for entry in fs::read_dir(from)? {
    let entry = entry?;
    fs::rename(entry.path(), to.join(entry.file_name()))?;
  }
  Ok(())
}

pub struct FilesBackend;

impl FilesBackend {
  fn prepare_file(&self, ctx: SourceCtx<'_>, source: &SourceConfig, file: &File, dest: &Path) -> Result<(), SourceError> {
    let name = source.name.as_str();
    let scratch = tempfile::tempdir_in(dest).map_err(SourceError::io(name, dest))?;
    let fetched = ctx
      .cache
      .fetch_file(&file.server, &file.location, scratch.path(), None, CacheFlags::default())
      .map_err(SourceError::cache(name))?;
    if let Some(expected) = &file.sha256 {
      verify_checksum(&fetched, expected, &file.server, &file.location).map_err(SourceError::cache(name))?;
    }

    match &file.action {
      Action::Unpack(dir) => {
        let unpacked = scratch.path().join("unpacked");
        unpack_archive(&fetched, &unpacked).map_err(SourceError::io(name, &fetched))?;
        let top = unpacked.join(dir);
        if !top.is_dir() {
          return Err(SourceError::backend(
            name,
            format!("{} does not contain directory '{}'", file.location, dir),
          ));
        }
        move_contents(&top, dest).map_err(SourceError::io(name, &top))?;
      }
      Action::Copy(dir) => {
        let target_dir: PathBuf = dest.join(dir);
        fs::create_dir_all(&target_dir).map_err(SourceError::io(name, &target_dir))?;
        let target = target_dir.join(file.basename());
        fs::rename(&fetched, &target).map_err(SourceError::io(name, &target))?;
      }
      Action::Patch(level) => {
        ToolCommand::new(&ctx.cache.tools().patch)
          .arg(format!("-p{}", level))
          .arg("-d")
          .arg(dest)
          .arg("-i")
          .arg(&fetched)
          .run()
          .map_err(SourceError::tool(name))?;
      }
    }
    debug!(source = name, location = %file.location, action = ?file.action, "prepared file");
    Ok(())
  }
}

impl SourceBackend for FilesBackend {
  fn operations(&self) -> &[SourceOp] {
    &[
      SourceOp::Validate,
      SourceOp::Fetch,
      SourceOp::Prepare,
      SourceOp::Update,
      SourceOp::SourceId,
      SourceOp::Display,
      SourceOp::WorkingCopyAvailable,
    ]
  }

  fn validate(&self, ctx: SourceCtx<'_>, source: &SourceConfig, problems: &mut Problems) {
    let files = parse_files(source, problems);
    for (i, file) in files.iter().enumerate() {
      if !ctx.project.servers.contains_key(&file.server) {
        problems.push(format!("file {}: unknown server '{}'", i + 1, file.server));
      }
      for licence in file.licences.iter() {
        if !ctx.project.licences.contains_key(licence) {
          problems.push(format!("file {}: unknown licence '{}'", i + 1, licence));
        }
      }
    }
  }

  fn fetch(&self, ctx: SourceCtx<'_>, source: &SourceConfig) -> Result<(), SourceError> {
    for file in files_of(source) {
      ctx
        .cache
        .cache_file(&file.server, &file.location, CacheFlags::default())
        .map_err(SourceError::cache(&source.name))?;
    }
    Ok(())
  }

  fn update(&self, ctx: SourceCtx<'_>, source: &SourceConfig) -> Result<(), SourceError> {
    for file in files_of(source) {
      ctx
        .cache
        .cache_file(&file.server, &file.location, CacheFlags::refresh())
        .map_err(SourceError::cache(&source.name))?;
    }
    Ok(())
  }

  /// Files have no source sets; every set prepares the same content.
  fn prepare(&self, ctx: SourceCtx<'_>, source: &SourceConfig, _set: SourceSet, dest: &Path) -> Result<(), SourceError> {
    fs::create_dir_all(dest).map_err(SourceError::io(&source.name, dest))?;
    let files = files_of(source);
    info!(source = %source.name, files = files.len(), "preparing files");
    for file in &files {
      self.prepare_file(ctx, source, file, dest)?;
    }
    Ok(())
  }

  fn sourceid(
    &self,
    ctx: SourceCtx<'_>,
    source: &SourceConfig,
    _set: SourceSet,
    hasher: &mut ContentHasher,
  ) -> Result<(), SourceError> {
    for file in files_of(source) {
      let checksum = match &file.sha256 {
        Some(sum) => sum.clone(),
        None => {
          ctx
            .cache
            .checksum(&file.server, &file.location, CacheFlags::default())
            .map_err(SourceError::cache(&source.name))?
            .0
        }
      };
      hasher
        .append_field("server", &file.server)
        .append_field("location", &file.location)
        .append_field("sha256", &checksum)
        .append_field("action", &format!("{:?}", file.action));
      for licence in file.licences.iter() {
        hasher.append_fingerprint(&sourceid::licenceid(ctx, licence)?);
      }
    }
    Ok(())
  }

  fn display(&self, _ctx: SourceCtx<'_>, source: &SourceConfig) -> Result<Vec<String>, SourceError> {
    let mut lines = vec![
      format!("type       = {}", source.source_type),
      format!("licences   = {}", source.licence_names()),
    ];
    for file in files_of(source) {
      lines.push(format!("file       = {}:{}", file.server, file.location));
      if let Some(sum) = &file.sha256 {
        lines.push(format!("  sha256   = {}", sum));
      }
      lines.push(match &file.action {
        Action::Unpack(dir) => format!("  unpack   = {}", dir),
        Action::Copy(dir) => format!("  copy     = {}", dir),
        Action::Patch(level) => format!("  patch    = -p{}", level),
      });
    }
    Ok(lines)
  }

  fn working_copy_available(&self, _ctx: SourceCtx<'_>, _source: &SourceConfig) -> Result<bool, SourceError> {
    Ok(false)
  }
}
