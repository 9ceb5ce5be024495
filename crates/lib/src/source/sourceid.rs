//! Identity and validation shared by every source type.

use tracing::debug;

use super::registry::SourceCtx;
use super::types::SourceError;
use crate::cache::CacheFlags;
use crate::project::{Project, SourceConfig};
use crate::util::hash::{ContentHasher, Fingerprint};
use crate::validate::{Problems, is_env_name};

/// Problems every source can have regardless of its type.
pub(crate) fn common_problems(project: &Project, source: &SourceConfig) -> Problems {
  let mut problems = Problems::new();
  if source.name.is_empty() {
    problems.push("name is empty");
  }
  if source.source_type.is_empty() {
    problems.push("type is empty");
  }
  match &source.licences {
    None => problems.push("licences missing"),
    Some(licences) if licences.is_empty() => problems.push("licences is empty"),
    Some(licences) => {
      for licence in licences.iter() {
        if !project.licences.contains_key(licence) {
          problems.push(format!("unknown licence '{}'", licence));
        }
      }
    }
  }
  for key in source.env.keys() {
    if !is_env_name(key) {
      problems.push(format!("invalid env variable name '{}'", key));
    }
  }
  problems
}

/// Name, type and environment, in that order.
pub(crate) fn append_common(hasher: &mut ContentHasher, source: &SourceConfig) {
  hasher
    .append_field("name", &source.name)
    .append_field("type", &source.source_type);
  for (key, value) in &source.env {
    hasher.append_field(&format!("env.{}", key), value);
  }
}

/// Digest over a licence name and the content of its files.
///
/// A declared `sha256` is trusted; otherwise the file is checksummed
/// through the cache.
pub(crate) fn licenceid(ctx: SourceCtx<'_>, name: &str) -> Result<Fingerprint, SourceError> {
  let licence = ctx.project.licence(name)?;
  let mut hasher = ContentHasher::new();
  hasher.append_field("licence", &licence.name);
  for file in &licence.files {
    let checksum = match &file.sha256 {
      Some(sum) => sum.to_lowercase(),
      None => ctx
        .cache
        .checksum(&file.server, &file.location, CacheFlags::default())
        .map_err(SourceError::cache(name))?
        .0,
    };
    hasher
      .append_field("server", &file.server)
      .append_field("location", &file.location)
      .append_field("sha256", &checksum);
  }
  let id = hasher.finish();
  debug!(licence = name, licenceid = %id, "computed licence-id");
  Ok(id)
}
