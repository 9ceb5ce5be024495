//! Project identity: the anchor of every build-id.

use walkdir::WalkDir;

use super::types::{Project, ProjectError};
use crate::util::hash::{ContentHasher, Fingerprint, HashError, hash_file};

impl Project {
  /// Digest over the project name, release id, chroot architecture and the
  /// content of every file under `proj/init/`, sorted by relative path.
  ///
  /// Computed once per loaded project.
  pub fn identity(&self) -> Result<Fingerprint, ProjectError> {
    if let Some(identity) = self.identity.get() {
      return Ok(identity.clone());
    }
    let identity = self.compute_identity()?;
    let _ = self.identity.set(identity.clone());
    Ok(identity)
  }

  fn compute_identity(&self) -> Result<Fingerprint, ProjectError> {
    let mut hasher = ContentHasher::new();
    hasher
      .append_field("name", &self.info.name)
      .append_field("release_id", &self.info.release_id)
      .append_field("chroot_arch", &self.info.chroot_arch);

    let init = self.init_dir();
    if init.is_dir() {
      for entry in WalkDir::new(&init).sort_by_file_name() {
        let entry = entry.map_err(|e| HashError::WalkDir { message: e.to_string() })?;
        if !entry.file_type().is_file() {
          continue;
        }
        let rel = entry
          .path()
          .strip_prefix(&init)
          .unwrap_or(entry.path())
          .to_string_lossy()
          .replace('\\', "/");
        hasher.append_field(&rel, hash_file(entry.path())?.as_str());
      }
    }

    let identity = hasher.finish();
    tracing::debug!(project = %self.info.name, %identity, "computed project identity");
    Ok(identity)
  }
}
