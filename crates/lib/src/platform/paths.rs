//! Tool state locations below a project root.
//!
//! Everything the tool writes (cache, sandboxes, implicit result servers)
//! lives under `<root>/.e2/` unless overridden from the environment.

use std::path::{Path, PathBuf};

use crate::consts::{ENV_CACHE_DIR, STATE_DIR};

/// `<root>/.e2`
pub fn state_dir(root: &Path) -> PathBuf {
  root.join(STATE_DIR)
}

/// Local mirror of server content, `E2_CACHE_DIR` or `<root>/.e2/cache`.
pub fn cache_dir(root: &Path) -> PathBuf {
  if let Ok(path) = std::env::var(ENV_CACHE_DIR)
    && !path.is_empty()
  {
    return PathBuf::from(path);
  }
  state_dir(root).join("cache")
}

/// Directory holding one sandbox per result.
pub fn sandbox_dir(root: &Path) -> PathBuf {
  state_dir(root).join("sandbox")
}

/// Backing directory of an implicit server such as `results`.
pub fn implicit_server_dir(root: &Path, server: &str) -> PathBuf {
  state_dir(root).join(server)
}

/// Walk up from `start` to the first directory that contains `proj/config`.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
  start
    .ancestors()
    .find(|dir| dir.join(crate::consts::PROJECT_CONFIG).is_file())
    .map(Path::to_path_buf)
}
