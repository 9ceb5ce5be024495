//! Server configuration, flags and errors for the cache layer.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::transport::TransportError;

fn default_true() -> bool {
  true
}

/// A named remote or local file server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
  pub name: String,
  /// Base URL: `file:///path`, `http(s)://host/path` or `ssh://host/path`.
  pub url: String,
  /// Whether content from this server may be mirrored locally.
  #[serde(default = "default_true")]
  pub cachable: bool,
  /// Whether the local mirror is used by default.
  #[serde(default = "default_true")]
  pub cache: bool,
  /// Whether pushes to this server are allowed.
  #[serde(default)]
  pub writeback: bool,
  /// Permission spec applied to pushed files (`chmod` syntax, ssh/rsync only).
  #[serde(default)]
  pub push_permissions: Option<String>,
}

impl ServerConfig {
  /// The `.` server: the project checkout itself.
  pub fn project_root(root: &Path) -> Self {
    Self {
      name: crate::consts::PROJECT_SERVER.to_string(),
      url: file_url(root),
      cachable: false,
      cache: false,
      writeback: true,
      push_permissions: None,
    }
  }

  /// A non-cached local directory server with writeback enabled.
  pub fn local(name: &str, dir: &Path) -> Self {
    Self {
      name: name.to_string(),
      url: file_url(dir),
      cachable: false,
      cache: false,
      writeback: true,
      push_permissions: None,
    }
  }

  /// Whether fetches go through the local mirror.
  pub fn uses_cache(&self) -> bool {
    self.cachable && self.cache
  }
}

pub(crate) fn file_url(dir: &Path) -> String {
  format!("file://{}", dir.display())
}

/// Per-call cache behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheFlags {
  /// Re-fetch even when a local mirror exists.
  pub refresh: bool,
  /// Bypass the local mirror for this call.
  pub no_cache: bool,
}

impl CacheFlags {
  pub fn refresh() -> Self {
    Self {
      refresh: true,
      no_cache: false,
    }
  }
}

/// A command-line writeback toggle, applied in the order given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritebackDirective {
  pub server: String,
  pub enabled: bool,
}

impl std::str::FromStr for WritebackDirective {
  type Err = String;

  /// Parses `server=on` / `server=off`.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (server, state) = s
      .rsplit_once('=')
      .ok_or_else(|| format!("expected SERVER=on|off, got '{}'", s))?;
    let enabled = match state {
      "on" | "true" | "yes" => true,
      "off" | "false" | "no" => false,
      other => return Err(format!("invalid writeback state '{}'", other)),
    };
    if server.is_empty() {
      return Err("server name is empty".to_string());
    }
    Ok(Self {
      server: server.to_string(),
      enabled,
    })
  }
}

/// Errors from the cache layer. Never retried.
#[derive(Debug, Error)]
pub enum CacheError {
  #[error("unknown server: {0}")]
  UnknownServer(String),

  #[error("writeback disabled for server '{0}'")]
  WritebackDisabled(String),

  #[error("refusing to overwrite existing artifact {server}:{location}")]
  DuplicateArtifact { server: String, location: String },

  #[error("invalid location '{0}'")]
  InvalidLocation(String),

  #[error("checksum mismatch for {server}:{location}: expected {expected}, got {actual}")]
  ChecksumMismatch {
    server: String,
    location: String,
    expected: String,
    actual: String,
  },

  #[error("{server}:{location}: {source}")]
  Transport {
    server: String,
    location: String,
    #[source]
    source: TransportError,
  },

  #[error("cache i/o on '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}
