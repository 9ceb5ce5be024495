//! Content cache and transport layer.
//!
//! Maps a logical `(server, location)` pair to bytes. Servers that allow it
//! are mirrored under `<cache_dir>/<server>/<location>`; pushes are gated by
//! a per-server writeback flag.
//!
//! Every file that becomes visible locally or on a `file://` server is first
//! written under a temporary name in the destination directory and renamed
//! into place, so an aborted run never leaves a truncated file behind that
//! looks complete.
//!
//! # Submodules
//!
//! - [`transport`] - scheme specific fetch / push / probe
//! - [`types`] - server configuration, flags and errors

pub mod transport;
mod types;

pub use types::*;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};

use crate::consts::CHECKSUM_SUFFIX;
use crate::project::Project;
use crate::tool::Tools;
use crate::util::hash::{Fingerprint, hash_file};

use transport::{TransportError, join_url, transport_for};

/// The cache of one process run.
pub struct Cache {
  cache_dir: PathBuf,
  servers: BTreeMap<String, ServerConfig>,
  tools: Tools,
}

impl Cache {
  pub fn new(cache_dir: &Path, servers: impl IntoIterator<Item = ServerConfig>, tools: Tools) -> Self {
    Self {
      cache_dir: cache_dir.to_path_buf(),
      servers: servers.into_iter().map(|s| (s.name.clone(), s)).collect(),
      tools,
    }
  }

  /// Cache for a project, rooted at [`crate::platform::paths::cache_dir`].
  pub fn for_project(project: &Project, tools: Tools) -> Self {
    Self::new(
      &crate::platform::paths::cache_dir(&project.root),
      project.servers.values().cloned(),
      tools,
    )
  }

  pub fn cache_dir(&self) -> &Path {
    &self.cache_dir
  }

  pub fn tools(&self) -> &Tools {
    &self.tools
  }

  pub fn server(&self, name: &str) -> Result<&ServerConfig, CacheError> {
    self
      .servers
      .get(name)
      .ok_or_else(|| CacheError::UnknownServer(name.to_string()))
  }

  /// Full URL of a location on a server.
  pub fn remote_url(&self, server: &str, location: &str) -> Result<String, CacheError> {
    check_location(location)?;
    Ok(join_url(&self.server(server)?.url, location))
  }

  /// Where the local mirror of a location lives (whether or not it exists).
  pub fn cache_path(&self, server: &str, location: &str) -> Result<PathBuf, CacheError> {
    self.server(server)?;
    check_location(location)?;
    Ok(self.cache_dir.join(server_dir_name(server)).join(location))
  }

  pub fn set_writeback(&mut self, server: &str, enabled: bool) -> Result<(), CacheError> {
    let config = self
      .servers
      .get_mut(server)
      .ok_or_else(|| CacheError::UnknownServer(server.to_string()))?;
    debug!(server, enabled, "setting writeback");
    config.writeback = enabled;
    Ok(())
  }

  pub fn writeback_enabled(&self, server: &str) -> Result<bool, CacheError> {
    Ok(self.server(server)?.writeback)
  }

  /// Apply command-line writeback toggles in order. Later toggles win.
  pub fn apply_writeback(&mut self, directives: &[WritebackDirective]) -> Result<(), CacheError> {
    for directive in directives {
      self.set_writeback(&directive.server, directive.enabled)?;
    }
    Ok(())
  }

  /// Whether a local mirror of the location exists. No side effects.
  pub fn file_in_cache(&self, server: &str, location: &str) -> bool {
    self
      .cache_path(server, location)
      .map(|p| p.is_file())
      .unwrap_or(false)
  }

  /// Whether the location exists in the local mirror or on the server.
  pub fn file_exists(&self, server: &str, location: &str) -> Result<bool, CacheError> {
    if self.file_in_cache(server, location) {
      return Ok(true);
    }
    let url = self.remote_url(server, location)?;
    let transport = self.transport(server, location, &url)?;
    transport
      .exists(&url)
      .map_err(|source| transport_err(server, location, source))
  }

  /// Make sure a local mirror exists.
  ///
  /// A no-op for servers that are not cached, and for locations already
  /// mirrored unless `flags.refresh` is set.
  pub fn cache_file(&self, server: &str, location: &str, flags: CacheFlags) -> Result<(), CacheError> {
    let config = self.server(server)?;
    if !config.uses_cache() || flags.no_cache {
      return Ok(());
    }
    let path = self.cache_path(server, location)?;
    if path.is_file() && !flags.refresh {
      debug!(server, location, "already cached");
      return Ok(());
    }

    info!(server, location, "caching file");
    let url = self.remote_url(server, location)?;
    let transport = self.transport(server, location, &url)?;
    write_atomically(&path, |tmp| {
      transport
        .fetch(&url, tmp)
        .map_err(|source| transport_err(server, location, source))
    })
  }

  /// Copy a location to `dest_dir/dest_name` (default: the location's file
  /// name), going through the cache when the server allows it.
  pub fn fetch_file(
    &self,
    server: &str,
    location: &str,
    dest_dir: &Path,
    dest_name: Option<&str>,
    flags: CacheFlags,
  ) -> Result<PathBuf, CacheError> {
    let name = match dest_name {
      Some(name) => name.to_string(),
      None => Path::new(location)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| CacheError::InvalidLocation(location.to_string()))?,
    };
    let dest = dest_dir.join(name);
    let config = self.server(server)?;

    if config.uses_cache() && !flags.no_cache {
      self.cache_file(server, location, flags)?;
      let cached = self.cache_path(server, location)?;
      write_atomically(&dest, |tmp| {
        fs::copy(&cached, tmp).map(|_| ()).map_err(|source| CacheError::Io {
          path: cached.clone(),
          source,
        })
      })?;
    } else {
      let url = self.remote_url(server, location)?;
      let transport = self.transport(server, location, &url)?;
      write_atomically(&dest, |tmp| {
        transport
          .fetch(&url, tmp)
          .map_err(|source| transport_err(server, location, source))
      })?;
    }

    debug!(server, location, dest = %dest.display(), "fetched file");
    Ok(dest)
  }

  /// Checksum of a location's content.
  pub fn checksum(&self, server: &str, location: &str, flags: CacheFlags) -> Result<Fingerprint, CacheError> {
    let config = self.server(server)?;
    if config.uses_cache() && !flags.no_cache {
      self.cache_file(server, location, flags)?;
      let cached = self.cache_path(server, location)?;
      return hash_local(&cached);
    }
    let scratch = tempfile::tempdir().map_err(|source| CacheError::Io {
      path: std::env::temp_dir(),
      source,
    })?;
    let path = self.fetch_file(server, location, scratch.path(), Some("content"), flags)?;
    hash_local(&path)
  }

  /// Upload a local file to a server location.
  ///
  /// Fails with [`CacheError::WritebackDisabled`] when writeback is off for
  /// the server. The local mirror is refreshed as well for cached servers.
  pub fn push_file(&self, src: &Path, server: &str, location: &str) -> Result<(), CacheError> {
    let config = self.server(server)?;
    if !config.writeback {
      return Err(CacheError::WritebackDisabled(server.to_string()));
    }

    let url = self.remote_url(server, location)?;
    info!(server, location, "pushing file");
    let transport = self.transport(server, location, &url)?;
    transport
      .push(src, &url, config.push_permissions.as_deref())
      .map_err(|source| transport_err(server, location, source))?;

    if config.uses_cache() {
      let cached = self.cache_path(server, location)?;
      write_atomically(&cached, |tmp| {
        fs::copy(src, tmp).map(|_| ()).map_err(|source| CacheError::Io {
          path: src.to_path_buf(),
          source,
        })
      })?;
    }
    Ok(())
  }

  /// Publish a new immutable file together with its checksum sidecar.
  ///
  /// An existing `<location>.sha256` refuses the push with
  /// [`CacheError::DuplicateArtifact`], as does existing content that
  /// differs from `src`. Content identical to `src` without a sidecar is an
  /// interrupted publish and only the sidecar is pushed. The sidecar goes
  /// last, after the uploaded content has been read back and verified.
  pub fn publish(&self, src: &Path, server: &str, location: &str) -> Result<Fingerprint, CacheError> {
    let checksum_location = format!("{}{}", location, CHECKSUM_SUFFIX);
    if self.file_exists(server, &checksum_location)? {
      warn!(server, location = %checksum_location, "artifact already published");
      return Err(CacheError::DuplicateArtifact {
        server: server.to_string(),
        location: checksum_location,
      });
    }
    if !self.writeback_enabled(server)? {
      return Err(CacheError::WritebackDisabled(server.to_string()));
    }

    let checksum = hash_local(src)?;
    if self.file_exists(server, location)? {
      let existing = self.checksum(server, location, CacheFlags::default())?;
      if existing != checksum {
        warn!(server, location, "different content already published");
        return Err(CacheError::DuplicateArtifact {
          server: server.to_string(),
          location: location.to_string(),
        });
      }
      warn!(server, location, "completing interrupted publish");
    } else {
      self.push_file(src, server, location)?;
      let uploaded = self.checksum(
        server,
        location,
        CacheFlags {
          refresh: true,
          no_cache: true,
        },
      )?;
      if uploaded != checksum {
        return Err(CacheError::ChecksumMismatch {
          server: server.to_string(),
          location: location.to_string(),
          expected: checksum.0,
          actual: uploaded.0,
        });
      }
    }

    let basename = Path::new(location)
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| location.to_string());
    let scratch = tempfile::tempdir().map_err(|source| CacheError::Io {
      path: std::env::temp_dir(),
      source,
    })?;
    let sidecar = scratch.path().join("checksum");
    fs::write(&sidecar, format!("{}  {}\n", checksum, basename)).map_err(|source| CacheError::Io {
      path: sidecar.clone(),
      source,
    })?;
    self.push_file(&sidecar, server, &checksum_location)?;
    Ok(checksum)
  }

  fn transport(
    &self,
    server: &str,
    location: &str,
    url: &str,
  ) -> Result<Box<dyn transport::Transport>, CacheError> {
    transport_for(url, &self.tools).map_err(|source| transport_err(server, location, source))
  }
}

/// Compare a local file against an expected checksum.
pub fn verify_checksum(path: &Path, expected: &str, server: &str, location: &str) -> Result<(), CacheError> {
  let actual = hash_local(path)?;
  if !actual.0.eq_ignore_ascii_case(expected) {
    return Err(CacheError::ChecksumMismatch {
      server: server.to_string(),
      location: location.to_string(),
      expected: expected.to_string(),
      actual: actual.0,
    });
  }
  Ok(())
}

fn hash_local(path: &Path) -> Result<Fingerprint, CacheError> {
  hash_file(path).map_err(|e| CacheError::Io {
    path: path.to_path_buf(),
    source: std::io::Error::other(e.to_string()),
  })
}

fn transport_err(server: &str, location: &str, source: TransportError) -> CacheError {
  CacheError::Transport {
    server: server.to_string(),
    location: location.to_string(),
    source,
  }
}

/// Locations are relative paths that must stay inside the server.
fn check_location(location: &str) -> Result<(), CacheError> {
  let path = Path::new(location);
  let escapes = path
    .components()
    .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
  if location.is_empty() || escapes {
    return Err(CacheError::InvalidLocation(location.to_string()));
  }
  Ok(())
}

fn server_dir_name(server: &str) -> String {
  if server == crate::consts::PROJECT_SERVER {
    "_project".to_string()
  } else {
    server.replace('/', "_")
  }
}

/// Produce `dest` through a temporary file in the same directory.
fn write_atomically<F>(dest: &Path, produce: F) -> Result<(), CacheError>
where
  F: FnOnce(&Path) -> Result<(), CacheError>,
{
  let dir = dest
    .parent()
    .ok_or_else(|| CacheError::InvalidLocation(dest.display().to_string()))?;
  fs::create_dir_all(dir).map_err(|source| CacheError::Io {
    path: dir.to_path_buf(),
    source,
  })?;
  let tmp = tempfile::NamedTempFile::new_in(dir).map_err(|source| CacheError::Io {
    path: dir.to_path_buf(),
    source,
  })?;
  produce(tmp.path())?;
  tmp.persist(dest).map_err(|e| CacheError::Io {
    path: dest.to_path_buf(),
    source: e.error,
  })?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  struct Fixture {
    _temp: TempDir,
    server_dir: PathBuf,
    cache: Cache,
  }

  fn fixture(writeback: bool) -> Fixture {
    let temp = TempDir::new().unwrap();
    let server_dir = temp.path().join("server");
    fs::create_dir_all(&server_dir).unwrap();
    let upstream = ServerConfig {
      name: "upstream".to_string(),
      url: format!("file://{}", server_dir.display()),
      cachable: true,
      cache: true,
      writeback,
      push_permissions: None,
    };
    let cache = Cache::new(&temp.path().join("cache"), [upstream], Tools::default());
    Fixture {
      _temp: temp,
      server_dir,
      cache,
    }
  }

  fn put(fx: &Fixture, location: &str, content: &str) {
    let path = fx.server_dir.join(location);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
  }

  mod caching {
    use super::*;

    #[test]
    fn cache_file_mirrors_once() {
      let fx = fixture(false);
      put(&fx, "zlib/zlib-1.3.tar.gz", "v1");

      assert!(!fx.cache.file_in_cache("upstream", "zlib/zlib-1.3.tar.gz"));
      fx.cache
        .cache_file("upstream", "zlib/zlib-1.3.tar.gz", CacheFlags::default())
        .unwrap();
      assert!(fx.cache.file_in_cache("upstream", "zlib/zlib-1.3.tar.gz"));

      // Server changes are not seen without a refresh
      put(&fx, "zlib/zlib-1.3.tar.gz", "v2");
      fx.cache
        .cache_file("upstream", "zlib/zlib-1.3.tar.gz", CacheFlags::default())
        .unwrap();
      let cached = fx.cache.cache_path("upstream", "zlib/zlib-1.3.tar.gz").unwrap();
      assert_eq!(fs::read_to_string(&cached).unwrap(), "v1");

      fx.cache
        .cache_file("upstream", "zlib/zlib-1.3.tar.gz", CacheFlags::refresh())
        .unwrap();
      assert_eq!(fs::read_to_string(&cached).unwrap(), "v2");
    }

    #[test]
    fn fetch_file_copies_to_destination() {
      let fx = fixture(false);
      put(&fx, "a/b.txt", "content");
      let dest = TempDir::new().unwrap();

      let path = fx
        .cache
        .fetch_file("upstream", "a/b.txt", dest.path(), None, CacheFlags::default())
        .unwrap();
      assert_eq!(path, dest.path().join("b.txt"));
      assert_eq!(fs::read_to_string(path).unwrap(), "content");
      assert!(fx.cache.file_in_cache("upstream", "a/b.txt"));
    }

    #[test]
    fn failed_fetch_leaves_no_partial_file() {
      let fx = fixture(false);
      let dest = TempDir::new().unwrap();

      let err = fx
        .cache
        .fetch_file("upstream", "missing.tar", dest.path(), None, CacheFlags::default())
        .unwrap_err();
      assert!(matches!(err, CacheError::Transport { .. }));
      assert_eq!(fs::read_dir(dest.path()).unwrap().count(), 0);
      assert!(!fx.cache.file_in_cache("upstream", "missing.tar"));
    }

    #[test]
    fn rejects_escaping_locations() {
      let fx = fixture(false);
      assert!(matches!(
        fx.cache.cache_path("upstream", "../etc/passwd"),
        Err(CacheError::InvalidLocation(_))
      ));
      assert!(matches!(
        fx.cache.remote_url("upstream", "/abs"),
        Err(CacheError::InvalidLocation(_))
      ));
    }

    #[test]
    fn unknown_server() {
      let fx = fixture(false);
      assert!(matches!(
        fx.cache.cache_file("nowhere", "x", CacheFlags::default()),
        Err(CacheError::UnknownServer(_))
      ));
      assert!(!fx.cache.file_in_cache("nowhere", "x"));
    }
  }

  mod writeback {
    use super::*;

    #[test]
    fn push_requires_writeback() {
      let fx = fixture(false);
      let src = fx.server_dir.parent().unwrap().join("local.txt");
      fs::write(&src, "data").unwrap();

      assert!(matches!(
        fx.cache.push_file(&src, "upstream", "up/local.txt"),
        Err(CacheError::WritebackDisabled(_))
      ));
      assert!(!fx.server_dir.join("up/local.txt").exists());
    }

    #[test]
    fn directives_apply_in_order() {
      let mut fx = fixture(false);
      fx.cache
        .apply_writeback(&[
          WritebackDirective {
            server: "upstream".to_string(),
            enabled: true,
          },
          WritebackDirective {
            server: "upstream".to_string(),
            enabled: false,
          },
          WritebackDirective {
            server: "upstream".to_string(),
            enabled: true,
          },
        ])
        .unwrap();
      assert!(fx.cache.writeback_enabled("upstream").unwrap());
    }

    #[test]
    fn directive_for_unknown_server_fails() {
      let mut fx = fixture(false);
      let err = fx
        .cache
        .apply_writeback(&[WritebackDirective {
          server: "ghost".to_string(),
          enabled: true,
        }])
        .unwrap_err();
      assert!(matches!(err, CacheError::UnknownServer(name) if name == "ghost"));
    }

    #[test]
    fn push_updates_server_and_mirror() {
      let fx = fixture(true);
      let src = fx.server_dir.parent().unwrap().join("local.txt");
      fs::write(&src, "data").unwrap();

      fx.cache.push_file(&src, "upstream", "up/local.txt").unwrap();
      assert_eq!(fs::read_to_string(fx.server_dir.join("up/local.txt")).unwrap(), "data");
      assert!(fx.cache.file_in_cache("upstream", "up/local.txt"));
    }
  }

  mod publish {
    use super::*;

    #[test]
    fn publishes_content_and_checksum() {
      let fx = fixture(true);
      let src = fx.server_dir.parent().unwrap().join("pkg.tar.gz");
      fs::write(&src, "archive").unwrap();

      let checksum = fx.cache.publish(&src, "upstream", "pkg/pkg.tar.gz").unwrap();
      let sidecar = fs::read_to_string(fx.server_dir.join("pkg/pkg.tar.gz.sha256")).unwrap();
      assert_eq!(sidecar, format!("{}  pkg.tar.gz\n", checksum));
    }

    #[test]
    fn refuses_existing_checksum_without_partial_upload() {
      let fx = fixture(true);
      put(&fx, "pkg/pkg.tar.gz.sha256", "old");
      let src = fx.server_dir.parent().unwrap().join("pkg.tar.gz");
      fs::write(&src, "archive").unwrap();

      let err = fx.cache.publish(&src, "upstream", "pkg/pkg.tar.gz").unwrap_err();
      assert!(matches!(
        err,
        CacheError::DuplicateArtifact { ref location, .. } if location == "pkg/pkg.tar.gz.sha256"
      ));
      assert!(!fx.server_dir.join("pkg/pkg.tar.gz").exists());
    }

    #[test]
    fn refuses_content_already_in_cache() {
      let fx = fixture(true);
      put(&fx, "pkg/pkg.tar.gz", "archive");
      fx.cache
        .cache_file("upstream", "pkg/pkg.tar.gz", CacheFlags::default())
        .unwrap();
      fs::remove_file(fx.server_dir.join("pkg/pkg.tar.gz")).unwrap();

      let src = fx.server_dir.parent().unwrap().join("pkg.tar.gz");
      fs::write(&src, "another archive").unwrap();
      assert!(matches!(
        fx.cache.publish(&src, "upstream", "pkg/pkg.tar.gz"),
        Err(CacheError::DuplicateArtifact { ref location, .. }) if location == "pkg/pkg.tar.gz"
      ));
      assert!(!fx.server_dir.join("pkg/pkg.tar.gz.sha256").exists());
    }

    #[test]
    fn completes_publish_missing_its_checksum() {
      let fx = fixture(true);
      put(&fx, "pkg/pkg.tar.gz", "archive");
      let src = fx.server_dir.parent().unwrap().join("pkg.tar.gz");
      fs::write(&src, "archive").unwrap();

      let checksum = fx.cache.publish(&src, "upstream", "pkg/pkg.tar.gz").unwrap();
      assert_eq!(checksum, hash_local(&src).unwrap());
      let sidecar = fs::read_to_string(fx.server_dir.join("pkg/pkg.tar.gz.sha256")).unwrap();
      assert_eq!(sidecar, format!("{}  pkg.tar.gz\n", checksum));

      // Once the sidecar is there the artifact is final.
      assert!(matches!(
        fx.cache.publish(&src, "upstream", "pkg/pkg.tar.gz"),
        Err(CacheError::DuplicateArtifact { .. })
      ));
    }
  }

  #[test]
  fn checksum_and_verify() {
    let fx = fixture(false);
    put(&fx, "f.txt", "hello world");
    let sum = fx.cache.checksum("upstream", "f.txt", CacheFlags::default()).unwrap();
    assert_eq!(sum, crate::util::hash::hash_bytes(b"hello world"));

    let cached = fx.cache.cache_path("upstream", "f.txt").unwrap();
    verify_checksum(&cached, &sum.0, "upstream", "f.txt").unwrap();
    assert!(matches!(
      verify_checksum(&cached, "00", "upstream", "f.txt"),
      Err(CacheError::ChecksumMismatch { .. })
    ));
  }
}
