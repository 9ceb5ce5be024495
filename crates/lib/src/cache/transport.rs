//! Moving bytes between servers and local paths.
//!
//! A server is addressed by a base URL; the transport is picked from its
//! scheme. Servers are opaque key-value stores: fetch a location, push a
//! location, probe a location.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::tool::{ToolCommand, ToolError, Tools};

#[derive(Debug, Error)]
pub enum TransportError {
  #[error("unsupported url '{0}'")]
  UnsupportedUrl(String),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("i/o error on '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("request to '{url}' failed: {source}")]
  Request {
    url: String,
    #[source]
    source: reqwest::Error,
  },

  #[error("'{url}' answered HTTP {status}")]
  Http { url: String, status: u16 },

  #[error(transparent)]
  Tool(#[from] ToolError),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> TransportError + '_ {
  move |source| TransportError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// A way to reach the content of a server.
pub trait Transport {
  /// Copy `url` into `dest`, overwriting it.
  fn fetch(&self, url: &str, dest: &Path) -> Result<(), TransportError>;

  /// Upload `src` to `url`, creating missing directories.
  fn push(&self, src: &Path, url: &str, permissions: Option<&str>) -> Result<(), TransportError>;

  /// Whether `url` exists, without transferring it.
  fn exists(&self, url: &str) -> Result<bool, TransportError>;
}

/// Join a server base URL and a location.
pub fn join_url(base: &str, location: &str) -> String {
  format!("{}/{}", base.trim_end_matches('/'), location.trim_start_matches('/'))
}

/// Pick the transport for `url` by its scheme.
pub fn transport_for(url: &str, tools: &Tools) -> Result<Box<dyn Transport>, TransportError> {
  match url.split_once("://").map(|(scheme, _)| scheme) {
    Some("file") => Ok(Box::new(FileTransport)),
    Some("http") | Some("https") => Ok(Box::new(HttpTransport::new())),
    Some("ssh") | Some("rsync+ssh") => Ok(Box::new(RsyncTransport {
      rsync: tools.rsync.clone(),
    })),
    _ => Err(TransportError::UnsupportedUrl(url.to_string())),
  }
}

/// `file:///path` servers.
pub struct FileTransport;

impl FileTransport {
  fn path(url: &str) -> Result<PathBuf, TransportError> {
    url
      .strip_prefix("file://")
      .map(PathBuf::from)
      .ok_or_else(|| TransportError::UnsupportedUrl(url.to_string()))
  }
}

impl Transport for FileTransport {
  fn fetch(&self, url: &str, dest: &Path) -> Result<(), TransportError> {
    let src = Self::path(url)?;
    if !src.is_file() {
      return Err(TransportError::NotFound(url.to_string()));
    }
    fs::copy(&src, dest).map_err(io_err(&src))?;
    Ok(())
  }

  fn push(&self, src: &Path, url: &str, _permissions: Option<&str>) -> Result<(), TransportError> {
    let dest = Self::path(url)?;
    let dir = dest.parent().ok_or_else(|| TransportError::UnsupportedUrl(url.to_string()))?;
    fs::create_dir_all(dir).map_err(io_err(dir))?;

    // Never expose a half written file on the server
    let tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err(dir))?;
    fs::copy(src, tmp.path()).map_err(io_err(src))?;
    tmp.persist(&dest).map_err(|e| TransportError::Io {
      path: dest.clone(),
      source: e.error,
    })?;
    Ok(())
  }

  fn exists(&self, url: &str) -> Result<bool, TransportError> {
    Ok(Self::path(url)?.is_file())
  }
}

/// `http(s)://` servers: GET, PUT and HEAD.
pub struct HttpTransport {
  client: reqwest::blocking::Client,
}

impl HttpTransport {
  pub fn new() -> Self {
    Self {
      client: reqwest::blocking::Client::new(),
    }
  }

  fn request_err(url: &str) -> impl FnOnce(reqwest::Error) -> TransportError + '_ {
    move |source| TransportError::Request {
      url: url.to_string(),
      source,
    }
  }
}

impl Default for HttpTransport {
  fn default() -> Self {
    Self::new()
  }
}

impl Transport for HttpTransport {
  fn fetch(&self, url: &str, dest: &Path) -> Result<(), TransportError> {
    let mut response = self.client.get(url).send().map_err(Self::request_err(url))?;
    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
      return Err(TransportError::NotFound(url.to_string()));
    }
    if !status.is_success() {
      return Err(TransportError::Http {
        url: url.to_string(),
        status: status.as_u16(),
      });
    }
    let mut file = fs::File::create(dest).map_err(io_err(dest))?;
    response.copy_to(&mut file).map_err(Self::request_err(url))?;
    Ok(())
  }

  fn push(&self, src: &Path, url: &str, _permissions: Option<&str>) -> Result<(), TransportError> {
    let body = fs::read(src).map_err(io_err(src))?;
    let response = self.client.put(url).body(body).send().map_err(Self::request_err(url))?;
    if !response.status().is_success() {
      return Err(TransportError::Http {
        url: url.to_string(),
        status: response.status().as_u16(),
      });
    }
    Ok(())
  }

  /// 404 and 410 mean absent; any other non-2xx answer is an error.
  fn exists(&self, url: &str) -> Result<bool, TransportError> {
    let response = self.client.head(url).send().map_err(Self::request_err(url))?;
    let status = response.status();
    if status.is_success() {
      return Ok(true);
    }
    if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
      return Ok(false);
    }
    Err(TransportError::Http {
      url: url.to_string(),
      status: status.as_u16(),
    })
  }
}

/// rsync exit code for "some files could not be transferred", which is
/// what a listing of a missing remote file ends with.
const RSYNC_PARTIAL_TRANSFER: i32 = 23;

/// `ssh://host/path` servers through `rsync`.
pub struct RsyncTransport {
  rsync: PathBuf,
}

impl RsyncTransport {
  /// `ssh://user@host/path` to `user@host:/path`.
  fn remote(url: &str) -> Result<(String, String), TransportError> {
    let rest = url
      .split_once("://")
      .map(|(_, rest)| rest)
      .ok_or_else(|| TransportError::UnsupportedUrl(url.to_string()))?;
    let (host, path) = rest
      .split_once('/')
      .ok_or_else(|| TransportError::UnsupportedUrl(url.to_string()))?;
    Ok((host.to_string(), format!("/{}", path)))
  }
}

impl Transport for RsyncTransport {
  fn fetch(&self, url: &str, dest: &Path) -> Result<(), TransportError> {
    let (host, path) = Self::remote(url)?;
    ToolCommand::new(&self.rsync)
      .arg("-L")
      .arg(format!("{}:{}", host, path))
      .arg(dest)
      .run()?;
    Ok(())
  }

  fn push(&self, src: &Path, url: &str, permissions: Option<&str>) -> Result<(), TransportError> {
    let (host, path) = Self::remote(url)?;
    let dir = Path::new(&path)
      .parent()
      .map(|p| p.display().to_string())
      .unwrap_or_else(|| "/".to_string());
    let mut command = ToolCommand::new(&self.rsync)
      .arg("-L")
      .arg(format!("--rsync-path=mkdir -p '{}' && rsync", dir));
    if let Some(perms) = permissions {
      command = command.arg(format!("--chmod={}", perms));
    }
    command.arg(src).arg(format!("{}:{}", host, path)).run()?;
    Ok(())
  }

  fn exists(&self, url: &str) -> Result<bool, TransportError> {
    let (host, path) = Self::remote(url)?;
    match ToolCommand::new(&self.rsync)
      .arg("--list-only")
      .arg(format!("{}:{}", host, path))
      .run()
    {
      Ok(()) => Ok(true),
      Err(ToolError::Failed {
        code: Some(RSYNC_PARTIAL_TRANSFER),
        ..
      }) => {
        debug!(url, "rsync listing reports missing file");
        Ok(false)
      }
      Err(e) => Err(e.into()),
    }
  }
}
