//! Hashing utilities for build and source identities.
//!
//! This module provides:
//! - `Fingerprint`: a full 64-character SHA-256 digest used for build-ids,
//!   source-ids and artifact storage keys
//! - `ContentHasher`: an incremental accumulator with line-oriented appends
//! - `hash_directory()`: deterministic directory hashing
//! - `hash_file()` / `hash_bytes()`: single file and byte hashing

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// A lowercase hexadecimal SHA-256 digest (64 characters).
///
/// Two results with the same build-id fingerprint are interchangeable, so the
/// fingerprint doubles as the storage key of the result artifact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl Fingerprint {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Incremental digest accumulator.
///
/// Textual fields are fed with an explicit line terminator so that
/// `"a"` followed by `"b"` never hashes like `"ab"`.
#[derive(Clone, Default)]
pub struct ContentHasher {
  inner: Sha256,
}

impl ContentHasher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Feed raw bytes.
  pub fn update(&mut self, data: &[u8]) -> &mut Self {
    self.inner.update(data);
    self
  }

  /// Feed a line of text followed by `\n`.
  pub fn append_line(&mut self, line: &str) -> &mut Self {
    self.inner.update(line.as_bytes());
    self.inner.update(b"\n");
    self
  }

  /// Feed `<len>:key=<len>:value\n`.
  ///
  /// Both parts carry their byte length, so a `=` or `\n` inside a key or
  /// value can never be mistaken for a field boundary.
  pub fn append_field(&mut self, key: &str, value: &str) -> &mut Self {
    self.inner.update(format!("{}:", key.len()).as_bytes());
    self.inner.update(key.as_bytes());
    self.inner.update(format!("={}:", value.len()).as_bytes());
    self.append_line(value)
  }

  /// Feed another fingerprint as a line.
  pub fn append_fingerprint(&mut self, fp: &Fingerprint) -> &mut Self {
    self.append_line(&fp.0)
  }

  pub fn finish(self) -> Fingerprint {
    Fingerprint(hex::encode(self.inner.finalize()))
  }
}

/// Error during file or directory hashing.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
  #[error("failed to walk directory: {message}")]
  WalkDir { message: String },

  #[error("failed to read file {path}: {message}")]
  ReadFile { path: String, message: String },

  #[error("failed to read symlink {path}: {message}")]
  ReadSymlink { path: String, message: String },
}

/// Compute a deterministic hash of a directory's contents.
///
/// The hash covers file contents, the directory structure and symlink
/// targets, never metadata like timestamps or permissions. Entries are
/// sorted by relative path.
///
/// * `exclude` - file/directory names to skip (e.g. `&[".git"]`)
pub fn hash_directory(path: &Path, exclude: &[&str]) -> Result<Fingerprint, HashError> {
  let mut entries: Vec<(String, String)> = Vec::new();

  let walker = WalkDir::new(path).sort_by_file_name().into_iter().filter_entry(|e| {
    e.file_name()
      .to_str()
      .map(|name| !exclude.contains(&name))
      .unwrap_or(true)
  });

  for entry in walker {
    let entry = entry.map_err(|e| HashError::WalkDir { message: e.to_string() })?;
    let entry_path = entry.path();

    let rel_path = entry_path
      .strip_prefix(path)
      .unwrap_or(entry_path)
      .to_string_lossy()
      .replace('\\', "/");

    // Skip the root directory itself
    if rel_path.is_empty() {
      continue;
    }

    let file_type = entry.file_type();
    let entry_hash = if file_type.is_file() {
      let content_hash = hash_file(entry_path)?;
      format!("F:{}:{}", rel_path, content_hash.0)
    } else if file_type.is_dir() {
      format!("D:{}", rel_path)
    } else if file_type.is_symlink() {
      let target = fs::read_link(entry_path).map_err(|e| HashError::ReadSymlink {
        path: entry_path.display().to_string(),
        message: e.to_string(),
      })?;
      let target_hash = hash_bytes(target.to_string_lossy().as_bytes());
      format!("L:{}:{}", rel_path, target_hash.0)
    } else {
      // Sockets, devices and the like carry no content
      continue;
    };

    entries.push((rel_path, entry_hash));
  }

  entries.sort_by(|a, b| a.0.cmp(&b.0));

  let mut hasher = ContentHasher::new();
  for (_, entry_hash) in entries {
    hasher.append_line(&entry_hash);
  }

  Ok(hasher.finish())
}

/// Hash a file's contents.
pub fn hash_file(path: &Path) -> Result<Fingerprint, HashError> {
  let mut file = fs::File::open(path).map_err(|e| HashError::ReadFile {
    path: path.display().to_string(),
    message: e.to_string(),
  })?;

  let mut hasher = ContentHasher::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(|e| HashError::ReadFile {
      path: path.display().to_string(),
      message: e.to_string(),
    })?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(hasher.finish())
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> Fingerprint {
  let mut hasher = ContentHasher::new();
  hasher.update(data);
  hasher.finish()
}
