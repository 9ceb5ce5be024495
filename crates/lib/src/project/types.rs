//! Project records: project info, licences, sources and results.
//!
//! These are the already-parsed configuration records. Backend specific
//! source attributes stay untyped (`attrs`) so that each backend owns their
//! interpretation and validation.

use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::ServerConfig;
use crate::consts::{
  BUILD_SCRIPT, INIT_DIR, OUT_DIR, RELEASES_SERVER, RESULTS_DIR, RESULTS_SERVER, SOURCES_DIR, WORKING_COPY_DIR,
};
use crate::util::hash::Fingerprint;
use crate::util::strings::StringSet;
use crate::validate::{Problems, is_env_name};

/// Errors raised while loading or querying a project.
#[derive(Debug, Error)]
pub enum ProjectError {
  #[error("not a project directory (no proj/config): {0}")]
  NotAProject(PathBuf),

  #[error("failed to read '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to evaluate '{path}': {message}")]
  Lua { path: PathBuf, message: String },

  #[error("malformed configuration in '{path}': {message}")]
  Malformed { path: PathBuf, message: String },

  #[error("invalid configuration for {entity}: {problems}")]
  Invalid { entity: String, problems: Problems },

  #[error("{kind} '{name}' is declared more than once")]
  Duplicate { kind: &'static str, name: String },

  #[error("unknown result: {0}")]
  UnknownResult(String),

  #[error("unknown source: {0}")]
  UnknownSource(String),

  #[error("unknown licence: {0}")]
  UnknownLicence(String),

  #[error("failed to hash project files: {0}")]
  Hash(#[from] crate::util::hash::HashError),
}

fn default_arch() -> String {
  "x86_64".to_string()
}

fn default_result_server() -> String {
  RESULTS_SERVER.to_string()
}

fn default_release_server() -> String {
  RELEASES_SERVER.to_string()
}

/// Static project information from `proj/config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectInfo {
  pub name: String,
  pub release_id: String,
  #[serde(default = "default_arch")]
  pub chroot_arch: String,
  #[serde(default)]
  pub default_results: StringSet,
  #[serde(default = "default_result_server")]
  pub result_server: String,
  #[serde(default = "default_release_server")]
  pub release_server: String,
}

impl ProjectInfo {
  pub fn new(name: &str, release_id: &str) -> Self {
    Self {
      name: name.to_string(),
      release_id: release_id.to_string(),
      chroot_arch: default_arch(),
      default_results: StringSet::new(),
      result_server: default_result_server(),
      release_server: default_release_server(),
    }
  }
}

/// A file belonging to a licence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LicenceFile {
  pub server: String,
  pub location: String,
  #[serde(default)]
  pub sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LicenceConfig {
  pub name: String,
  #[serde(default)]
  pub files: Vec<LicenceFile>,
}

/// A named build input.
///
/// `source_type` selects the backend. Everything a backend needs beyond the
/// common fields lives in `attrs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
  pub name: String,
  #[serde(rename = "type")]
  pub source_type: String,
  #[serde(default)]
  pub licences: Option<StringSet>,
  #[serde(default)]
  pub env: BTreeMap<String, String>,
  #[serde(flatten)]
  pub attrs: BTreeMap<String, serde_json::Value>,
}

impl SourceConfig {
  pub fn new(name: &str, source_type: &str) -> Self {
    Self {
      name: name.to_string(),
      source_type: source_type.to_string(),
      licences: None,
      env: BTreeMap::new(),
      attrs: BTreeMap::new(),
    }
  }

  /// A string attribute, `None` when missing or not a string.
  pub fn attr_str(&self, key: &str) -> Option<&str> {
    self.attrs.get(key).and_then(|v| v.as_str())
  }

  pub fn with_attr(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
    self.attrs.insert(key.to_string(), value.into());
    self
  }

  pub fn with_licences<I, S>(mut self, names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.licences = Some(names.into_iter().collect());
    self
  }

  /// Licence names, empty when the attribute is missing.
  pub fn licence_names(&self) -> StringSet {
    self.licences.clone().unwrap_or_default()
  }
}

/// A named build target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResultConfig {
  pub name: String,
  #[serde(default)]
  pub sources: StringSet,
  #[serde(default)]
  pub depends: StringSet,
  #[serde(default)]
  pub env: BTreeMap<String, String>,
}

impl ResultConfig {
  pub fn new(name: &str) -> Self {
    Self {
      name: name.to_string(),
      sources: StringSet::new(),
      depends: StringSet::new(),
      env: BTreeMap::new(),
    }
  }

  pub fn with_sources<I: IntoIterator<Item = S>, S: Into<String>>(mut self, names: I) -> Self {
    self.sources = names.into_iter().collect();
    self
  }

  pub fn with_depends<I: IntoIterator<Item = S>, S: Into<String>>(mut self, names: I) -> Self {
    self.depends = names.into_iter().collect();
    self
  }
}

/// A fully loaded project.
#[derive(Debug, Clone)]
pub struct Project {
  pub root: PathBuf,
  pub info: ProjectInfo,
  pub servers: BTreeMap<String, ServerConfig>,
  pub licences: BTreeMap<String, LicenceConfig>,
  pub sources: BTreeMap<String, SourceConfig>,
  pub results: BTreeMap<String, ResultConfig>,
  pub(crate) identity: OnceCell<Fingerprint>,
}

impl Project {
  /// An empty project rooted at `root`, with only the implicit servers.
  pub fn new(root: &Path, info: ProjectInfo) -> Self {
    let mut project = Self {
      root: root.to_path_buf(),
      info,
      servers: BTreeMap::new(),
      licences: BTreeMap::new(),
      sources: BTreeMap::new(),
      results: BTreeMap::new(),
      identity: OnceCell::new(),
    };
    project.add_implicit_servers();
    project
  }

  /// Register the `.` server and the result/release servers unless the
  /// configuration already declares them.
  pub(crate) fn add_implicit_servers(&mut self) {
    let root = self.root.clone();
    self
      .servers
      .entry(crate::consts::PROJECT_SERVER.to_string())
      .or_insert_with(|| ServerConfig::project_root(&root));
    for name in [self.info.result_server.clone(), self.info.release_server.clone()] {
      self.servers.entry(name.clone()).or_insert_with(|| {
        ServerConfig::local(&name, &crate::platform::paths::implicit_server_dir(&root, &name))
      });
    }
  }

  pub fn source(&self, name: &str) -> Result<&SourceConfig, ProjectError> {
    self
      .sources
      .get(name)
      .ok_or_else(|| ProjectError::UnknownSource(name.to_string()))
  }

  pub fn result(&self, name: &str) -> Result<&ResultConfig, ProjectError> {
    self
      .results
      .get(name)
      .ok_or_else(|| ProjectError::UnknownResult(name.to_string()))
  }

  pub fn licence(&self, name: &str) -> Result<&LicenceConfig, ProjectError> {
    self
      .licences
      .get(name)
      .ok_or_else(|| ProjectError::UnknownLicence(name.to_string()))
  }

  pub fn result_dir(&self, name: &str) -> PathBuf {
    self.root.join(RESULTS_DIR).join(name)
  }

  pub fn build_script(&self, name: &str) -> PathBuf {
    self.result_dir(name).join(BUILD_SCRIPT)
  }

  pub fn source_dir(&self, name: &str) -> PathBuf {
    self.root.join(SOURCES_DIR).join(name)
  }

  pub fn init_dir(&self) -> PathBuf {
    self.root.join(INIT_DIR)
  }

  /// Local output directory of one result build.
  pub fn out_dir(&self, result: &str, buildid: &Fingerprint) -> PathBuf {
    self.root.join(OUT_DIR).join(result).join(&buildid.0)
  }

  /// Default working copy location, `in/<source>`.
  pub fn default_working_copy(&self, source: &str) -> String {
    format!("{}/{}", WORKING_COPY_DIR, source)
  }

  /// Resolve a result selection.
  ///
  /// An empty selection means the project's default results, or all results
  /// when none are declared. Unknown names fail before anything else happens.
  pub fn select_results(&self, names: &[String]) -> Result<StringSet, ProjectError> {
    if names.is_empty() {
      let defaults = if self.info.default_results.is_empty() {
        self.results.keys().cloned().collect()
      } else {
        self.info.default_results.clone()
      };
      return self.check_results(defaults);
    }
    self.check_results(names.iter().cloned().collect())
  }

  fn check_results(&self, selection: StringSet) -> Result<StringSet, ProjectError> {
    for name in selection.iter() {
      self.result(name)?;
    }
    Ok(selection)
  }

  /// Resolve a source selection; empty means all sources.
  pub fn select_sources(&self, names: &[String]) -> Result<StringSet, ProjectError> {
    if names.is_empty() {
      return Ok(self.sources.keys().cloned().collect());
    }
    for name in names {
      self.source(name)?;
    }
    Ok(names.iter().cloned().collect())
  }

  /// Check the cross references of every result.
  ///
  /// Unknown sources are reported immediately; other problems of one result
  /// are collected and reported together.
  pub fn validate_results(&self) -> Result<(), ProjectError> {
    for result in self.results.values() {
      for source in result.sources.iter() {
        self.source(source)?;
      }
      let mut problems = Problems::new();
      if result.name.is_empty() {
        problems.push("result name is empty");
      }
      if result.depends.contains(&result.name) {
        problems.push("result depends on itself");
      }
      for key in result.env.keys() {
        if !is_env_name(key) {
          problems.push(format!("invalid env variable name '{}'", key));
        }
      }
      if !self.build_script(&result.name).is_file() {
        problems.push(format!("{} missing", BUILD_SCRIPT));
      }
      problems.into_result().map_err(|problems| ProjectError::Invalid {
        entity: format!("result {}", result.name),
        problems,
      })?;
    }
    Ok(())
  }

  /// Check project info and licence declarations.
  pub fn validate_info(&self) -> Result<(), ProjectError> {
    let mut problems = Problems::new();
    if self.info.name.is_empty() {
      problems.push("name is empty");
    }
    if self.info.release_id.is_empty() {
      problems.push("release_id is empty");
    }
    if let Err(e) = self.info.chroot_arch.parse::<crate::platform::ChrootArch>() {
      problems.push(e);
    }
    for name in self.info.default_results.iter() {
      if !self.results.contains_key(name) {
        problems.push(format!("default result '{}' does not exist", name));
      }
    }
    for licence in self.licences.values() {
      for (i, file) in licence.files.iter().enumerate() {
        if !self.servers.contains_key(&file.server) {
          problems.push(format!(
            "licence {} file {}: unknown server '{}'",
            licence.name,
            i + 1,
            file.server
          ));
        }
      }
    }
    problems.into_result().map_err(|problems| ProjectError::Invalid {
      entity: "project".to_string(),
      problems,
    })
  }
}
