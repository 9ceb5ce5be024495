//! Test helpers: on-disk project fixtures.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use crate::consts::PROJECT_SERVER;
use crate::project::{LicenceConfig, Project, ProjectInfo, ResultConfig, SourceConfig};

/// Write `content` to `root/rel`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, content: &str) {
  let path = root.join(rel);
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).unwrap();
  }
  fs::write(path, content).unwrap();
}

/// A project rooted in a temporary directory, built record by record.
///
/// Every result gets a trivial build script; `files` sources point at a file
/// below `upstream/` on the `.` server.
pub struct TestProject {
  pub temp: TempDir,
  pub project: Project,
}

impl TestProject {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let mut project = Project::new(temp.path(), ProjectInfo::new("test-project", "r1"));
    project.licences.insert(
      "test".to_string(),
      LicenceConfig {
        name: "test".to_string(),
        files: Vec::new(),
      },
    );
    Self { temp, project }
  }

  pub fn root(&self) -> &Path {
    self.temp.path()
  }

  pub fn result(mut self, name: &str, sources: &[&str], depends: &[&str]) -> Self {
    write_file(self.root(), &format!("res/{}/build-script", name), "true\n");
    let result = ResultConfig::new(name)
      .with_sources(sources.iter().copied())
      .with_depends(depends.iter().copied());
    self.project.results.insert(name.to_string(), result);
    self
  }

  /// A `files` source copying one file with the given content.
  pub fn files_source(mut self, name: &str, content: &str) -> Self {
    let location = format!("upstream/{}.txt", name);
    write_file(self.root(), &location, content);
    let source = SourceConfig::new(name, "files").with_licences(["test"]).with_attr(
      "file",
      serde_json::json!([{ "server": PROJECT_SERVER, "location": location, "copy": "." }]),
    );
    self.project.sources.insert(name.to_string(), source);
    self
  }

  pub fn source(mut self, source: SourceConfig) -> Self {
    self.project.sources.insert(source.name.clone(), source);
    self
  }
}

impl Default for TestProject {
  fn default() -> Self {
    Self::new()
  }
}
