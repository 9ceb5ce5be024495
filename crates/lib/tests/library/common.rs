//! Shared helpers: a small project tree plus an upstream file server.

use std::fs;
use std::path::{Path, PathBuf};

use e2factory_lib::cache::Cache;
use e2factory_lib::project::{Project, load_project};
use e2factory_lib::source::{Registry, SourceCtx};
use e2factory_lib::tool::Tools;
use tempfile::TempDir;

pub fn write_file(root: &Path, rel: &str, content: &str) {
  let path = root.join(rel);
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).unwrap();
  }
  fs::write(path, content).unwrap();
}

/// Project `demo` with results `base` <- `tools` <- `app`.
///
/// `base` builds from `zlib` (a file on the cached `upstream` server),
/// `tools` from `patches` (a file inside the project).
pub struct Fixture {
  pub project_dir: TempDir,
  pub upstream_dir: TempDir,
}

impl Fixture {
  pub fn new() -> Self {
    let project_dir = TempDir::new().unwrap();
    let upstream_dir = TempDir::new().unwrap();
    let fixture = Self {
      project_dir,
      upstream_dir,
    };
    let root = fixture.root();
    let upstream = dunce::canonicalize(fixture.upstream_dir.path()).unwrap();

    write_file(
      &root,
      "proj/config",
      r#"e2project { name = "demo", release_id = "demo-1.0", default_results = { "app" } }"#,
    );
    write_file(
      &root,
      "proj/servers",
      &format!(
        r#"e2server {{ name = "upstream", url = "file://{}", cachable = true, cache = true }}"#,
        upstream.display()
      ),
    );
    write_file(&root, "proj/licences", r#"e2licence { name = "zlib" }"#);
    write_file(&root, "proj/init/env", "LANG=C\n");

    fixture.upstream_file("zlib/zlib.c", "int deflate(void);\n");
    write_file(
      &root,
      "src/zlib/config",
      r#"e2source {
        type = "files",
        licences = { "zlib" },
        server = "upstream",
        file = { { location = "zlib/zlib.c", copy = "." } },
      }"#,
    );
    write_file(&root, "local/tools.patch", "tools\n");
    write_file(
      &root,
      "src/patches/config",
      r#"e2source {
        type = "files",
        licences = { "zlib" },
        file = { { server = ".", location = "local/tools.patch", copy = "." } },
      }"#,
    );

    fixture.result("base", &["zlib"], &[], "cp zlib/zlib.c \"$E2_OUT/\"\n");
    fixture.result(
      "tools",
      &["patches"],
      &["base"],
      "cat \"$E2_DEPS/base/zlib.c\" patches/tools.patch > \"$E2_OUT/tools\"\n",
    );
    fixture.result("app", &[], &["tools"], "cp \"$E2_DEPS/tools/tools\" \"$E2_OUT/app\"\n");
    fixture
  }

  pub fn root(&self) -> PathBuf {
    dunce::canonicalize(self.project_dir.path()).unwrap()
  }

  pub fn upstream_file(&self, rel: &str, content: &str) {
    write_file(self.upstream_dir.path(), rel, content);
  }

  pub fn result(&self, name: &str, sources: &[&str], depends: &[&str], script: &str) {
    let list = |names: &[&str]| {
      names
        .iter()
        .map(|n| format!("\"{}\"", n))
        .collect::<Vec<_>>()
        .join(", ")
    };
    write_file(
      &self.root(),
      &format!("res/{}/config", name),
      &format!("e2result {{ sources = {{ {} }}, depends = {{ {} }} }}", list(sources), list(depends)),
    );
    write_file(&self.root(), &format!("res/{}/build-script", name), script);
  }

  pub fn load(&self) -> Session {
    let project = load_project(&self.root()).unwrap();
    let cache = Cache::new(
      &self.root().join(".e2/cache"),
      project.servers.values().cloned(),
      Tools::default(),
    );
    Session {
      project,
      cache,
      registry: Registry::with_default_backends().unwrap(),
    }
  }
}

/// Everything one `e2` invocation holds.
pub struct Session {
  pub project: Project,
  pub cache: Cache,
  pub registry: Registry,
}

impl Session {
  pub fn ctx(&self) -> SourceCtx<'_> {
    SourceCtx {
      project: &self.project,
      cache: &self.cache,
    }
  }
}
