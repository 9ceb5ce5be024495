//! Reading a project tree from disk.
//!
//! Configuration files are Lua chunks evaluated in a restricted runtime
//! (table, string and math libraries only). Each file declares records by
//! calling one of the constructor globals:
//!
//! ```lua
//! e2source {
//!   type = "files",
//!   licences = { "gpl2" },
//!   file = { { server = "upstream", location = "zlib/zlib-1.3.tar.gz", unpack = "zlib-1.3" } },
//! }
//! ```
//!
//! Tables are converted to JSON values through mlua's serde support and then
//! into the typed records of [`super::types`].

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use mlua::prelude::*;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use super::types::{LicenceConfig, Project, ProjectError, ProjectInfo, ResultConfig, SourceConfig};
use crate::cache::ServerConfig;
use crate::consts::{CONFIG_FILE, LICENCES_CONFIG, PROJECT_CONFIG, RESULTS_DIR, SERVERS_CONFIG, SOURCES_DIR};

const CONSTRUCTORS: [&str; 5] = ["e2project", "e2server", "e2licence", "e2source", "e2result"];

type Collected = Rc<RefCell<BTreeMap<&'static str, Vec<Value>>>>;

/// Load and validate the project rooted at `root`.
pub fn load_project(root: &Path) -> Result<Project, ProjectError> {
  let root = dunce::canonicalize(root).map_err(|source| ProjectError::Read {
    path: root.to_path_buf(),
    source,
  })?;
  let config = root.join(PROJECT_CONFIG);
  if !config.is_file() {
    return Err(ProjectError::NotAProject(root));
  }

  let info: ProjectInfo = single(&config, "e2project")?;
  let mut project = Project::new(&root, info);

  let servers_file = root.join(SERVERS_CONFIG);
  if servers_file.is_file() {
    let mut seen = BTreeMap::new();
    for server in many::<ServerConfig>(&servers_file, "e2server")? {
      if seen.insert(server.name.clone(), ()).is_some() {
        return Err(ProjectError::Duplicate {
          kind: "server",
          name: server.name,
        });
      }
      project.servers.insert(server.name.clone(), server);
    }
  }

  let licences_file = root.join(LICENCES_CONFIG);
  if licences_file.is_file() {
    for licence in many::<LicenceConfig>(&licences_file, "e2licence")? {
      if project.licences.contains_key(&licence.name) {
        return Err(ProjectError::Duplicate {
          kind: "licence",
          name: licence.name,
        });
      }
      project.licences.insert(licence.name.clone(), licence);
    }
  }

  for (name, path) in config_dirs(&root.join(SOURCES_DIR))? {
    let source: SourceConfig = named(&path, "e2source", &name)?;
    project.sources.insert(name, source);
  }
  for (name, path) in config_dirs(&root.join(RESULTS_DIR))? {
    let result: ResultConfig = named(&path, "e2result", &name)?;
    project.results.insert(name, result);
  }

  project.validate_info()?;
  project.validate_results()?;

  info!(
    project = %project.info.name,
    sources = project.sources.len(),
    results = project.results.len(),
    "loaded project"
  );
  Ok(project)
}

/// `(name, <dir>/<name>/config)` for every subdirectory holding a config
/// file, sorted by name.
fn config_dirs(dir: &Path) -> Result<Vec<(String, PathBuf)>, ProjectError> {
  if !dir.is_dir() {
    return Ok(Vec::new());
  }
  let entries = fs::read_dir(dir).map_err(|source| ProjectError::Read {
    path: dir.to_path_buf(),
    source,
  })?;

  let mut found = Vec::new();
  for entry in entries {
    let entry = entry.map_err(|source| ProjectError::Read {
      path: dir.to_path_buf(),
      source,
    })?;
    let config = entry.path().join(CONFIG_FILE);
    if config.is_file() {
      found.push((entry.file_name().to_string_lossy().into_owned(), config));
    }
  }
  found.sort();
  Ok(found)
}

/// Evaluate one configuration file and return everything it declared.
fn evaluate(path: &Path) -> Result<BTreeMap<&'static str, Vec<Value>>, ProjectError> {
  let content = fs::read_to_string(path).map_err(|source| ProjectError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  let lua_err = |e: LuaError| ProjectError::Lua {
    path: path.to_path_buf(),
    message: e.to_string(),
  };

  let collected: Collected = Rc::default();
  let lua = create_runtime(collected.clone()).map_err(lua_err)?;
  lua
    .load(&content)
    .set_name(format!("@{}", path.display()))
    .exec()
    .map_err(lua_err)?;
  drop(lua);

  debug!(path = %path.display(), "evaluated configuration");
  Ok(collected.take())
}

fn create_runtime(collected: Collected) -> LuaResult<Lua> {
  let lua = Lua::new_with(
    LuaStdLib::TABLE | LuaStdLib::STRING | LuaStdLib::MATH,
    LuaOptions::default(),
  )?;
  for kind in CONSTRUCTORS {
    let collected = collected.clone();
    let constructor = lua.create_function(move |lua, table: LuaTable| {
      let value: Value = lua.from_value(LuaValue::Table(table))?;
      collected.borrow_mut().entry(kind).or_default().push(value);
      Ok(())
    })?;
    lua.globals().set(kind, constructor)?;
  }
  Ok(lua)
}

/// All declarations of `kind`; any other constructor in the file is an error.
fn many<T: DeserializeOwned>(path: &Path, kind: &str) -> Result<Vec<T>, ProjectError> {
  let mut declared = evaluate(path)?;
  if let Some(other) = declared.keys().find(|k| **k != kind) {
    return Err(malformed(path, format!("unexpected {} declaration", other)));
  }
  declared
    .remove(kind)
    .unwrap_or_default()
    .into_iter()
    .map(|value| convert(path, value))
    .collect()
}

/// Exactly one declaration of `kind`.
fn single<T: DeserializeOwned>(path: &Path, kind: &str) -> Result<T, ProjectError> {
  let mut values = many::<Value>(path, kind)?;
  if values.len() != 1 {
    return Err(malformed(
      path,
      format!("expected exactly one {} declaration, found {}", kind, values.len()),
    ));
  }
  convert(path, values.remove(0))
}

/// Exactly one declaration of `kind`, named after its directory.
fn named<T: DeserializeOwned>(path: &Path, kind: &str, name: &str) -> Result<T, ProjectError> {
  let mut value: Value = single(path, kind)?;
  let Value::Object(map) = &mut value else {
    return Err(malformed(path, format!("{} expects a table", kind)));
  };
  match map.get("name") {
    None => {
      map.insert("name".to_string(), Value::String(name.to_string()));
    }
    Some(Value::String(declared)) if declared == name => {}
    Some(other) => {
      return Err(malformed(
        path,
        format!("name {} does not match directory '{}'", other, name),
      ));
    }
  }
  convert(path, value)
}

fn convert<T: DeserializeOwned>(path: &Path, value: Value) -> Result<T, ProjectError> {
  let value = prune_empty(value).unwrap_or(Value::Object(Default::default()));
  serde_json::from_value(value).map_err(|e| malformed(path, e.to_string()))
}

fn malformed(path: &Path, message: String) -> ProjectError {
  ProjectError::Malformed {
    path: path.to_path_buf(),
    message,
  }
}

/// Drop empty tables.
///
/// Lua has no distinction between an empty list and an empty map, so empty
/// tables are treated as absent and every collection field defaults.
fn prune_empty(value: Value) -> Option<Value> {
  match value {
    Value::Object(map) => {
      let map: serde_json::Map<String, Value> = map
        .into_iter()
        .filter_map(|(k, v)| prune_empty(v).map(|v| (k, v)))
        .collect();
      (!map.is_empty()).then_some(Value::Object(map))
    }
    Value::Array(items) => {
      let items: Vec<Value> = items.into_iter().filter_map(prune_empty).collect();
      (!items.is_empty()).then_some(Value::Array(items))
    }
    other => Some(other),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::write_file;
  use tempfile::TempDir;

  fn minimal(root: &Path) {
    write_file(root, PROJECT_CONFIG, r#"e2project { name = "demo", release_id = "r1" }"#);
  }

  #[test]
  fn not_a_project() {
    let temp = TempDir::new().unwrap();
    assert!(matches!(load_project(temp.path()), Err(ProjectError::NotAProject(_))));
  }

  #[test]
  fn loads_records_in_name_order() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    minimal(root);
    write_file(
      root,
      SERVERS_CONFIG,
      r#"
        e2server { name = "upstream", url = "file:///srv/upstream" }
        e2server { name = "results", url = "file:///srv/results", writeback = true }
      "#,
    );
    write_file(
      root,
      LICENCES_CONFIG,
      r#"e2licence { name = "gpl2", files = { { server = ".", location = "proj/licences" } } }"#,
    );
    write_file(
      root,
      "src/zlib/config",
      r#"e2source { type = "files", licences = { "gpl2" }, file = { { server = "upstream", location = "z.tar" } } }"#,
    );
    write_file(root, "res/base/config", r#"e2result { sources = { "zlib" }, env = {} }"#);
    write_file(root, "res/base/build-script", "true\n");
    write_file(root, "res/app/config", r#"e2result { depends = { "base" } }"#);
    write_file(root, "res/app/build-script", "true\n");

    let project = load_project(root).unwrap();
    assert_eq!(project.info.name, "demo");
    assert_eq!(project.info.chroot_arch, "x86_64");
    assert_eq!(project.results.keys().collect::<Vec<_>>(), vec!["app", "base"]);
    assert_eq!(project.result("app").unwrap().depends.to_vec(), vec!["base"]);
    assert!(project.result("app").unwrap().sources.is_empty());

    let zlib = project.source("zlib").unwrap();
    assert_eq!(zlib.name, "zlib");
    assert_eq!(zlib.source_type, "files");
    assert!(zlib.attrs.contains_key("file"));

    // Declared servers replace implicit ones
    assert_eq!(project.servers["results"].url, "file:///srv/results");
    assert!(project.servers.contains_key("."));
    assert!(project.servers.contains_key("releases"));
  }

  #[test]
  fn name_must_match_directory() {
    let temp = TempDir::new().unwrap();
    minimal(temp.path());
    write_file(temp.path(), "res/app/config", r#"e2result { name = "other" }"#);
    write_file(temp.path(), "res/app/build-script", "true\n");
    assert!(matches!(load_project(temp.path()), Err(ProjectError::Malformed { .. })));
  }

  #[test]
  fn one_declaration_per_file() {
    let temp = TempDir::new().unwrap();
    minimal(temp.path());
    write_file(temp.path(), "res/app/config", "e2result {}\ne2result {}\n");
    write_file(temp.path(), "res/app/build-script", "true\n");
    let err = load_project(temp.path()).unwrap_err();
    assert!(err.to_string().contains("exactly one e2result"), "{err}");
  }

  #[test]
  fn wrong_constructor_is_rejected() {
    let temp = TempDir::new().unwrap();
    minimal(temp.path());
    write_file(temp.path(), "src/x/config", r#"e2result { }"#);
    let err = load_project(temp.path()).unwrap_err();
    assert!(err.to_string().contains("unexpected e2result"), "{err}");
  }

  #[test]
  fn lua_errors_name_the_file() {
    let temp = TempDir::new().unwrap();
    write_file(temp.path(), PROJECT_CONFIG, "e2project { name = ");
    match load_project(temp.path()).unwrap_err() {
      ProjectError::Lua { path, .. } => assert!(path.ends_with(PROJECT_CONFIG)),
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn restricted_runtime_has_no_io() {
    let temp = TempDir::new().unwrap();
    write_file(
      temp.path(),
      PROJECT_CONFIG,
      r#"io.open("/tmp/x", "w") e2project { name = "demo", release_id = "r1" }"#,
    );
    assert!(matches!(load_project(temp.path()), Err(ProjectError::Lua { .. })));
  }

  #[test]
  fn missing_build_script_is_reported() {
    let temp = TempDir::new().unwrap();
    minimal(temp.path());
    write_file(temp.path(), "res/app/config", "e2result {}");
    match load_project(temp.path()).unwrap_err() {
      ProjectError::Invalid { problems, .. } => assert_eq!(problems.count(), 1),
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn bad_result_env_names_are_reported() {
    let temp = TempDir::new().unwrap();
    minimal(temp.path());
    write_file(
      temp.path(),
      "res/app/config",
      r#"e2result { env = { ["A=B"] = "C", ["MY VAR"] = "x", OK = "1" } }"#,
    );
    write_file(temp.path(), "res/app/build-script", "true\n");
    match load_project(temp.path()).unwrap_err() {
      ProjectError::Invalid { problems, .. } => {
        assert_eq!(problems.count(), 2);
        assert!(problems.iter().any(|p| p.contains("'A=B'")));
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn prunes_nested_empty_tables() {
    let value = serde_json::json!({ "a": {}, "b": [{}, 1], "c": { "d": [] } });
    assert_eq!(prune_empty(value), Some(serde_json::json!({ "b": [1] })));
  }
}
