//! Batch source operations and publishing.

use e2factory_lib::cache::CacheError;
use e2factory_lib::source::{SourceError, SourceSet};

use super::common::{Fixture, write_file};

#[test]
fn fetch_continues_past_failures() {
  let fixture = Fixture::new();
  write_file(
    &fixture.root(),
    "src/broken/config",
    r#"e2source { type = "files", licences = { "zlib" }, server = "upstream", file = { { location = "missing.c", copy = "." } } }"#,
  );
  let session = fixture.load();
  let names = session.project.select_sources(&[]).unwrap().to_vec();

  let report = session.registry.fetch_sources(session.ctx(), &names, false);
  assert_eq!(report.succeeded, vec!["patches", "zlib"]);
  assert_eq!(report.failed_names(), vec!["broken"]);
  assert!(matches!(report.failed[0].1, SourceError::Cache { .. }));
}

#[test]
fn files_sources_have_no_working_copy() {
  let fixture = Fixture::new();
  let session = fixture.load();
  let report = session.registry.check_sources(session.ctx(), &["zlib", "patches"]);
  assert!(report.is_success());
  assert_eq!(report.skipped, vec!["zlib", "patches"]);
}

#[test]
fn invalid_source_lists_every_problem() {
  let fixture = Fixture::new();
  write_file(
    &fixture.root(),
    "src/broken/config",
    r#"e2source { type = "files", file = { { location = "a.c" }, { server = "nowhere", location = "b.c", copy = "." } } }"#,
  );
  let session = fixture.load();
  match session.registry.sourceid(session.ctx(), "broken", SourceSet::Tag).unwrap_err() {
    SourceError::Invalid { source_name, problems } => {
      assert_eq!(source_name, "broken");
      assert!(problems.count() >= 3, "{problems}");
    }
    other => panic!("unexpected error: {other}"),
  }
}

#[test]
fn display_describes_files() {
  let fixture = Fixture::new();
  let session = fixture.load();
  let lines = session.registry.display(session.ctx(), "zlib").unwrap();
  assert!(lines.iter().any(|l| l.contains("zlib/zlib.c")), "{lines:?}");
}

#[test]
fn publish_refuses_duplicates() {
  let fixture = Fixture::new();
  let mut session = fixture.load();
  session.cache.set_writeback("upstream", true).unwrap();
  let local = fixture.root().join("local/tools.patch");

  let checksum = session.cache.publish(&local, "upstream", "patches/tools.patch").unwrap();
  let sidecar = std::fs::read_to_string(fixture.upstream_dir.path().join("patches/tools.patch.sha256")).unwrap();
  assert_eq!(sidecar, format!("{}  tools.patch\n", checksum));

  assert!(matches!(
    session.cache.publish(&local, "upstream", "patches/tools.patch"),
    Err(CacheError::DuplicateArtifact { .. })
  ));
}
