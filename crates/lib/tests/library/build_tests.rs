//! Building the fixture project end to end with the host sandbox.

#![cfg(unix)]

use std::fs;

use e2factory_lib::build::{BuildMode, BuildRequest, HostSandbox, ResultOutcome, artifact_location, build_results, plan};
use e2factory_lib::cache::WritebackDirective;
use e2factory_lib::platform::paths::sandbox_dir;

use super::common::{Fixture, Session};

fn run(session: &Session, request: &BuildRequest) -> e2factory_lib::build::BuildReport {
  let sandbox = HostSandbox::new(
    &sandbox_dir(&session.project.root),
    &session.cache.tools().shell,
  );
  build_results(session.ctx(), &session.registry, &sandbox, request).unwrap()
}

#[test]
fn default_selection_builds_closure() {
  let fixture = Fixture::new();
  let session = fixture.load();
  let report = run(&session, &BuildRequest::default());

  assert!(report.is_success(), "{:?}", report.outcomes);
  assert_eq!(report.order, vec!["base", "tools", "app"]);

  let app = session.project.out_dir("app", &report.buildids["app"]).join("result.tar");
  let unpacked = tempfile::TempDir::new().unwrap();
  tar::Archive::new(fs::File::open(app).unwrap())
    .unpack(unpacked.path())
    .unwrap();
  assert_eq!(
    fs::read_to_string(unpacked.path().join("app")).unwrap(),
    "int deflate(void);\ntools\n"
  );
}

#[test]
fn rebuild_only_what_changed() {
  let fixture = Fixture::new();
  run(&fixture.load(), &BuildRequest::default());

  fixture.result("app", &[], &["tools"], "cp \"$E2_DEPS/tools/tools\" \"$E2_OUT/app.txt\"\n");
  let report = run(&fixture.load(), &BuildRequest::default());
  assert_eq!(report.outcome("base"), Some(&ResultOutcome::UpToDate));
  assert_eq!(report.outcome("tools"), Some(&ResultOutcome::UpToDate));
  assert_eq!(report.outcome("app"), Some(&ResultOutcome::Built));
}

#[test]
fn upstream_file_is_mirrored_in_cache() {
  let fixture = Fixture::new();
  let session = fixture.load();
  run(&session, &BuildRequest::default());
  assert!(session.cache.file_in_cache("upstream", "zlib/zlib.c"));
}

#[test]
fn release_mode_stores_on_release_server() {
  let fixture = Fixture::new();
  let session = fixture.load();
  let request = BuildRequest {
    results: vec!["base".to_string()],
    mode: BuildMode::Release,
    ..Default::default()
  };
  let report = run(&session, &request);

  let (server, location) = artifact_location(&session.project, BuildMode::Release, "base", &report.buildids["base"]);
  assert_eq!(server, "releases");
  assert!(location.starts_with("demo/releases/demo-1.0/base/"));
  assert!(session.cache.file_exists(&server, &location).unwrap());
}

#[test]
fn disabled_writeback_builds_without_storing() {
  let fixture = Fixture::new();
  let mut session = fixture.load();
  session
    .cache
    .apply_writeback(&["results=off".parse::<WritebackDirective>().unwrap()])
    .unwrap();
  let request = BuildRequest {
    results: vec!["base".to_string()],
    ..Default::default()
  };

  let report = run(&session, &request);
  assert_eq!(report.outcome("base"), Some(&ResultOutcome::Built));
  let report = run(&session, &request);
  assert_eq!(report.outcome("base"), Some(&ResultOutcome::Built));
}

#[test]
fn buildid_display_does_not_build() {
  let fixture = Fixture::new();
  let session = fixture.load();
  let plan = plan(session.ctx(), &session.registry, &BuildRequest::default()).unwrap();
  let ids = plan.ordered_buildids();
  assert_eq!(ids.len(), 3);
  assert_eq!(ids[2].0, "app");
  assert!(!session.project.root.join("out").exists());
}

#[test]
fn missing_upstream_file_fails_fetch() {
  let fixture = Fixture::new();
  fs::remove_file(fixture.upstream_dir.path().join("zlib/zlib.c")).unwrap();
  let session = fixture.load();
  let sandbox = HostSandbox::new(&sandbox_dir(&session.project.root), &session.cache.tools().shell);
  let err = build_results(session.ctx(), &session.registry, &sandbox, &BuildRequest::default()).unwrap_err();
  assert!(err.to_string().contains("zlib"), "{err}");
}
