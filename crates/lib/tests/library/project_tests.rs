//! Loading a project and computing identities across sessions.

use e2factory_lib::results::{BuildIds, DependencyGraph};
use e2factory_lib::source::SourceSet;
use e2factory_lib::util::hash::Fingerprint;

use super::common::{Fixture, Session, write_file};

fn buildid(session: &Session, result: &str) -> Fingerprint {
  let graph = DependencyGraph::new(&session.project).unwrap();
  BuildIds::new(session.ctx(), &session.registry, &graph, SourceSet::Tag)
    .buildid(result)
    .unwrap()
}

mod loading {
  use super::*;

  #[test]
  fn graph_orders_results() {
    let fixture = Fixture::new();
    let session = fixture.load();
    let graph = DependencyGraph::new(&session.project).unwrap();

    assert_eq!(graph.full_order(), vec!["base", "tools", "app"]);
    assert_eq!(graph.dependencies("app", false).unwrap(), vec!["tools"]);
    assert_eq!(graph.dependencies("app", true).unwrap(), vec!["base", "tools"]);
    assert_eq!(session.project.select_results(&[]).unwrap().to_vec(), vec!["app"]);
  }

  #[test]
  fn declared_servers_and_implicit_ones() {
    let fixture = Fixture::new();
    let session = fixture.load();
    let servers: Vec<_> = session.project.servers.keys().cloned().collect();
    assert_eq!(servers, vec![".", "releases", "results", "upstream"]);
    assert!(session.project.servers["upstream"].uses_cache());
  }

  #[test]
  fn cycle_is_reported_with_path() {
    let fixture = Fixture::new();
    fixture.result("base", &["zlib"], &["app"], "true\n");
    let session = fixture.load();
    let err = DependencyGraph::new(&session.project).unwrap_err();
    assert!(err.to_string().contains("app -> tools -> base -> app"), "{err}");
  }
}

mod identities {
  use super::*;

  #[test]
  fn reproducible_across_sessions() {
    let fixture = Fixture::new();
    let first = buildid(&fixture.load(), "app");
    let second = buildid(&fixture.load(), "app");
    assert_eq!(first, second);
  }

  #[test]
  fn local_file_change_reaches_dependents_only() {
    let fixture = Fixture::new();
    let before = fixture.load();
    let (base, tools, app) = (
      buildid(&before, "base"),
      buildid(&before, "tools"),
      buildid(&before, "app"),
    );

    write_file(&fixture.root(), "local/tools.patch", "tools, revised\n");
    let after = fixture.load();
    assert_eq!(buildid(&after, "base"), base);
    assert_ne!(buildid(&after, "tools"), tools);
    assert_ne!(buildid(&after, "app"), app);
  }

  #[test]
  fn project_init_files_are_covered() {
    let fixture = Fixture::new();
    let before = buildid(&fixture.load(), "base");
    write_file(&fixture.root(), "proj/init/env", "LANG=de_DE\n");
    assert_ne!(buildid(&fixture.load(), "base"), before);
  }

  #[test]
  fn files_sources_ignore_source_set() {
    let fixture = Fixture::new();
    let session = fixture.load();
    let graph = DependencyGraph::new(&session.project).unwrap();
    let tag = BuildIds::new(session.ctx(), &session.registry, &graph, SourceSet::Tag);
    let branch = BuildIds::new(session.ctx(), &session.registry, &graph, SourceSet::Branch);
    assert_eq!(tag.buildid("base").unwrap(), branch.buildid("base").unwrap());
  }
}
