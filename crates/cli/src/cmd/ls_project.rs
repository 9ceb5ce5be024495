//! `e2 ls-project`: project summary.
//!
//! Text output lists servers, results with their inputs and each source's
//! display lines. `--json` emits the same data as one document.

use anyhow::Result;
use serde_json::{Value, json};

use super::{GlobalArgs, Session};
use crate::output::{print_json, print_stat, print_success, print_warning, symbols};

pub fn cmd_ls_project(global: &GlobalArgs, json: bool) -> Result<()> {
  let session = Session::open(global)?;
  let project = &session.project;

  let mut sources = Vec::new();
  for name in project.sources.keys() {
    match session.registry.display(session.ctx(), name) {
      Ok(lines) => sources.push((name.as_str(), lines)),
      Err(e) => {
        print_warning(&format!("{}: {}", name, e));
        sources.push((name.as_str(), Vec::new()));
      }
    }
  }

  if json {
    let servers: Value = project
      .servers
      .values()
      .map(|s| (s.name.clone(), json!({ "url": s.url, "cachable": s.cachable, "writeback": s.writeback })))
      .collect::<serde_json::Map<_, _>>()
      .into();
    let results: Value = project
      .results
      .values()
      .map(|r| (r.name.clone(), json!({ "sources": r.sources, "depends": r.depends })))
      .collect::<serde_json::Map<_, _>>()
      .into();
    let source_list: Value = sources
      .iter()
      .map(|(name, lines)| (name.to_string(), json!(lines)))
      .collect::<serde_json::Map<_, _>>()
      .into();
    print_json(&json!({
      "name": project.info.name,
      "release_id": project.info.release_id,
      "chroot_arch": project.info.chroot_arch,
      "default_results": project.info.default_results,
      "servers": servers,
      "results": results,
      "sources": source_list,
    }))?;
    return Ok(());
  }

  print_success(&format!("Project {}", project.info.name));
  print_stat("Release", &project.info.release_id);
  print_stat("Chroot arch", &project.info.chroot_arch);
  print_stat("Default results", &project.info.default_results.concat(", "));

  println!();
  println!("Servers:");
  for server in project.servers.values() {
    println!("  {} {} {} {}", symbols::INFO, server.name, symbols::ARROW, server.url);
  }

  println!();
  println!("Results:");
  for result in project.results.values() {
    println!("  {} {}", symbols::INFO, result.name);
    if !result.sources.is_empty() {
      println!("      sources: {}", result.sources.concat(", "));
    }
    if !result.depends.is_empty() {
      println!("      depends: {}", result.depends.concat(", "));
    }
  }

  println!();
  println!("Sources:");
  for (name, lines) in &sources {
    println!("  {} {}", symbols::INFO, name);
    for line in lines {
      println!("      {}", line);
    }
  }
  Ok(())
}
