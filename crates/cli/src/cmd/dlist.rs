//! `e2 dlist`: dependencies of one result.

use anyhow::Result;
use e2factory_lib::results::DependencyGraph;

use super::{GlobalArgs, Session};

pub fn cmd_dlist(global: &GlobalArgs, result: &str, recursive: bool) -> Result<()> {
  let session = Session::open(global)?;
  let graph = DependencyGraph::new(&session.project)?;
  for name in graph.dependencies(result, recursive)? {
    println!("{}", name);
  }
  Ok(())
}
