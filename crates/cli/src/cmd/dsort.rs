//! `e2 dsort`: every result in build order.

use anyhow::Result;
use e2factory_lib::results::DependencyGraph;

use super::{GlobalArgs, Session};

pub fn cmd_dsort(global: &GlobalArgs) -> Result<()> {
  let session = Session::open(global)?;
  let graph = DependencyGraph::new(&session.project)?;
  for name in graph.full_order() {
    println!("{}", name);
  }
  Ok(())
}
