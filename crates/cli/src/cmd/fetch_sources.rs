//! `e2 fetch-sources`: fetch, update or check working copies and files.

use anyhow::{Result, bail};

use super::{GlobalArgs, Session};
use crate::output::print_batch;

pub fn cmd_fetch_sources(global: &GlobalArgs, sources: &[String], update: bool, check: bool) -> Result<()> {
  let session = Session::open(global)?;
  let selected = session.project.select_sources(sources)?.to_vec();

  let report = if check {
    session.registry.check_sources(session.ctx(), &selected)
  } else {
    session.registry.fetch_sources(session.ctx(), &selected, update)
  };

  let verb = match (check, update) {
    (true, _) => "checked",
    (_, true) => "updated",
    _ => "fetched",
  };
  print_batch(&report, verb);

  if !report.is_success() {
    bail!("{} source(s) failed: {}", report.failed.len(), report.failed_names().join(", "));
  }
  Ok(())
}
