//! Build command implementation.
//!
//! Plans the run (selection, order, fetch, build-ids), then builds each
//! result in its own host sandbox and summarizes the outcomes.

use std::time::Instant;

use anyhow::{Result, bail};
use e2factory_lib::build::{self, BuildMode, BuildRequest, BuildSettings, HostSandbox, ResultOutcome};
use e2factory_lib::platform::paths::sandbox_dir;

use super::{GlobalArgs, Session};
use crate::output::{format_duration, print_info, print_outcome, print_stat, print_success, print_warning};

pub struct BuildFlags {
  pub force_rebuild: bool,
  pub keep_sandbox: bool,
  pub playground: bool,
  /// Print build-ids and stop.
  pub buildid: bool,
}

pub fn cmd_build(global: &GlobalArgs, results: Vec<String>, mode: BuildMode, flags: BuildFlags) -> Result<()> {
  let session = Session::open(global)?;
  let request = BuildRequest {
    results,
    mode,
    settings: BuildSettings {
      force_rebuild: flags.force_rebuild,
      keep_sandbox: flags.keep_sandbox,
      playground: flags.playground,
    },
  };

  let plan = build::plan(session.ctx(), &session.registry, &request)?;

  if flags.buildid {
    for (name, id) in plan.ordered_buildids() {
      println!("{} [{}]", name, id);
    }
    return Ok(());
  }

  print_info(&format!("Building {} result(s) in {} mode", plan.order.len(), mode));

  let sandbox = HostSandbox::new(&sandbox_dir(&session.project.root), &session.cache.tools().shell);
  let start = Instant::now();
  let report = build::execute(session.ctx(), &session.registry, &sandbox, &plan);
  let elapsed = start.elapsed();

  for name in &report.order {
    if let Some(outcome) = report.outcome(name) {
      print_outcome(name, report.buildids.get(name), outcome);
    }
  }

  println!();
  print_stat("Built", &report.count(|o| *o == ResultOutcome::Built).to_string());
  print_stat("Up to date", &report.count(|o| *o == ResultOutcome::UpToDate).to_string());
  print_stat("Duration", &format_duration(elapsed));

  if !report.is_success() {
    let failed = report.failed_names();
    bail!("{} result(s) failed: {}", failed.len(), failed.join(", "));
  }
  if !mode.is_reproducible() {
    print_warning("working-copy builds are not stored on the result server");
  }
  print_success("Build complete");
  Ok(())
}
