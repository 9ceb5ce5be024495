//! `e2 new-source`: publish a file with its checksum.

use std::path::Path;

use anyhow::Result;

use super::{GlobalArgs, Session};
use crate::output::{print_stat, print_success};

pub fn cmd_new_source(global: &GlobalArgs, file: &Path, server: &str, location: &str) -> Result<()> {
  let session = Session::open(global)?;
  let checksum = session.cache.publish(file, server, location)?;

  print_success(&format!("Published {} to {}:{}", file.display(), server, location));
  print_stat("sha256", checksum.as_str());
  Ok(())
}
