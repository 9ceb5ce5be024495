//! Terminal output for the `e2` commands.
//!
//! Status lines go to stdout, warnings and errors to stderr. Colors are
//! only used when the stream supports them.

use std::time::Duration;

use anyhow::Context;
use e2factory_lib::build::ResultOutcome;
use e2factory_lib::source::BatchReport;
use e2factory_lib::util::hash::Fingerprint;
use owo_colors::{OwoColorize, Stream};

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const SKIPPED: &str = "-";
  pub const ARROW: &str = "→";
}

/// Build-ids are 64 characters; listings show the first 12.
pub fn short_id(id: &Fingerprint) -> &str {
  let id = id.as_str();
  &id[..id.len().min(12)]
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  match secs {
    0 => format!("{}ms", duration.subsec_millis()),
    1..60 => format!("{}.{:02}s", secs, duration.subsec_millis() / 10),
    _ => format!("{}m {}s", secs / 60, secs % 60),
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

/// One line per result: `  ✓ name [buildid] outcome`.
pub fn print_outcome(name: &str, buildid: Option<&Fingerprint>, outcome: &ResultOutcome) {
  let line = format!("{} [{}] {}", name, buildid.map(short_id).unwrap_or("-"), outcome);
  match outcome {
    ResultOutcome::Built | ResultOutcome::Prepared(_) => println!(
      "  {} {}",
      symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
      line
    ),
    ResultOutcome::UpToDate => println!(
      "  {} {}",
      symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
      line
    ),
    ResultOutcome::Failed(_) | ResultOutcome::DependencyFailed(_) => println!(
      "  {} {}",
      symbols::ERROR.if_supports_color(Stream::Stdout, |s| s.red()),
      line.if_supports_color(Stream::Stdout, |s| s.red())
    ),
  }
}

/// Per-source lines of a batch operation; `verb` describes success.
pub fn print_batch(report: &BatchReport, verb: &str) {
  for name in &report.succeeded {
    print_success(&format!("{} {}", name, verb));
  }
  for name in &report.skipped {
    println!(
      "{} {} skipped",
      symbols::SKIPPED.if_supports_color(Stream::Stdout, |s| s.dimmed()),
      name
    );
  }
  for (name, err) in &report.failed {
    print_error(&format!("{}: {}", name, err));
  }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}
