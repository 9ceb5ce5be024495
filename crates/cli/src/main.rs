mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use e2factory_lib::build::BuildMode;
use e2factory_lib::cache::WritebackDirective;
use tracing_subscriber::EnvFilter;

use crate::cmd::{
  GlobalArgs, cmd_build, cmd_dlist, cmd_dsort, cmd_fetch_sources, cmd_ls_project, cmd_new_source,
};
use crate::output::print_error;

/// e2 - build orchestrator for e2factory projects
#[derive(Parser)]
#[command(name = "e2")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// More log output (-v info, -vv debug, -vvv trace)
  #[arg(short, long, global = true, action = ArgAction::Count)]
  verbose: u8,

  /// Only log errors
  #[arg(short, long, global = true, conflicts_with = "verbose")]
  quiet: bool,

  /// Project directory (default: search upwards from the current directory)
  #[arg(long, global = true)]
  project: Option<PathBuf>,

  /// Enable or disable writeback for a server, e.g. `results=off`
  #[arg(long = "writeback", value_name = "SERVER=on|off", global = true)]
  writeback: Vec<WritebackDirective>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build results and their dependencies
  Build {
    /// Results to build (default: the project's default results)
    results: Vec<String>,

    /// Which sources to build from
    #[arg(long, default_value = "tag")]
    mode: BuildMode,

    /// Build even if the result is up to date
    #[arg(long)]
    force_rebuild: bool,

    /// Keep the sandbox after a successful build
    #[arg(long)]
    keep_sandbox: bool,

    /// Prepare the sandbox of one result without building it
    #[arg(long)]
    playground: bool,

    /// Print build-ids instead of building
    #[arg(long)]
    buildid: bool,
  },

  /// List the dependencies of a result
  Dlist {
    result: String,

    /// Include indirect dependencies, in build order
    #[arg(short, long)]
    recursive: bool,
  },

  /// List all results in build order
  Dsort,

  /// Fetch, update or check sources
  FetchSources {
    /// Sources to process (default: all)
    sources: Vec<String>,

    /// Update existing working copies
    #[arg(long)]
    update: bool,

    /// Check working copies against the configuration instead of fetching
    #[arg(long, conflicts_with = "update")]
    check: bool,
  },

  /// Show the project configuration
  LsProject {
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },

  /// Publish a new file to a server together with its checksum
  NewSource {
    file: PathBuf,

    #[arg(long)]
    server: String,

    #[arg(long)]
    location: String,
  },
}

/// `E2_LOG`, then `RUST_LOG`, then the verbosity flags.
fn init_logging(verbose: u8, quiet: bool) {
  let default = match (quiet, verbose) {
    (true, _) => "error",
    (_, 0) => "warn",
    (_, 1) => "info",
    (_, 2) => "debug",
    _ => "trace",
  };
  let filter = std::env::var("E2_LOG")
    .ok()
    .and_then(|spec| EnvFilter::try_new(spec).ok())
    .or_else(|| EnvFilter::try_from_default_env().ok())
    .unwrap_or_else(|| EnvFilter::new(default));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn run(cli: Cli) -> Result<()> {
  let global = GlobalArgs {
    project: cli.project,
    writeback: cli.writeback,
  };

  match cli.command {
    Commands::Build {
      results,
      mode,
      force_rebuild,
      keep_sandbox,
      playground,
      buildid,
    } => cmd_build(
      &global,
      results,
      mode,
      cmd::BuildFlags {
        force_rebuild,
        keep_sandbox,
        playground,
        buildid,
      },
    ),
    Commands::Dlist { result, recursive } => cmd_dlist(&global, &result, recursive),
    Commands::Dsort => cmd_dsort(&global),
    Commands::FetchSources { sources, update, check } => cmd_fetch_sources(&global, &sources, update, check),
    Commands::LsProject { json } => cmd_ls_project(&global, json),
    Commands::NewSource {
      file,
      server,
      location,
    } => cmd_new_source(&global, &file, &server, &location),
  }
}

fn main() {
  let cli = Cli::parse();
  init_logging(cli.verbose, cli.quiet);

  if let Err(e) = run(cli) {
    print_error(&format!("{:#}", e));
    std::process::exit(1);
  }
}
