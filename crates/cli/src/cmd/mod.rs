mod build;
mod dlist;
mod dsort;
mod fetch_sources;
mod ls_project;
mod new_source;

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use e2factory_lib::cache::{Cache, WritebackDirective};
use e2factory_lib::platform::paths::find_project_root;
use e2factory_lib::project::{Project, load_project};
use e2factory_lib::source::{Registry, SourceCtx};
use e2factory_lib::tool::Tools;
use tracing::debug;

pub use build::{BuildFlags, cmd_build};
pub use dlist::cmd_dlist;
pub use dsort::cmd_dsort;
pub use fetch_sources::cmd_fetch_sources;
pub use ls_project::cmd_ls_project;
pub use new_source::cmd_new_source;

/// Options shared by every command.
pub struct GlobalArgs {
  pub project: Option<PathBuf>,
  pub writeback: Vec<WritebackDirective>,
}

/// A loaded project with its cache and source registry.
pub struct Session {
  pub project: Project,
  pub cache: Cache,
  pub registry: Registry,
}

impl Session {
  pub fn open(global: &GlobalArgs) -> Result<Self> {
    let root = match &global.project {
      Some(dir) => dunce::canonicalize(dir).with_context(|| format!("Project directory '{}'", dir.display()))?,
      None => {
        let cwd = std::env::current_dir().context("Failed to read current directory")?;
        find_project_root(&cwd).ok_or_else(|| anyhow!("Not inside a project: {}", cwd.display()))?
      }
    };
    debug!(root = %root.display(), "opening project");

    let project = load_project(&root)?;
    let mut cache = Cache::for_project(&project, Tools::from_env());
    cache.apply_writeback(&global.writeback)?;
    let registry = Registry::with_default_backends()?;

    Ok(Self {
      project,
      cache,
      registry,
    })
  }

  pub fn ctx(&self) -> SourceCtx<'_> {
    SourceCtx {
      project: &self.project,
      cache: &self.cache,
    }
  }
}
