//! Sources: where build inputs come from.
//!
//! # Submodules
//!
//! - [`registry`] - backend registration and operation dispatch
//! - [`types`] - source sets, operation names, errors
//! - [`git`], [`svn`], [`cvs`], [`files`] - the built-in source types
//! - `sourceid` - identity parts shared by every source type
//! - `vcs` - helpers shared by the version control types

pub mod cvs;
pub mod files;
pub mod git;
pub mod registry;
mod sourceid;
pub mod svn;
mod types;
mod vcs;

pub use registry::{BatchReport, Registry, SourceBackend, SourceCtx};
pub use types::*;
