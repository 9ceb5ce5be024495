//! Project model and configuration loading.
//!
//! # Submodules
//!
//! - [`types`] - project, licence, source and result records
//! - [`loader`] - evaluating the Lua configuration tree
//! - `identity` - the project identity digest

mod identity;
pub mod loader;
mod types;

pub use loader::load_project;
pub use types::*;
