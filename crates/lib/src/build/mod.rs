//! Building results.
//!
//! Results are built one at a time, in dependency order, each in its own
//! sandbox. A result's artifact is stored under its build-id, so a result
//! whose build-id already has an artifact is not built again.
//!
//! # Submodules
//!
//! - [`execute`] - planning and running a build
//! - [`sandbox`] - sandbox layout and the host sandbox

pub mod execute;
pub mod sandbox;
mod types;

pub use execute::{BuildPlan, artifact_location, build_results, execute, plan};
pub use sandbox::{HostSandbox, Sandbox, SandboxLayout};
pub use types::*;
