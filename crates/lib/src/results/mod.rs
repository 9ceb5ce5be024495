//! Results: the dependency graph and build identities.
//!
//! # Submodules
//!
//! - [`graph`] - dependency graph, cycle detection, build order
//! - [`buildid`] - memoized build-id computation

pub mod buildid;
pub mod graph;

pub use buildid::{BuildIdError, BuildIds};
pub use graph::{DependencyGraph, GraphError};
