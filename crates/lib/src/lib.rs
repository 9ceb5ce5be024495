//! e2factory-lib: core of the e2 build orchestrator
//!
//! This crate provides everything the `e2` command works with:
//! - `project`: loading and validating a project's Lua configuration
//! - `results`: the dependency graph and build-ids
//! - `source`: the source backend registry (git, svn, cvs, files) and source-ids
//! - `cache`: servers, the local mirror and transports
//! - `build`: sandboxes and the build orchestrator

pub mod build;
pub mod cache;
pub mod consts;
pub mod platform;
pub mod project;
pub mod results;
pub mod source;
pub mod tool;
pub mod util;
pub mod validate;
