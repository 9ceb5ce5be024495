//! Shared utilities.
//!
//! Hashing, name sets and test helpers used across the crate.

pub mod hash;
pub mod strings;

#[cfg(test)]
pub mod testutil;
