//! End-to-end tests of the library against projects on disk.

mod build_tests;
mod common;
mod project_tests;
mod source_tests;
