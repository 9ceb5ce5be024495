//! Host platform details and on-disk locations.

pub mod arch;
pub mod paths;

pub use arch::ChrootArch;
