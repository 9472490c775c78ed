//! Infrastructure layer
//!
//! Filesystem helpers, host platform details and compiler toolchains.

pub mod filesystem;
pub mod platform;
pub mod toolchain;
