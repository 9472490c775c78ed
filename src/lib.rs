//! Kiln - incremental build orchestrator for C and C++ projects
//!
//! Discovers sources, tracks header dependencies, decides what is stale from
//! a persistent cache and compiles the rest in parallel before linking.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Build logic: graph, cache, executor, scanning, orchestration
//! - [`infra`] - Infrastructure layer (filesystem, platform, toolchains)
//! - [`config`] - Configuration and constants
//! - [`error`] - Error types and handling

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;

#[cfg(test)]
pub mod test_utils;
