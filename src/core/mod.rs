//! Core build logic
//!
//! # Submodules
//!
//! - [`graph`] - Artifact dependency graph
//! - [`cache`] - Persistent build cache and staleness checks
//! - [`executor`] - Parallel command execution with dependency gating
//! - [`scanner`] - Source discovery and `#include` scanning
//! - [`diagnostics`] - Compiler output parsing
//! - [`manifest`] - `kiln.toml` parsing and validation
//! - [`script`] - `kiln.script` parsing
//! - [`builder`] - Build orchestration logic
//! - [`init`] - Project initialization logic

pub mod builder;
pub mod cache;
pub mod diagnostics;
pub mod executor;
pub mod graph;
pub mod init;
pub mod manifest;
pub mod scanner;
pub mod script;
