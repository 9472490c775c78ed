//! Error types for kiln
//!
//! Domain-specific error types using thiserror. Lower layers (graph, cache,
//! executor) return these typed reasons; only the build orchestrator decides
//! whether a failure is fatal to the whole build.

use std::path::PathBuf;
use thiserror::Error;

use crate::infra::toolchain::ToolchainError;

/// Dependency graph errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A node with the same id is already present
    #[error("Node already exists: {id}")]
    Duplicate { id: String },

    /// Referenced node is not part of the graph
    #[error("Node not found: {id}")]
    NodeNotFound { id: String },

    /// Inserting the edge would close a cycle
    #[error("Adding dependency from {from} to {to} would create a cycle")]
    WouldCreateCycle { from: String, to: String },

    /// The graph contains a cycle
    #[error("Graph has cycles, cannot compute build order")]
    CycleDetected,
}

/// Build cache errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// Cache file exists but cannot be read
    #[error("Failed to read cache file '{path}': {error}")]
    Read { path: PathBuf, error: String },

    /// Cache file is not valid JSON
    #[error("Failed to parse cache file '{path}': {error}")]
    Parse { path: PathBuf, error: String },

    /// Cache could not be written back
    #[error("Failed to write cache file '{path}': {error}")]
    Write { path: PathBuf, error: String },

    /// Artifact could not be stat'ed or hashed
    #[error("Failed to fingerprint '{path}': {error}")]
    Fingerprint { path: PathBuf, error: String },
}

/// Failure of a single task, as recorded in its outcome
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The command could not be started
    #[error("Failed to spawn '{command}': {error}")]
    Spawn { command: String, error: String },

    /// The command ran and exited unsuccessfully
    #[error("Command exited with {status}: {stderr}")]
    ExitStatus { status: String, stderr: String },

    /// A dependency of the task failed, so it never ran
    #[error("Dependency '{dependency}' failed")]
    DependencyFailed { dependency: String },

    /// The executor shut down while dependencies were still missing
    #[error("Dependencies never resolved: {}", missing.join(", "))]
    UnresolvedDependencies { missing: Vec<String> },

    /// The executor was cancelled before the task finished
    #[error("Task cancelled")]
    Cancelled,

    /// The executor dropped the task without signalling it
    #[error("Task abandoned by executor")]
    Abandoned,
}

/// Task executor errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// Submit called before start
    #[error("Executor has not been started")]
    NotStarted,

    /// Submit called after shutdown
    #[error("Executor is shut down and no longer accepts tasks")]
    ShutDown,

    /// Two tasks share an id
    #[error("Task '{id}' was already submitted")]
    DuplicateTask { id: String },
}

/// Source discovery errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// No file matched the configured patterns
    #[error("No source files found. Check your sources configuration")]
    NoSources,

    /// A pattern could not be compiled
    #[error("Invalid pattern '{pattern}': {error}")]
    InvalidPattern { pattern: String, error: String },

    /// Walking the directory tree failed
    #[error("Failed to walk '{path}': {error}")]
    Walk { path: PathBuf, error: String },

    /// A source or header could not be read during scanning
    #[error("Failed to scan '{path}': {error}")]
    Scan { path: PathBuf, error: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No configuration file could be located
    #[error("No configuration file found in '{dir}'. Run 'kiln init' to create a project.")]
    NotFound { dir: PathBuf },

    /// Missing required field
    #[error("{field} is required")]
    MissingField { field: String },

    /// Output type outside the supported set
    #[error("Invalid output type: {value} (must be executable, static_lib, or shared_lib)")]
    InvalidOutputType { value: String },

    /// Named build target does not exist
    #[error("Target not found: {name}")]
    UnknownTarget { name: String },

    /// TOML parse failure
    #[error("Failed to parse '{path}': {error}")]
    Parse { path: PathBuf, error: String },

    /// Script parse failure
    #[error("Line {line}: {message}")]
    Script { line: usize, message: String },

    /// IO error while reading the configuration
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },
}

/// Filesystem errors
#[derive(Error, Debug)]
pub enum FilesystemError {
    /// Failed to create directory
    #[error("Failed to create directory '{path}': {error}")]
    CreateDir { path: PathBuf, error: String },

    /// Failed to remove directory
    #[error("Failed to remove directory '{path}': {error}")]
    RemoveDir { path: PathBuf, error: String },

    /// Failed to write file
    #[error("Failed to write file '{path}': {error}")]
    WriteFile { path: PathBuf, error: String },
}

/// Project initialization errors
#[derive(Error, Debug)]
pub enum InitError {
    /// A configuration file is already present
    #[error("Project already initialized: {path} exists")]
    AlreadyInitialized { path: PathBuf },

    /// Failed to create the project layout
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
}

/// Build orchestration errors
#[derive(Error, Debug)]
pub enum BuildError {
    /// A pre-build command failed
    #[error("Pre-build command failed: {0}")]
    PreBuild(TaskError),

    /// A post-build command failed
    #[error("Post-build command failed: {0}")]
    PostBuild(TaskError),

    /// One or more translation units failed to compile
    #[error("Compilation failed with {} errors:\n{}", failures.len(), failures.join("\n"))]
    Compilation { failures: Vec<String> },

    /// The link step failed
    #[error("Linking failed: {0}")]
    Link(TaskError),

    /// The archiver failed
    #[error("Archiving failed: {0}")]
    Archive(ToolchainError),

    /// Cleaning would delete the project itself
    #[error("Refusing to remove '{path}': it contains the project directory")]
    UnsafeClean { path: PathBuf },
}

/// Top-level kiln error type
#[derive(Error, Debug)]
pub enum KilnError {
    /// Configuration error
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Graph error
    #[error("Dependency graph error: {0}")]
    Graph(#[from] GraphError),

    /// Cache error
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Executor error
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    /// Discovery error
    #[error("{0}")]
    Discovery(#[from] DiscoveryError),

    /// Filesystem error
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] FilesystemError),

    /// Toolchain error
    #[error("Toolchain error: {0}")]
    Toolchain(#[from] ToolchainError),

    /// Init error
    #[error("{0}")]
    Init(#[from] InitError),

    /// Build error
    #[error("{0}")]
    Build(#[from] BuildError),
}
