//! Build orchestration logic
//!
//! Drives one build of a project through its phases:
//!
//! 1. pre-build commands, strictly in order
//! 2. source discovery
//! 3. include scanning into the dependency graph
//! 4. staleness check per object and compile task generation
//! 5. parallel compilation on the executor
//! 6. link, archive or shared-library step
//! 7. post-build commands (`${output}` expands to the artifact)
//! 8. cache persistence
//!
//! The first unrecoverable error ends the build. Compilation failures are
//! collected until every translation unit has been accounted for so they can
//! all be reported together.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::config::defaults;
use crate::core::cache::{Cache, Freshness};
use crate::core::diagnostics::{self, Severity};
use crate::core::executor::{Executor, ExecutorConfig, Task};
use crate::core::graph::{Graph, Node, NodeKind};
use crate::core::manifest::{Manifest, OutputType, SourceLanguage, TargetConfig};
use crate::core::scanner::{self, IncludeScanner};
use crate::error::{BuildError, GraphError, KilnError, TaskError};
use crate::infra::filesystem;
use crate::infra::toolchain::{Toolchain, ToolchainRegistry};

/// Directory under the target directory for objects of out-of-tree sources
const EXTERNAL_OBJECT_DIR: &str = "external";

/// Options for a build invocation
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Target name (selects `[targets.<name>]`)
    pub target: String,
    /// Output directory, relative to the project root unless absolute
    pub output_dir: PathBuf,
    /// Number of parallel compile jobs (defaults to the CPU count)
    pub jobs: Option<usize>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            target: defaults::DEFAULT_TARGET.to_string(),
            output_dir: PathBuf::from(defaults::DEFAULT_OUTPUT_DIR),
            jobs: None,
        }
    }
}

/// Build phase, reported to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    PreBuild,
    Discovery,
    Scan,
    Compile,
    Link,
    PostBuild,
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildPhase::PreBuild => write!(f, "Running pre-build commands"),
            BuildPhase::Discovery => write!(f, "Discovering sources"),
            BuildPhase::Scan => write!(f, "Scanning dependencies"),
            BuildPhase::Compile => write!(f, "Compiling"),
            BuildPhase::Link => write!(f, "Linking"),
            BuildPhase::PostBuild => write!(f, "Running post-build commands"),
        }
    }
}

/// Receives progress notifications during a build
pub trait BuildObserver: Send + Sync {
    /// A phase started
    fn phase(&self, _phase: BuildPhase) {}

    /// Compilation of `total` translation units is starting
    fn compile_started(&self, _total: usize) {}

    /// One translation unit finished
    fn compile_finished(&self, _source: &Path, _success: bool) {}
}

/// Observer that ignores everything
#[derive(Debug, Default)]
pub struct SilentObserver;

impl BuildObserver for SilentObserver {}

/// Outcome of a successful build
#[derive(Debug, Clone)]
pub struct BuildSummary {
    /// Produced artifact
    pub artifact: PathBuf,
    /// Kind of artifact
    pub output_type: OutputType,
    /// Translation units compiled in this build
    pub compiled: usize,
    /// Translation units that were up to date
    pub skipped: usize,
    /// Whether the final link/archive step ran
    pub linked: bool,
    /// Compiler warnings reported
    pub warnings: usize,
    /// Wall time of the build
    pub duration: Duration,
}

/// Result of a clean
#[derive(Debug, Default)]
pub struct CleanReport {
    /// Directories that were removed
    pub removed: Vec<PathBuf>,
}

/// A translation unit that has to be compiled
#[derive(Debug)]
struct CompileJob {
    source: PathBuf,
    object: PathBuf,
    dependencies: Vec<PathBuf>,
    command_hash: String,
}

/// Build orchestrator for one project
pub struct Builder {
    project_dir: PathBuf,
    manifest: Manifest,
    options: BuildOptions,
    toolchain: Option<Arc<dyn Toolchain>>,
    cache: Cache,
    graph: Graph,
    observer: Arc<dyn BuildObserver>,
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("project_dir", &self.project_dir)
            .field("options", &self.options)
            .field("toolchain", &self.toolchain)
            .finish_non_exhaustive()
    }
}

impl Builder {
    /// Create a builder for a validated manifest.
    ///
    /// Fails if the selected target does not exist or the cache file is
    /// unreadable. A missing cache file means everything is built.
    pub fn new(
        project_dir: impl Into<PathBuf>,
        manifest: Manifest,
        options: BuildOptions,
    ) -> Result<Self, KilnError> {
        let project_dir = scanner::normalize_path(&project_dir.into());
        manifest.target(&options.target)?;
        manifest.output_type()?;

        let cache_path = Cache::default_path(&project_dir);
        let cache = Cache::open(cache_path)?;

        Ok(Self {
            project_dir,
            manifest,
            options,
            toolchain: None,
            cache,
            graph: Graph::new(),
            observer: Arc::new(SilentObserver),
        })
    }

    /// Use a specific toolchain instead of resolving the configured one
    #[must_use]
    pub fn with_toolchain(mut self, toolchain: Arc<dyn Toolchain>) -> Self {
        self.toolchain = Some(toolchain);
        self
    }

    /// Report progress to `observer`
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn BuildObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Project root
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Loaded manifest
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Dependency graph of the last build
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Build cache
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Output directory holding every target's outputs
    pub fn output_dir(&self) -> PathBuf {
        if self.options.output_dir.is_absolute() {
            self.options.output_dir.clone()
        } else {
            self.project_dir.join(&self.options.output_dir)
        }
    }

    /// `<output_dir>/<target>`
    pub fn target_dir(&self) -> PathBuf {
        self.output_dir().join(&self.options.target)
    }

    /// Path of the final artifact
    pub fn artifact_path(&mut self) -> Result<PathBuf, KilnError> {
        let output_type = self.manifest.output_type()?;
        let toolchain = self.toolchain()?;
        let platform = toolchain.platform();
        let name = &self.manifest.build.output_name;

        let file_name = match output_type {
            OutputType::Executable => format!("{name}{}", platform.executable_extension()),
            OutputType::StaticLib => format!("lib{name}{}", platform.static_lib_extension()),
            OutputType::SharedLib => format!("lib{name}{}", platform.shared_lib_extension()),
        };
        Ok(self.target_dir().join(file_name))
    }

    /// Resolve the toolchain on first use
    fn toolchain(&mut self) -> Result<Arc<dyn Toolchain>, KilnError> {
        if let Some(toolchain) = &self.toolchain {
            return Ok(Arc::clone(toolchain));
        }
        let toolchain = ToolchainRegistry::detect().resolve(&self.manifest.toolchain.compiler)?;
        tracing::debug!(
            "Using {} ({})",
            toolchain.c_compiler().display(),
            toolchain.version()
        );
        self.toolchain = Some(Arc::clone(&toolchain));
        Ok(toolchain)
    }

    /// Object file for a source, mirroring its directory under the target
    /// directory.
    ///
    /// Sources outside the project land in `external/<dir hash>/` so equally
    /// named files from different directories stay apart.
    fn object_path(&self, source: &Path, target_dir: &Path, extension: &str) -> PathBuf {
        let relative = source
            .strip_prefix(&self.project_dir)
            .ok()
            .filter(|rel| {
                rel.components()
                    .all(|c| matches!(c, std::path::Component::Normal(_)))
            })
            .map_or_else(
                || {
                    let parent = source.parent().unwrap_or_else(|| Path::new(""));
                    let digest = Sha256::digest(parent.to_string_lossy().as_bytes());
                    Path::new(EXTERNAL_OBJECT_DIR)
                        .join(hex::encode(&digest[..6]))
                        .join(source.file_name().unwrap_or(source.as_os_str()))
                },
                Path::to_path_buf,
            );

        let file_name = relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dir = relative.parent().unwrap_or_else(|| Path::new(""));
        target_dir.join(dir).join(format!("{file_name}{extension}"))
    }

    /// Run a full build
    pub async fn build(&mut self) -> Result<BuildSummary, KilnError> {
        let started = Instant::now();
        tracing::info!(
            "Building {} [{}]",
            self.manifest.project.name,
            self.options.target
        );

        let toolchain = self.toolchain()?;
        let workers = self.options.jobs.unwrap_or_else(num_cpus::get);
        let mut executor = Executor::new(ExecutorConfig::with_workers(workers));
        executor.start();

        let result = self.run(&executor, toolchain.as_ref(), started).await;
        executor.shutdown().await;
        result
    }

    #[allow(clippy::too_many_lines)]
    async fn run(
        &mut self,
        executor: &Executor,
        toolchain: &dyn Toolchain,
        started: Instant,
    ) -> Result<BuildSummary, KilnError> {
        let output_type = self.manifest.output_type()?;
        let target = self.manifest.target(&self.options.target)?.cloned();
        let target_env = target.as_ref().map(|t| t.env.clone()).unwrap_or_default();
        let target_dir = self.target_dir();
        filesystem::create_dir_all(&target_dir)?;

        // Pre-build
        if !self.manifest.build.pre_build_cmds.is_empty() {
            self.observer.phase(BuildPhase::PreBuild);
            let commands = self.manifest.build.pre_build_cmds.clone();
            self.run_hooks(executor, "pre-build", &commands, None)
                .await?
                .map_err(BuildError::PreBuild)?;
        }

        // Discovery
        self.observer.phase(BuildPhase::Discovery);
        let sources = scanner::discover_sources(
            &self.project_dir,
            &self.manifest.build.sources,
            &self.manifest.build.exclude,
        )?;
        tracing::info!("Found {} source files", sources.len());

        // Dependency scan
        self.observer.phase(BuildPhase::Scan);
        self.graph = Graph::new();
        let include_paths = self.manifest.include_paths(&self.project_dir);
        let include_scanner = IncludeScanner::new(include_paths.clone())?;
        let mut units = Vec::with_capacity(sources.len());
        for source in sources {
            let source_id = add_node(&mut self.graph, Node::new(&source, NodeKind::Source))?;
            let headers = include_scanner.scan(&source)?;
            for header in &headers {
                let header_id = add_node(&mut self.graph, Node::new(header, NodeKind::Header))?;
                self.graph.add_dependency(&source_id, &header_id)?;
            }
            tracing::debug!("{}: {} headers", source.display(), headers.len());
            units.push((source, headers));
        }

        // Staleness and compile tasks
        let has_cxx = units
            .iter()
            .any(|(source, _)| SourceLanguage::of(source) == SourceLanguage::Cxx);
        let object_ext = toolchain.platform().object_extension();
        let target_args = toolchain.target_args(self.manifest.toolchain.target_triple.as_deref());

        let mut objects = Vec::with_capacity(units.len());
        let mut jobs = Vec::new();
        let mut skipped = 0;

        for (source, headers) in units {
            let language = SourceLanguage::of(&source);
            let compiler = match language {
                SourceLanguage::C => toolchain.c_compiler(),
                SourceLanguage::Cxx => toolchain.cxx_compiler(),
            }
            .to_string_lossy()
            .into_owned();

            let object = self.object_path(&source, &target_dir, object_ext);
            let object_id = add_node(&mut self.graph, Node::new(&object, NodeKind::Object))?;
            self.graph
                .add_dependency(&object_id, &source.to_string_lossy())?;
            for header in &headers {
                self.graph
                    .add_dependency(&object_id, &header.to_string_lossy())?;
            }

            let mut flags = target_args.clone();
            flags.extend(
                self.manifest
                    .compile_flags(language, &include_paths, target.as_ref()),
            );
            let command_hash = Cache::calculate_command_hash(&compiler, &flags);
            if let Some(node) = self.graph.node_mut(&object_id) {
                node.command_hash = Some(command_hash.clone());
            }

            let dependencies: Vec<PathBuf> = std::iter::once(source.clone())
                .chain(headers)
                .collect();

            match self
                .cache
                .needs_rebuild(&object, &dependencies, &command_hash)
            {
                Freshness::UpToDate => {
                    tracing::debug!("{} is up to date", source.display());
                    skipped += 1;
                }
                Freshness::Stale(reason) => {
                    tracing::debug!("{} needs rebuild: {reason}", source.display());
                    filesystem::ensure_parent_dir(&object)?;

                    let mut args = vec![
                        "-c".to_string(),
                        source.to_string_lossy().into_owned(),
                        "-o".to_string(),
                        object.to_string_lossy().into_owned(),
                    ];
                    args.extend(flags);

                    let task = Task::new(object_id, compiler)
                        .args(args)
                        .working_dir(&self.project_dir)
                        .envs(target_env.clone());
                    jobs.push((
                        CompileJob {
                            source,
                            object: object.clone(),
                            dependencies,
                            command_hash,
                        },
                        task,
                    ));
                }
            }
            objects.push(object);
        }

        // Compilation
        let (compiled, warnings) = self.compile(executor, jobs).await?;
        if compiled == 0 {
            tracing::info!("All {skipped} translation units are up to date");
        }

        // Final artifact
        self.observer.phase(BuildPhase::Link);
        let artifact = self.artifact_path()?;
        let artifact_kind = match output_type {
            OutputType::Executable => NodeKind::Executable,
            OutputType::StaticLib | OutputType::SharedLib => NodeKind::Library,
        };
        let artifact_id = add_node(&mut self.graph, Node::new(&artifact, artifact_kind))?;
        for object in &objects {
            self.graph
                .add_dependency(&artifact_id, &object.to_string_lossy())?;
        }
        self.graph.mark_entry_point(&artifact_id)?;

        let linked = self
            .produce_artifact(
                executor,
                toolchain,
                output_type,
                &artifact,
                &objects,
                has_cxx,
                &target_args,
                target.as_ref(),
            )
            .await?;

        // Post-build
        if !self.manifest.build.post_build_cmds.is_empty() {
            self.observer.phase(BuildPhase::PostBuild);
            let commands = self.manifest.build.post_build_cmds.clone();
            self.run_hooks(executor, "post-build", &commands, Some(&artifact))
                .await?
                .map_err(BuildError::PostBuild)?;
        }

        // Persist
        if let Err(e) = self.cache.save() {
            tracing::warn!("Failed to save build cache: {e}");
        }

        let summary = BuildSummary {
            artifact,
            output_type,
            compiled,
            skipped,
            linked,
            warnings,
            duration: started.elapsed(),
        };
        tracing::info!(
            "Built {} ({} compiled, {} up to date) in {:.2?}",
            summary.artifact.display(),
            summary.compiled,
            summary.skipped,
            summary.duration
        );
        Ok(summary)
    }

    /// Submit every compile job, then wait for each. Returns the number of
    /// units compiled and warnings seen; fails listing every failed unit.
    async fn compile(
        &mut self,
        executor: &Executor,
        jobs: Vec<(CompileJob, Task)>,
    ) -> Result<(usize, usize), KilnError> {
        if jobs.is_empty() {
            return Ok((0, 0));
        }

        self.observer.phase(BuildPhase::Compile);
        self.observer.compile_started(jobs.len());
        tracing::info!("Compiling {} translation units", jobs.len());

        let mut pending = Vec::with_capacity(jobs.len());
        for (job, task) in jobs {
            let handle = executor.submit(task).await?;
            pending.push((job, handle));
        }

        let mut compiled = 0;
        let mut warnings = 0;
        let mut failures = Vec::new();

        for (job, handle) in pending {
            let result = handle.wait().await;
            let duration = result.duration();
            self.observer.compile_finished(&job.source, result.success());

            let parsed = diagnostics::parse(&result.stderr);
            diagnostics::report(&parsed);
            warnings += parsed
                .iter()
                .filter(|d| d.severity == Severity::Warning)
                .count();

            match result.outcome {
                Ok(()) => {
                    compiled += 1;
                    if let Err(e) = self.cache.update_entry(
                        &job.object,
                        &job.dependencies,
                        &job.command_hash,
                        &job.object,
                        duration,
                    ) {
                        tracing::warn!("Failed to record {} in cache: {e}", job.object.display());
                    }
                }
                Err(error) => {
                    let reason = parsed
                        .iter()
                        .find(|d| d.severity == Severity::Error)
                        .map_or_else(|| error.to_string(), ToString::to_string);
                    failures.push(format!(
                        "Compilation of {} failed: {reason}",
                        job.source.display()
                    ));
                }
            }
        }

        if !failures.is_empty() {
            return Err(BuildError::Compilation { failures }.into());
        }
        Ok((compiled, warnings))
    }

    /// Link, archive or build the shared library unless the artifact is
    /// already up to date. Returns whether anything ran.
    #[allow(clippy::too_many_arguments)]
    async fn produce_artifact(
        &mut self,
        executor: &Executor,
        toolchain: &dyn Toolchain,
        output_type: OutputType,
        artifact: &Path,
        objects: &[PathBuf],
        has_cxx: bool,
        target_args: &[String],
        target: Option<&TargetConfig>,
    ) -> Result<bool, KilnError> {
        let object_args: Vec<String> = objects
            .iter()
            .map(|o| o.to_string_lossy().into_owned())
            .collect();

        let (command, args) = match output_type {
            OutputType::StaticLib => {
                let mut args = self.manifest.toolchain.archiver_flags.clone();
                args.extend(object_args);
                ("ar".to_string(), args)
            }
            OutputType::Executable | OutputType::SharedLib => {
                let linker = if has_cxx {
                    toolchain.cxx_compiler()
                } else {
                    toolchain.c_compiler()
                };
                let mut args = object_args;
                args.push("-o".to_string());
                args.push(artifact.to_string_lossy().into_owned());
                if output_type == OutputType::SharedLib {
                    args.push("-shared".to_string());
                    args.extend(
                        toolchain
                            .platform()
                            .shared_lib_flags()
                            .iter()
                            .map(ToString::to_string),
                    );
                }
                args.extend(target_args.iter().cloned());
                args.extend(self.manifest.link_flags(target));
                if has_cxx {
                    args.push("-lstdc++".to_string());
                }
                (linker.to_string_lossy().into_owned(), args)
            }
        };

        let command_hash = Cache::calculate_command_hash(&command, &args);
        if let Freshness::Stale(reason) = self.cache.needs_rebuild(artifact, objects, &command_hash) {
            tracing::debug!("{} needs rebuild: {reason}", artifact.display());
        } else {
            tracing::info!("{} is up to date", artifact.display());
            return Ok(false);
        }

        let started = Instant::now();
        match output_type {
            OutputType::StaticLib => {
                tracing::info!("Creating static library {}", artifact.display());
                // `ar rcs` keeps members of objects that no longer exist
                if let Err(e) = std::fs::remove_file(artifact) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!("Failed to remove old {}: {e}", artifact.display());
                    }
                }
                toolchain
                    .archive(objects, artifact, &self.manifest.toolchain.archiver_flags)
                    .map_err(BuildError::Archive)?;
            }
            OutputType::Executable | OutputType::SharedLib => {
                tracing::info!("Linking {}", artifact.display());
                let env = target.map(|t| t.env.clone()).unwrap_or_default();
                let task = Task::new("link", command)
                    .args(args)
                    .working_dir(&self.project_dir)
                    .envs(env);
                let result = executor.submit(task).await?.wait().await;
                if let Err(error) = result.outcome {
                    diagnostics::report(&diagnostics::parse(&result.stderr));
                    return Err(BuildError::Link(error).into());
                }
            }
        }

        if let Err(e) =
            self.cache
                .update_entry(artifact, objects, &command_hash, artifact, started.elapsed())
        {
            tracing::warn!("Failed to record {} in cache: {e}", artifact.display());
        }
        Ok(true)
    }

    /// Run hook commands one after another. The outer result carries
    /// executor errors, the inner one the first failing command.
    async fn run_hooks(
        &self,
        executor: &Executor,
        label: &str,
        commands: &[String],
        artifact: Option<&Path>,
    ) -> Result<Result<(), TaskError>, KilnError> {
        for (index, command) in commands.iter().enumerate() {
            let mut argv = hook_argv(command, artifact).into_iter();
            let Some(program) = argv.next() else {
                continue;
            };

            tracing::info!("Running {label} command: {command}");
            let task = Task::new(format!("{label}-{index}"), program)
                .args(argv)
                .working_dir(&self.project_dir);
            let result = executor.submit(task).await?.wait().await;

            for line in result.stdout.lines() {
                tracing::info!("{line}");
            }
            if let Err(error) = result.outcome {
                return Ok(Err(error));
            }
        }
        Ok(Ok(()))
    }

    /// Remove the selected target's outputs and the cache.
    ///
    /// Failing to remove the target directory is an error; problems with the
    /// cache directory or re-saving the emptied cache are only warned about.
    pub fn clean(&mut self) -> Result<CleanReport, KilnError> {
        let target_dir = self.target_dir();
        self.clean_dir(target_dir)
    }

    /// Remove the whole output directory (every target) and the cache
    pub fn clean_all(&mut self) -> Result<CleanReport, KilnError> {
        let output_dir = self.output_dir();
        self.clean_dir(output_dir)
    }

    fn clean_dir(&mut self, dir: PathBuf) -> Result<CleanReport, KilnError> {
        if self.project_dir.starts_with(scanner::normalize_path(&dir)) {
            return Err(BuildError::UnsafeClean { path: dir }.into());
        }

        let mut report = CleanReport::default();
        if filesystem::remove_dir_all(&dir)? {
            report.removed.push(dir);
        }

        let state_dir = self.project_dir.join(defaults::STATE_DIR);
        match filesystem::remove_dir_all(&state_dir) {
            Ok(true) => report.removed.push(state_dir),
            Ok(false) => {}
            Err(e) => tracing::warn!("Failed to remove cache directory: {e}"),
        }

        self.cache.clear();
        if let Err(e) = self.cache.save() {
            tracing::warn!("Failed to save empty cache: {e}");
        }
        Ok(report)
    }
}

/// Split a hook command on whitespace, then expand `${output}` in each
/// argument so an artifact path with spaces stays one argument
fn hook_argv(command: &str, artifact: Option<&Path>) -> Vec<String> {
    let output = artifact.map(|path| path.to_string_lossy());
    command
        .split_whitespace()
        .map(|part| match &output {
            Some(output) => part.replace(defaults::OUTPUT_PLACEHOLDER, output),
            None => part.to_string(),
        })
        .collect()
}

/// Add a node, treating an existing node with the same id as success
fn add_node(graph: &mut Graph, node: Node) -> Result<String, GraphError> {
    let id = node.id.clone();
    match graph.add_node(node) {
        Ok(()) | Err(GraphError::Duplicate { .. }) => Ok(id),
        Err(e) => Err(e),
    }
}
