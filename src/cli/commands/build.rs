//! Build command implementation
//!
//! Implements `kiln build`: loads the configuration, runs the build and
//! prints a summary.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::cli::output::{print_detail, print_success, ProgressReporter};
use crate::core::builder::{BuildOptions, BuildSummary, Builder};
use crate::core::manifest::Manifest;
use crate::error::{BuildError, KilnError};

/// Arguments of `kiln build`
#[derive(Debug, Clone)]
pub struct BuildArgs {
    /// Target name
    pub target: String,
    /// Output directory
    pub output: PathBuf,
    /// Number of parallel jobs
    pub jobs: Option<usize>,
}

/// Execute the build command
pub async fn execute(project_dir: &Path, config: Option<&Path>, args: BuildArgs) -> Result<()> {
    let summary = build(project_dir, config, args).await?;

    print_success(&format!("Built {}", summary.artifact.display()));
    print_detail(&format!(
        "{} compiled, {} up to date{}",
        summary.compiled,
        summary.skipped,
        if summary.warnings > 0 {
            format!(", {} warnings", summary.warnings)
        } else {
            String::new()
        }
    ));
    if !summary.linked {
        print_detail(&format!("{} was up to date", summary.output_type));
    }
    print_detail(&format!("Finished in {:.2?}", summary.duration));
    Ok(())
}

/// Load the configuration and run one build, used by `build` and `run`
pub(crate) async fn build(
    project_dir: &Path,
    config: Option<&Path>,
    args: BuildArgs,
) -> Result<BuildSummary> {
    let manifest = Manifest::discover(project_dir, config)
        .context("Failed to load project configuration")?;

    let options = BuildOptions {
        target: args.target,
        output_dir: args.output,
        jobs: args.jobs,
    };

    let reporter = Arc::new(ProgressReporter::new());
    let mut builder = Builder::new(project_dir, manifest, options)
        .context("Failed to prepare build")?
        .with_observer(reporter.clone());

    let result = builder.build().await;
    reporter.finish();

    result.map_err(|e| match e {
        KilnError::Build(BuildError::Compilation { failures }) => {
            let count = failures.len();
            anyhow::anyhow!(failures.join("\n")).context(format!(
                "Build failed: {count} translation unit{} failed to compile",
                if count == 1 { "" } else { "s" }
            ))
        }
        other => anyhow::Error::new(other).context("Build failed"),
    })
}
