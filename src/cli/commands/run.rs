//! CLI implementation for `kiln run` command
//!
//! Builds the project, then runs the executable with the remaining
//! arguments. The program's exit status becomes ours.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::cli::commands::build::{self, BuildArgs};
use crate::config::defaults;
use crate::core::manifest::OutputType;

/// Execute the run command
pub async fn execute(
    project_dir: &Path,
    config: Option<&Path>,
    target: &str,
    args: &[String],
) -> Result<()> {
    let summary = build::build(
        project_dir,
        config,
        BuildArgs {
            target: target.to_string(),
            output: PathBuf::from(defaults::DEFAULT_OUTPUT_DIR),
            jobs: None,
        },
    )
    .await?;

    if summary.output_type != OutputType::Executable {
        bail!(
            "Cannot run a {} (only executables can be run)",
            summary.output_type
        );
    }

    tracing::info!("Running {}", summary.artifact.display());
    let status = tokio::process::Command::new(&summary.artifact)
        .args(args)
        .current_dir(project_dir)
        .status()
        .await
        .with_context(|| format!("Failed to run {}", summary.artifact.display()))?;

    if !status.success() {
        std::process::exit(status.code().unwrap_or(1));
    }
    Ok(())
}
