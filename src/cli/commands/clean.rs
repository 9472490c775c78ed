//! CLI implementation for `kiln clean` command

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::cli::output::{print_detail, print_success};
use crate::core::builder::{BuildOptions, Builder};
use crate::core::manifest::Manifest;

/// Execute the clean command. Without a target the whole output directory
/// is removed.
pub fn execute(
    project_dir: &Path,
    config: Option<&Path>,
    target: Option<&str>,
    output: PathBuf,
) -> Result<()> {
    let manifest = Manifest::discover(project_dir, config)
        .context("Failed to load project configuration")?;

    let mut options = BuildOptions {
        output_dir: output,
        ..BuildOptions::default()
    };
    if let Some(target) = target {
        options.target = target.to_string();
    }
    let mut builder = Builder::new(project_dir, manifest, options)?;
    let report = match target {
        Some(_) => builder.clean(),
        None => builder.clean_all(),
    }
    .with_context(|| "Failed to clean build artifacts")?;

    if report.removed.is_empty() {
        print_success("Nothing to clean");
    } else {
        print_success("Cleaned build artifacts:");
        for dir in &report.removed {
            let shown = dir.strip_prefix(project_dir).unwrap_or(dir);
            print_detail(&format!("Removed {}/", shown.display()));
        }
    }
    Ok(())
}
