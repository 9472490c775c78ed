//! CLI implementation for `kiln init` command

use std::path::Path;

use anyhow::{Context, Result};

use crate::cli::output::{print_detail, print_success};
use crate::core::init::{init_project, REQUIRED_DIRECTORIES};

/// Execute the init command
pub fn execute(path: &Path) -> Result<()> {
    let result = init_project(path).with_context(|| "Failed to initialize project")?;

    print_success(&format!(
        "Initialized kiln project '{}' in {}",
        result.project_name,
        path.display()
    ));
    print_detail("Created kiln.toml");
    if result.created_main {
        print_detail("Created src/main.cpp");
    }
    print_detail(&format!(
        "Created directories: {}",
        REQUIRED_DIRECTORIES
            .iter()
            .map(|d| format!("{d}/"))
            .collect::<Vec<_>>()
            .join(", ")
    ));
    Ok(())
}
