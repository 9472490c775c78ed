//! Project initialization logic
//!
//! Scaffolds a new C++ project: `kiln.toml`, `src/main.cpp`, `include/` and
//! `build/`. Existing source files are left alone.

use std::path::{Path, PathBuf};

use crate::config::defaults;
use crate::error::InitError;
use crate::infra::filesystem;

/// Directories that should be created during init
pub const REQUIRED_DIRECTORIES: &[&str] = &["src", "include", defaults::DEFAULT_OUTPUT_DIR];

/// Starter program written to `src/main.cpp`
pub const MAIN_TEMPLATE: &str = r#"#include <iostream>

int main(int argc, char* argv[])
{
    std::cout << "Hello from " << argv[0] << "!" << std::endl;
    return 0;
}
"#;

/// Result of initialization
#[derive(Debug)]
pub struct InitResult {
    /// Derived project name
    pub project_name: String,
    /// Path to created manifest
    pub manifest_path: PathBuf,
    /// Whether `src/main.cpp` was written
    pub created_main: bool,
}

/// Generate the default manifest content
pub fn generate_manifest_content(project_name: &str) -> String {
    format!(
        r#"[project]
name = "{project_name}"
version = "0.1.0"
language = "c++"
standard = "c++17"

[build]
output_type = "executable"
output_name = "{project_name}"
sources = ["src/*.cpp", "src/**/*.cpp"]
include_dirs = ["include"]

[toolchain]
compiler = "auto"
c_flags = ["-Wall", "-Wextra"]
cxx_flags = ["-Wall", "-Wextra"]
linker_flags = []

[targets.debug]
c_flags = ["-g", "-O0"]
cxx_flags = ["-g", "-O0"]

[targets.release]
c_flags = ["-O2", "-DNDEBUG"]
cxx_flags = ["-O2", "-DNDEBUG"]
"#
    )
}

/// Derive project name from directory
pub fn derive_project_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or_else(|| "my-project".to_string(), ToString::to_string)
}

/// Initialize a project in `path`.
///
/// Fails if any kiln configuration file already exists there.
pub fn init_project(path: &Path) -> Result<InitResult, InitError> {
    if let Some(existing) = defaults::MANIFEST_FILES
        .iter()
        .chain(defaults::SCRIPT_FILES.iter())
        .map(|name| path.join(name))
        .find(|candidate| candidate.exists())
    {
        return Err(InitError::AlreadyInitialized { path: existing });
    }

    for dir in REQUIRED_DIRECTORIES {
        filesystem::create_dir_all(&path.join(dir))?;
    }

    let project_name = derive_project_name(path);
    let manifest_path = path.join(defaults::MANIFEST_FILES[0]);
    filesystem::write_file(&manifest_path, &generate_manifest_content(&project_name))?;

    let created_main = filesystem::write_file_if_absent(&path.join("src/main.cpp"), MAIN_TEMPLATE)?;

    tracing::info!("Initialized project {project_name}");
    Ok(InitResult {
        project_name,
        manifest_path,
        created_main,
    })
}
