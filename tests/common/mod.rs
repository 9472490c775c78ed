//! Common test utilities and helpers
//!
//! This module provides shared utilities for integration tests: a temporary
//! project directory and a fake compiler that behaves enough like gcc for
//! the build pipeline.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

/// File name of the fake compiler inside a test project
pub const FAKE_COMPILER: &str = "fakecc";

/// Log of every fake compiler invocation, one line per call
pub const INVOCATION_LOG: &str = "invocations.log";

/// Shell script standing in for a compiler.
///
/// Answers `--version` without logging. Otherwise writes a placeholder file
/// for `-o`, logs its arguments, fails when the
/// `-c` source contains `FAKE_ERROR` and warns when it contains
/// `FAKE_WARNING`.
const FAKE_COMPILER_SCRIPT: &str = r#"#!/bin/sh
if [ "$1" = "--version" ]; then
    echo "fakecc 1.0"
    exit 0
fi
echo "$*" >> "$(dirname "$0")/invocations.log"
out=""
src=""
while [ $# -gt 0 ]; do
    case "$1" in
        -o) shift; out="$1" ;;
        -c) shift; src="$1" ;;
    esac
    [ $# -gt 0 ] && shift
done
if [ -n "$src" ] && grep -q FAKE_ERROR "$src"; then
    echo "$src:1:1: error: forced failure" >&2
    exit 1
fi
if [ -n "$src" ] && grep -q FAKE_WARNING "$src"; then
    echo "$src:2:3: warning: forced warning" >&2
fi
if [ -n "$out" ]; then
    echo "output of $src" > "$out"
fi
exit 0
"#;

/// Test project context
///
/// Creates a temporary directory for test projects and provides
/// utilities for setting up test scenarios.
pub struct TestProject {
    /// Temporary directory for the test project
    pub dir: TempDir,
}

impl TestProject {
    /// Create a new test project in a temporary directory
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Create a test project whose directory name starts with `prefix`
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            dir: tempfile::Builder::new()
                .prefix(prefix)
                .tempdir()
                .expect("Failed to create temp directory"),
        }
    }

    /// Get the path to the test project directory
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Create a file in the test project
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }

    /// Create a directory in the test project
    pub fn create_dir(&self, name: &str) {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(path).expect("Failed to create directory");
    }

    /// Check if a file exists in the test project
    pub fn file_exists(&self, name: &str) -> bool {
        self.dir.path().join(name).exists()
    }

    /// Read a file from the test project
    pub fn read_file(&self, name: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(name)).expect("Failed to read file")
    }

    /// Push a file's modification time into the future so it is newer than
    /// anything built from it
    pub fn touch(&self, name: &str) {
        let file = std::fs::File::options()
            .write(true)
            .open(self.dir.path().join(name))
            .expect("Failed to open file");
        file.set_modified(SystemTime::now() + Duration::from_secs(10))
            .expect("Failed to set mtime");
    }

    /// Install the fake compiler and return its path
    #[cfg(unix)]
    pub fn install_fake_compiler(&self) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.dir.path().join(FAKE_COMPILER);
        std::fs::write(&path, FAKE_COMPILER_SCRIPT).expect("Failed to write fake compiler");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("Failed to make fake compiler executable");
        path
    }

    /// Compile commands the fake compiler has seen
    pub fn compile_invocations(&self) -> Vec<String> {
        self.invocations()
            .into_iter()
            .filter(|line| line.starts_with("-c "))
            .collect()
    }

    /// Every command line the fake compiler has seen
    pub fn invocations(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join(INVOCATION_LOG))
            .unwrap_or_default()
            .lines()
            .map(ToString::to_string)
            .collect()
    }

    /// Forget previous invocations
    pub fn clear_invocations(&self) {
        let _ = std::fs::remove_file(self.dir.path().join(INVOCATION_LOG));
    }

    /// Write a `kiln.toml` using `compiler` for a C project
    pub fn write_c_manifest(&self, compiler: &Path, output_type: &str, extra: &str) {
        self.create_file(
            "kiln.toml",
            &format!(
                r#"[project]
name = "demo"
language = "c"

[build]
output_type = "{output_type}"
sources = ["src/**/*.c", "src/*.c"]
include_dirs = ["include"]
{extra}
[toolchain]
compiler = "{}"
c_flags = ["-Wall"]

[targets.release]
c_flags = ["-O2"]
"#,
                compiler.display()
            ),
        );
    }

    /// Lay out a small C project: two sources sharing a header
    pub fn write_c_sources(&self) {
        self.create_file(
            "include/util.h",
            "#ifndef UTIL_H\n#define UTIL_H\nint add(int a, int b);\n#endif\n",
        );
        self.create_file(
            "src/main.c",
            "#include <stdio.h>\n#include \"util.h\"\nint main(void) { printf(\"%d\\n\", add(1, 2)); return 0; }\n",
        );
        self.create_file(
            "src/util.c",
            "#include \"util.h\"\nint add(int a, int b) { return a + b; }\n",
        );
    }

    /// Run the kiln binary in the project directory
    pub fn run_kiln(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_kiln"))
            .current_dir(self.path())
            .args(args)
            .env_remove("RUST_LOG")
            .env_remove("KILN_CONFIG")
            .output()
            .expect("Failed to execute kiln")
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}
