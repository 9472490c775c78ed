//! CLI implementation for `kiln compiler` command
//!
//! Lists the toolchains found on this machine.

use anyhow::{bail, Result};

use crate::infra::toolchain::ToolchainRegistry;

/// Execute the compiler command
pub fn execute() -> Result<()> {
    let registry = ToolchainRegistry::detect();
    let toolchains = registry.list();
    if toolchains.is_empty() {
        bail!("No compilers found. Install gcc or clang.");
    }

    let default_name = registry
        .default_toolchain()
        .map(|t| t.name().to_string());

    println!("Available compilers:");
    println!();
    for (i, toolchain) in toolchains.iter().enumerate() {
        let platform = toolchain.platform();
        let marker = if default_name.as_deref() == Some(toolchain.name()) {
            " (default)"
        } else {
            ""
        };
        println!("{}. {}{marker}", i + 1, toolchain.name());
        println!("   Version: {}", toolchain.version());
        println!("   C compiler: {}", toolchain.c_compiler().display());
        println!("   C++ compiler: {}", toolchain.cxx_compiler().display());
        println!("   Object extension: {}", platform.object_extension());
        println!(
            "   Executable extension: {}",
            display_extension(platform.executable_extension())
        );
        println!(
            "   Static library extension: {}",
            platform.static_lib_extension()
        );
        println!(
            "   Shared library extension: {}",
            platform.shared_lib_extension()
        );
        println!();
    }
    Ok(())
}

fn display_extension(ext: &str) -> &str {
    if ext.is_empty() {
        "(none)"
    } else {
        ext
    }
}
