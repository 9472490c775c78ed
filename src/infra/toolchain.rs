//! Compiler toolchains
//!
//! A toolchain knows which binaries compile C and C++, how to pass a target
//! triple, and how to archive objects into a static library. GCC and Clang
//! share a command-line dialect, so one [`GnuToolchain`] covers both
//! families.
//!
//! Toolchains are looked up through an explicit [`ToolchainRegistry`] value
//! built by the caller (usually via [`ToolchainRegistry::detect`]).

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::infra::platform::Platform;

/// Errors related to toolchain resolution and invocation
#[derive(Error, Debug)]
pub enum ToolchainError {
    /// The requested compiler is not installed or not registered
    #[error("Compiler not found: {name}")]
    NotFound { name: String },

    /// Nothing usable was detected on the system
    #[error("No compilers found on the system. Install gcc or clang, or set toolchain.compiler")]
    NoCompilers,

    /// No archiver binary on PATH
    #[error("Archiver not found (tried {tried})")]
    ArchiverNotFound { tried: String },

    /// The archiver ran and failed
    #[error("'{command}' failed with {status}: {stderr}")]
    ArchiveFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// The archiver could not be started
    #[error("Failed to run '{command}': {error}")]
    Spawn { command: String, error: String },
}

/// Compiler family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolchainFamily {
    /// GNU Compiler Collection
    Gcc,
    /// LLVM Clang
    Clang,
}

impl ToolchainFamily {
    /// Binary name of the C front end
    pub fn c_binary(self) -> &'static str {
        match self {
            ToolchainFamily::Gcc => "gcc",
            ToolchainFamily::Clang => "clang",
        }
    }

    /// Binary name of the C++ front end
    pub fn cxx_binary(self) -> &'static str {
        match self {
            ToolchainFamily::Gcc => "g++",
            ToolchainFamily::Clang => "clang++",
        }
    }

    /// Guess the family from a compiler binary path
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.contains("clang") {
            ToolchainFamily::Clang
        } else {
            ToolchainFamily::Gcc
        }
    }
}

impl fmt::Display for ToolchainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.c_binary())
    }
}

/// A compiler toolchain
pub trait Toolchain: fmt::Debug + Send + Sync {
    /// Registry name (`gcc`, `clang`, or the configured path)
    fn name(&self) -> &str;

    /// First line of `--version`
    fn version(&self) -> &str;

    /// Compiler family
    fn family(&self) -> ToolchainFamily;

    /// C front end
    fn c_compiler(&self) -> &Path;

    /// C++ front end
    fn cxx_compiler(&self) -> &Path;

    /// Host platform the toolchain produces artifacts for
    fn platform(&self) -> &Platform;

    /// Arguments that select a target triple, if the family supports it
    fn target_args(&self, target_triple: Option<&str>) -> Vec<String>;

    /// Archive objects into a static library. Runs to completion before
    /// returning.
    fn archive(
        &self,
        objects: &[PathBuf],
        output: &Path,
        flags: &[String],
    ) -> Result<(), ToolchainError>;

    /// Whether the toolchain can compile `language` (`c` or `c++`)
    fn supports_language(&self, language: &str) -> bool;
}

/// GCC or Clang toolchain
#[derive(Debug, Clone)]
pub struct GnuToolchain {
    name: String,
    version: String,
    family: ToolchainFamily,
    cc: PathBuf,
    cxx: PathBuf,
    platform: Platform,
}

impl GnuToolchain {
    /// Toolchain for a compiler binary. The C++ front end is looked for next
    /// to it (`gcc-12` -> `g++-12`, `clang` -> `clang++`) and falls back to
    /// the C front end.
    pub fn new(name: impl Into<String>, cc: PathBuf) -> Self {
        let family = ToolchainFamily::from_path(&cc);
        let cxx = sibling_cxx(&cc, family).unwrap_or_else(|| cc.clone());
        let version = query_version(&cc);

        Self {
            name: name.into(),
            version,
            family,
            cc,
            cxx,
            platform: Platform::detect(),
        }
    }

    /// Find a family's compiler on PATH
    pub fn locate(family: ToolchainFamily) -> Option<Self> {
        let cc = which::which(family.c_binary()).ok()?;
        tracing::debug!("Found {family} at {}", cc.display());
        Some(Self::new(family.c_binary(), cc))
    }
}

impl Toolchain for GnuToolchain {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn family(&self) -> ToolchainFamily {
        self.family
    }

    fn c_compiler(&self) -> &Path {
        &self.cc
    }

    fn cxx_compiler(&self) -> &Path {
        &self.cxx
    }

    fn platform(&self) -> &Platform {
        &self.platform
    }

    fn target_args(&self, target_triple: Option<&str>) -> Vec<String> {
        match (self.family, target_triple) {
            (ToolchainFamily::Clang, Some(triple)) if !triple.is_empty() => {
                vec!["-target".to_string(), triple.to_string()]
            }
            _ => Vec::new(),
        }
    }

    fn archive(
        &self,
        objects: &[PathBuf],
        output: &Path,
        flags: &[String],
    ) -> Result<(), ToolchainError> {
        let candidates: &[&str] = match self.family {
            ToolchainFamily::Clang => &["llvm-ar", "ar"],
            ToolchainFamily::Gcc => &["ar"],
        };
        let archiver = candidates
            .iter()
            .find_map(|name| which::which(name).ok())
            .ok_or_else(|| ToolchainError::ArchiverNotFound {
                tried: candidates.join(", "),
            })?;

        let mut args: Vec<String> = flags.to_vec();
        args.push("rcs".to_string());
        args.push(output.to_string_lossy().into_owned());
        args.extend(objects.iter().map(|o| o.to_string_lossy().into_owned()));

        let command = archiver.display().to_string();
        tracing::debug!("Archiving: {command} {}", args.join(" "));

        let output = std::process::Command::new(&archiver)
            .args(&args)
            .output()
            .map_err(|e| ToolchainError::Spawn {
                command: command.clone(),
                error: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ToolchainError::ArchiveFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    fn supports_language(&self, language: &str) -> bool {
        match language.to_lowercase().as_str() {
            "c" => true,
            "c++" | "cpp" | "cxx" => self.cxx.is_file() || which::which(&self.cxx).is_ok(),
            _ => false,
        }
    }
}

/// Derive the C++ front end next to a C front end
fn sibling_cxx(cc: &Path, family: ToolchainFamily) -> Option<PathBuf> {
    let file_name = cc.file_name()?.to_str()?;
    let c_name = family.c_binary();
    let idx = file_name.rfind(c_name)?;
    let cxx_name = format!(
        "{}{}{}",
        &file_name[..idx],
        family.cxx_binary(),
        &file_name[idx + c_name.len()..]
    );
    let candidate = cc.with_file_name(cxx_name);
    candidate.is_file().then_some(candidate)
}

/// First line of `<compiler> --version`, or `unknown`
fn query_version(cc: &Path) -> String {
    std::process::Command::new(cc)
        .arg("--version")
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| {
            String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(|line| line.trim().to_string())
        })
        .filter(|line| !line.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Set of available toolchains, keyed by lowercase name
#[derive(Debug, Default, Clone)]
pub struct ToolchainRegistry {
    toolchains: BTreeMap<String, Arc<dyn Toolchain>>,
}

impl ToolchainRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry populated with the compilers found on PATH
    pub fn detect() -> Self {
        let mut registry = Self::new();
        for family in [ToolchainFamily::Clang, ToolchainFamily::Gcc] {
            if let Some(toolchain) = GnuToolchain::locate(family) {
                registry.register(Arc::new(toolchain));
            }
        }
        tracing::debug!("Detected {} toolchains", registry.len());
        registry
    }

    /// Add or replace a toolchain
    pub fn register(&mut self, toolchain: Arc<dyn Toolchain>) {
        self.toolchains
            .insert(toolchain.name().to_lowercase(), toolchain);
    }

    /// Look up a toolchain by name, ignoring case
    pub fn get(&self, name: &str) -> Option<Arc<dyn Toolchain>> {
        self.toolchains.get(&name.to_lowercase()).cloned()
    }

    /// Preferred toolchain: clang, then gcc, then whatever is registered
    pub fn default_toolchain(&self) -> Option<Arc<dyn Toolchain>> {
        self.get("clang")
            .or_else(|| self.get("gcc"))
            .or_else(|| self.toolchains.values().next().cloned())
    }

    /// Resolve a configured compiler setting.
    ///
    /// Empty or `auto` selects the default toolchain. A value that looks like
    /// a path registers a toolchain for that binary. Anything else is a name,
    /// looked up in the registry and then on PATH.
    pub fn resolve(&mut self, setting: &str) -> Result<Arc<dyn Toolchain>, ToolchainError> {
        let setting = setting.trim();
        if setting.is_empty() || setting.eq_ignore_ascii_case("auto") {
            return self.default_toolchain().ok_or(ToolchainError::NoCompilers);
        }

        if let Some(toolchain) = self.get(setting) {
            return Ok(toolchain);
        }

        let path = Path::new(setting);
        let binary = if path.components().count() > 1 || path.is_absolute() {
            path.is_file().then(|| path.to_path_buf())
        } else {
            which::which(setting).ok()
        };
        let binary = binary.ok_or_else(|| ToolchainError::NotFound {
            name: setting.to_string(),
        })?;

        let toolchain: Arc<dyn Toolchain> = Arc::new(GnuToolchain::new(setting, binary));
        self.register(Arc::clone(&toolchain));
        Ok(toolchain)
    }

    /// All registered toolchains, by name
    pub fn list(&self) -> Vec<Arc<dyn Toolchain>> {
        self.toolchains.values().cloned().collect()
    }

    /// Number of registered toolchains
    pub fn len(&self) -> usize {
        self.toolchains.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.toolchains.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_binary(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, "").unwrap();
        path
    }

    #[test]
    fn test_family_from_path() {
        assert_eq!(
            ToolchainFamily::from_path(Path::new("/usr/bin/clang-17")),
            ToolchainFamily::Clang
        );
        assert_eq!(
            ToolchainFamily::from_path(Path::new("/opt/arm-none-eabi-gcc")),
            ToolchainFamily::Gcc
        );
    }

    #[test]
    fn test_sibling_cxx() {
        let dir = TempDir::new().unwrap();
        let gcc = fake_binary(&dir, "gcc-12");
        let gxx = fake_binary(&dir, "g++-12");
        assert_eq!(sibling_cxx(&gcc, ToolchainFamily::Gcc), Some(gxx));

        let clang = fake_binary(&dir, "clang");
        assert_eq!(sibling_cxx(&clang, ToolchainFamily::Clang), None);
    }

    #[test]
    fn test_cxx_falls_back_to_cc() {
        let dir = TempDir::new().unwrap();
        let cc = fake_binary(&dir, "mycc");
        let toolchain = GnuToolchain::new("mycc", cc.clone());
        assert_eq!(toolchain.cxx_compiler(), cc.as_path());
        assert_eq!(toolchain.version(), "unknown");
    }

    #[test]
    fn test_target_args() {
        let dir = TempDir::new().unwrap();
        let clang = GnuToolchain::new("clang", fake_binary(&dir, "clang"));
        assert_eq!(
            clang.target_args(Some("aarch64-linux-gnu")),
            vec!["-target", "aarch64-linux-gnu"]
        );
        assert!(clang.target_args(None).is_empty());

        let gcc = GnuToolchain::new("gcc", fake_binary(&dir, "gcc"));
        assert!(gcc.target_args(Some("aarch64-linux-gnu")).is_empty());
    }

    #[test]
    fn test_registry_lookup_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let mut registry = ToolchainRegistry::new();
        registry.register(Arc::new(GnuToolchain::new("GCC", fake_binary(&dir, "gcc"))));
        assert!(registry.get("gcc").is_some());
        assert!(registry.get("Gcc").is_some());
        assert!(registry.get("clang").is_none());
    }

    #[test]
    fn test_default_prefers_clang() {
        let dir = TempDir::new().unwrap();
        let mut registry = ToolchainRegistry::new();
        registry.register(Arc::new(GnuToolchain::new("gcc", fake_binary(&dir, "gcc"))));
        assert_eq!(registry.default_toolchain().unwrap().name(), "gcc");
        registry.register(Arc::new(GnuToolchain::new("clang", fake_binary(&dir, "clang"))));
        assert_eq!(registry.default_toolchain().unwrap().name(), "clang");
    }

    #[test]
    fn test_resolve_path_registers() {
        let dir = TempDir::new().unwrap();
        let cc = fake_binary(&dir, "cc-wrapper");
        let setting = cc.display().to_string();

        let mut registry = ToolchainRegistry::new();
        let toolchain = registry.resolve(&setting).unwrap();
        assert_eq!(toolchain.c_compiler(), cc.as_path());
        assert!(registry.get(&setting).is_some());
    }

    #[test]
    fn test_resolve_missing() {
        let mut registry = ToolchainRegistry::new();
        assert!(matches!(
            registry.resolve("/nonexistent/bin/gcc"),
            Err(ToolchainError::NotFound { .. })
        ));
        assert!(matches!(
            registry.resolve("auto"),
            Err(ToolchainError::NoCompilers)
        ));
    }
}
