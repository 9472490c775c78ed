//! Project configuration (kiln.toml)
//!
//! The manifest names the project, the sources to compile, the kind of
//! artifact to produce and the toolchain flags. It can also be written in the
//! line-oriented script form handled by [`crate::core::script`]; both parse
//! into the same [`Manifest`].
//!
//! Flags for one translation unit are composed in this order: language flags
//! (`c_flags` or `cxx_flags`), `-std=<standard>` for sources in the project
//! language, `-I<dir>` per include directory, then the selected target's
//! flags.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::defaults;
use crate::core::script;
use crate::error::ConfigError;

/// The project manifest
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    /// Project metadata
    #[serde(default)]
    pub project: ProjectConfig,

    /// What to build
    #[serde(default)]
    pub build: BuildConfig,

    /// Compiler selection and flags
    #[serde(default)]
    pub toolchain: ToolchainConfig,

    /// Named flag sets (`debug`, `release`, ...)
    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,
}

/// Project-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Project name
    #[serde(default)]
    pub name: String,

    /// Project version
    #[serde(default = "default_version")]
    pub version: String,

    /// Primary language (`c` or `c++`)
    #[serde(default = "default_language")]
    pub language: String,

    /// Language standard, passed as `-std=`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard: Option<String>,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_language() -> String {
    "c++".to_string()
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: default_version(),
            language: default_language(),
            standard: None,
        }
    }
}

/// Build configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildConfig {
    /// `executable`, `static_lib` or `shared_lib`
    #[serde(default)]
    pub output_type: String,

    /// Artifact base name (defaults to the project name)
    #[serde(default)]
    pub output_name: String,

    /// Source patterns
    #[serde(default)]
    pub sources: Vec<String>,

    /// Header search directories, relative to the project root
    #[serde(default)]
    pub include_dirs: Vec<String>,

    /// Exclude patterns
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Commands run before compiling
    #[serde(default)]
    pub pre_build_cmds: Vec<String>,

    /// Commands run after the artifact is produced
    #[serde(default)]
    pub post_build_cmds: Vec<String>,
}

/// Toolchain configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolchainConfig {
    /// Compiler name (`gcc`, `clang`), path, or `auto`
    #[serde(default = "default_compiler")]
    pub compiler: String,

    #[serde(default)]
    pub c_flags: Vec<String>,

    #[serde(default)]
    pub cxx_flags: Vec<String>,

    #[serde(default)]
    pub linker_flags: Vec<String>,

    #[serde(default)]
    pub archiver_flags: Vec<String>,

    /// Cross-compilation target triple, passed through to the compiler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_triple: Option<String>,
}

fn default_compiler() -> String {
    "auto".to_string()
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            compiler: default_compiler(),
            c_flags: Vec::new(),
            cxx_flags: Vec::new(),
            linker_flags: Vec::new(),
            archiver_flags: Vec::new(),
            target_triple: None,
        }
    }
}

/// Per-target flags and environment
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetConfig {
    #[serde(default)]
    pub c_flags: Vec<String>,

    #[serde(default)]
    pub cxx_flags: Vec<String>,

    #[serde(default)]
    pub linker_flags: Vec<String>,

    /// Environment overrides for compile and link commands
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Kind of artifact a project produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputType {
    Executable,
    StaticLib,
    SharedLib,
}

impl FromStr for OutputType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "executable" => Ok(OutputType::Executable),
            "static_lib" => Ok(OutputType::StaticLib),
            "shared_lib" => Ok(OutputType::SharedLib),
            other => Err(ConfigError::InvalidOutputType {
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputType::Executable => write!(f, "executable"),
            OutputType::StaticLib => write!(f, "static_lib"),
            OutputType::SharedLib => write!(f, "shared_lib"),
        }
    }
}

/// Language of a single source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceLanguage {
    C,
    Cxx,
}

impl SourceLanguage {
    /// Language of a file, by extension
    pub fn of(path: &Path) -> Self {
        let is_cxx = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| defaults::CXX_EXTENSIONS.contains(&ext));
        if is_cxx {
            SourceLanguage::Cxx
        } else {
            SourceLanguage::C
        }
    }

    /// Language named in the manifest
    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "c" => SourceLanguage::C,
            _ => SourceLanguage::Cxx,
        }
    }
}

impl Manifest {
    /// Parse a manifest from TOML without validating it
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Serialize the manifest to TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Load and validate a manifest file. `.script` files are parsed as
    /// scripts, everything else as TOML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let mut manifest = if path.extension().is_some_and(|e| e == "script") {
            script::parse(&content)?
        } else {
            Self::from_toml(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?
        };

        manifest.validate()?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(manifest)
    }

    /// Locate the configuration file for a project.
    ///
    /// An explicit path wins. Otherwise `kiln.toml`/`Kiln.toml` and then
    /// `kiln.script`/`Kiln.script` are looked for in `project_dir`.
    pub fn locate(project_dir: &Path, explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
        if let Some(path) = explicit {
            let path = if path.is_absolute() {
                path.to_path_buf()
            } else {
                project_dir.join(path)
            };
            if path.is_file() {
                return Ok(path);
            }
            return Err(ConfigError::NotFound { dir: path });
        }

        defaults::MANIFEST_FILES
            .iter()
            .chain(defaults::SCRIPT_FILES.iter())
            .map(|name| project_dir.join(name))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| ConfigError::NotFound {
                dir: project_dir.to_path_buf(),
            })
    }

    /// Locate and load a project's configuration
    pub fn discover(project_dir: &Path, explicit: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load(&Self::locate(project_dir, explicit)?)
    }

    /// Check required fields and fill in derived defaults
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.project.name.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "project name".to_string(),
            });
        }
        if self.build.output_type.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "build output type".to_string(),
            });
        }
        self.build.output_type.parse::<OutputType>()?;

        if self.build.output_name.is_empty() {
            self.build.output_name = self.project.name.clone();
        }
        Ok(())
    }

    /// Parsed output type
    pub fn output_type(&self) -> Result<OutputType, ConfigError> {
        self.build.output_type.parse()
    }

    /// Configuration of a named target. `debug` is always accepted even when
    /// not declared.
    pub fn target(&self, name: &str) -> Result<Option<&TargetConfig>, ConfigError> {
        match self.targets.get(name) {
            Some(target) => Ok(Some(target)),
            None if name == defaults::DEFAULT_TARGET => Ok(None),
            None => Err(ConfigError::UnknownTarget {
                name: name.to_string(),
            }),
        }
    }

    /// Include directories resolved against the project root
    pub fn include_paths(&self, project_dir: &Path) -> Vec<PathBuf> {
        self.build
            .include_dirs
            .iter()
            .map(|dir| project_dir.join(dir))
            .collect()
    }

    /// Compile flags for one translation unit
    pub fn compile_flags(
        &self,
        language: SourceLanguage,
        include_paths: &[PathBuf],
        target: Option<&TargetConfig>,
    ) -> Vec<String> {
        let mut flags = match language {
            SourceLanguage::C => self.toolchain.c_flags.clone(),
            SourceLanguage::Cxx => self.toolchain.cxx_flags.clone(),
        };

        if let Some(standard) = &self.project.standard {
            if SourceLanguage::from_name(&self.project.language) == language {
                flags.push(format!("-std={standard}"));
            }
        }

        flags.extend(include_paths.iter().map(|dir| format!("-I{}", dir.display())));

        if let Some(target) = target {
            match language {
                SourceLanguage::C => flags.extend(target.c_flags.iter().cloned()),
                SourceLanguage::Cxx => flags.extend(target.cxx_flags.iter().cloned()),
            }
        }
        flags
    }

    /// Link flags: toolchain flags then the target's
    pub fn link_flags(&self, target: Option<&TargetConfig>) -> Vec<String> {
        let mut flags = self.toolchain.linker_flags.clone();
        if let Some(target) = target {
            flags.extend(target.linker_flags.iter().cloned());
        }
        flags
    }
}
