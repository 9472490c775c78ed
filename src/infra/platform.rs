//! Host platform detection
//!
//! Artifact naming and a few linker flags differ per operating system.

use std::fmt;

/// Operating system kiln is running on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Platform {
    /// Linux
    Linux,
    /// macOS
    MacOs,
    /// Windows
    Windows,
    /// Anything else (treated like a Unix)
    Unknown(String),
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Linux => write!(f, "linux"),
            Platform::MacOs => write!(f, "macos"),
            Platform::Windows => write!(f, "windows"),
            Platform::Unknown(s) => write!(f, "{s}"),
        }
    }
}

impl Platform {
    /// Detect the current host platform
    pub fn detect() -> Self {
        Self::from_os(std::env::consts::OS)
    }

    /// Platform for an OS name as reported by `std::env::consts::OS`
    pub fn from_os(os: &str) -> Self {
        match os {
            "linux" => Platform::Linux,
            "macos" => Platform::MacOs,
            "windows" => Platform::Windows,
            other => Platform::Unknown(other.to_string()),
        }
    }

    /// Object file extension, with the leading dot
    pub fn object_extension(&self) -> &'static str {
        match self {
            Platform::Windows => ".obj",
            _ => ".o",
        }
    }

    /// Executable extension, with the leading dot (empty on Unix)
    pub fn executable_extension(&self) -> &'static str {
        match self {
            Platform::Windows => ".exe",
            _ => "",
        }
    }

    /// Static library extension
    pub fn static_lib_extension(&self) -> &'static str {
        match self {
            Platform::Windows => ".lib",
            _ => ".a",
        }
    }

    /// Shared library extension
    pub fn shared_lib_extension(&self) -> &'static str {
        match self {
            Platform::Windows => ".dll",
            Platform::MacOs => ".dylib",
            _ => ".so",
        }
    }

    /// Extra link flags needed to produce a shared library
    pub fn shared_lib_flags(&self) -> &'static [&'static str] {
        match self {
            Platform::Linux => &["-fPIC"],
            Platform::MacOs => &["-fPIC", "-dynamiclib"],
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extensions() {
        let linux = Platform::from_os("linux");
        assert_eq!(linux.object_extension(), ".o");
        assert_eq!(linux.executable_extension(), "");
        assert_eq!(linux.shared_lib_extension(), ".so");
        assert_eq!(linux.shared_lib_flags(), &["-fPIC"]);

        let mac = Platform::from_os("macos");
        assert_eq!(mac.shared_lib_extension(), ".dylib");
        assert_eq!(mac.shared_lib_flags(), &["-fPIC", "-dynamiclib"]);

        let windows = Platform::from_os("windows");
        assert_eq!(windows.executable_extension(), ".exe");
        assert_eq!(windows.static_lib_extension(), ".lib");
    }

    #[test]
    fn test_unknown_platform() {
        let platform = Platform::from_os("haiku");
        assert_eq!(platform.to_string(), "haiku");
        assert_eq!(platform.static_lib_extension(), ".a");
        assert!(platform.shared_lib_flags().is_empty());
    }
}
