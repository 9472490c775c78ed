//! Default configuration values

/// Project state directory, relative to the project root
pub const STATE_DIR: &str = ".kiln";

/// Build cache file name inside `<STATE_DIR>/cache`
pub const CACHE_FILE: &str = "build.json";

/// Default output directory, relative to the project root
pub const DEFAULT_OUTPUT_DIR: &str = "build";

/// Target used when none is selected
pub const DEFAULT_TARGET: &str = "debug";

/// Capacity of the executor submission queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Manifest file names, in lookup order
pub const MANIFEST_FILES: [&str; 2] = ["kiln.toml", "Kiln.toml"];

/// Script file names, in lookup order
pub const SCRIPT_FILES: [&str; 2] = ["kiln.script", "Kiln.script"];

/// Placeholder replaced by the artifact path in post-build commands
pub const OUTPUT_PLACEHOLDER: &str = "${output}";

/// Extensions treated as C++ sources
pub const CXX_EXTENSIONS: [&str; 5] = ["cpp", "cc", "cxx", "C", "c++"];

/// Minimum proptest iterations
pub const MIN_PROPTEST_ITERATIONS: u32 = 100;
