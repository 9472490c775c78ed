//! Build cache
//!
//! Persists one fingerprint record per produced artifact and decides whether
//! an artifact has to be rebuilt. The cache lives in a single JSON document
//! under the project's `.kiln/cache` directory.
//!
//! An entry only counts as evidence that an artifact is up to date when the
//! file on disk still matches it, the command that produced it is unchanged,
//! and every recorded dependency is itself unchanged.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::defaults;
use crate::error::CacheError;

/// Current cache document version. Documents with any other version are
/// discarded on load.
pub const CACHE_VERSION: &str = "1.1";

/// Fingerprint of one produced artifact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    /// Artifact path
    pub path: String,
    /// SHA256 of the artifact content
    pub hash: String,
    /// Modification time in nanoseconds since the unix epoch
    pub timestamp: u64,
    /// Dependencies considered at the last build
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// State of each dependency when the artifact was produced
    #[serde(default)]
    pub dependency_fingerprints: BTreeMap<String, Fingerprint>,
    /// Hash of the command line that produced the artifact
    pub command_hash: String,
    /// Object file produced by the command
    #[serde(default)]
    pub object_file: String,
    /// How long production took, in nanoseconds (informational)
    #[serde(default)]
    pub compilation_time: u64,
}

/// Modification time and content hash of a file at one point in time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Fingerprint {
    /// Modification time in nanoseconds since the unix epoch
    pub timestamp: u64,
    /// SHA256 of the content
    pub hash: String,
}

impl Fingerprint {
    /// Fingerprint a file as it is on disk now
    pub fn of(path: &Path) -> Result<Self, CacheError> {
        let timestamp = modified_nanos(path).map_err(|e| CacheError::Fingerprint {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Ok(Self {
            timestamp,
            hash: Cache::calculate_file_hash(path)?,
        })
    }
}

/// On-disk cache document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheDocument {
    /// Format version
    pub version: String,
    /// Artifact path -> entry
    #[serde(default)]
    pub entries: BTreeMap<String, CacheEntry>,
    /// Seconds since the unix epoch of the last save
    #[serde(default)]
    pub last_build_time: u64,
}

impl Default for CacheDocument {
    fn default() -> Self {
        Self {
            version: CACHE_VERSION.to_string(),
            entries: BTreeMap::new(),
            last_build_time: unix_now(),
        }
    }
}

/// Why an artifact has to be rebuilt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// Never built (no cache entry)
    NoEntry,
    /// Artifact file is gone
    Missing,
    /// Modification time differs from the recorded one
    Modified,
    /// Content differs from the recorded hash
    ContentChanged,
    /// Compiler or flags changed
    CommandChanged,
    /// A dependency no longer exists
    DependencyMissing(PathBuf),
    /// A dependency's content or its own cache entry no longer matches
    DependencyStale(PathBuf),
    /// A dependency that was not part of the last build
    DependencyAdded(PathBuf),
    /// A dependency was modified after the artifact was produced
    DependencyNewer(PathBuf),
    /// The artifact or a dependency could not be inspected
    Unreadable { path: PathBuf, error: String },
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoEntry => write!(f, "not in cache"),
            Self::Missing => write!(f, "output file doesn't exist"),
            Self::Modified => write!(f, "output modified since last build"),
            Self::ContentChanged => write!(f, "output content changed"),
            Self::CommandChanged => write!(f, "build command changed"),
            Self::DependencyMissing(p) => write!(f, "dependency {} missing", p.display()),
            Self::DependencyStale(p) => write!(f, "dependency {} changed", p.display()),
            Self::DependencyNewer(p) => write!(f, "dependency {} modified", p.display()),
            Self::DependencyAdded(p) => write!(f, "new dependency {}", p.display()),
            Self::Unreadable { path, error } => {
                write!(f, "cannot inspect {}: {error}", path.display())
            }
        }
    }
}

/// Outcome of a freshness check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// Nothing to do
    UpToDate,
    /// Must be rebuilt
    Stale(StaleReason),
}

impl Freshness {
    /// Whether a rebuild is required
    pub fn needs_rebuild(&self) -> bool {
        matches!(self, Self::Stale(_))
    }
}

/// Build cache bound to a file on disk
#[derive(Debug)]
pub struct Cache {
    path: PathBuf,
    document: CacheDocument,
}

impl Cache {
    /// Create an empty cache that will be saved to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            document: CacheDocument::default(),
        }
    }

    /// Create a cache at `path` and load it
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let mut cache = Self::new(path);
        cache.load()?;
        Ok(cache)
    }

    /// Default cache file location for a project
    pub fn default_path(project_dir: &Path) -> PathBuf {
        project_dir
            .join(defaults::STATE_DIR)
            .join("cache")
            .join(defaults::CACHE_FILE)
    }

    /// Path of the cache file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loaded document
    pub fn document(&self) -> &CacheDocument {
        &self.document
    }

    /// Load the cache from disk.
    ///
    /// A missing file yields an empty cache. A document with a different
    /// version is discarded rather than rejected.
    pub fn load(&mut self) -> Result<(), CacheError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.document = CacheDocument::default();
                return Ok(());
            }
            Err(e) => {
                return Err(CacheError::Read {
                    path: self.path.clone(),
                    error: e.to_string(),
                })
            }
        };

        let value: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| CacheError::Parse {
                path: self.path.clone(),
                error: e.to_string(),
            })?;

        let version = value.get("version").and_then(serde_json::Value::as_str);
        if version != Some(CACHE_VERSION) {
            tracing::warn!(
                "Ignoring cache {} with version {:?} (expected {CACHE_VERSION})",
                self.path.display(),
                version
            );
            self.document = CacheDocument::default();
            return Ok(());
        }

        self.document = serde_json::from_value(value).map_err(|e| CacheError::Parse {
            path: self.path.clone(),
            error: e.to_string(),
        })?;
        tracing::debug!(
            "Loaded {} cache entries from {}",
            self.document.entries.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Write the cache back to disk
    pub fn save(&mut self) -> Result<(), CacheError> {
        self.document.last_build_time = unix_now();

        let data =
            serde_json::to_string_pretty(&self.document).map_err(|e| CacheError::Write {
                path: self.path.clone(),
                error: e.to_string(),
            })?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::Write {
                path: self.path.clone(),
                error: e.to_string(),
            })?;
        }

        std::fs::write(&self.path, data).map_err(|e| CacheError::Write {
            path: self.path.clone(),
            error: e.to_string(),
        })
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.document.entries.len()
    }

    /// Whether the cache has no entries
    pub fn is_empty(&self) -> bool {
        self.document.entries.is_empty()
    }

    /// Entry for an artifact
    pub fn entry(&self, path: &Path) -> Option<&CacheEntry> {
        self.document.entries.get(&key(path))
    }

    /// Insert or replace an entry
    pub fn put_entry(&mut self, entry: CacheEntry) {
        self.document.entries.insert(entry.path.clone(), entry);
    }

    /// Remove an entry
    pub fn remove_entry(&mut self, path: &Path) -> Option<CacheEntry> {
        self.document.entries.remove(&key(path))
    }

    /// Drop all entries
    pub fn clear(&mut self) {
        self.document.entries.clear();
    }

    /// SHA256 of a file's content, as lowercase hex
    pub fn calculate_file_hash(path: &Path) -> Result<String, CacheError> {
        let fingerprint_err = |e: std::io::Error| CacheError::Fingerprint {
            path: path.to_path_buf(),
            error: e.to_string(),
        };

        let mut file = File::open(path).map_err(fingerprint_err)?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).map_err(fingerprint_err)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Hash of a compiler binary and its full argument list
    pub fn calculate_command_hash(command: &str, args: &[String]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(command.as_bytes());
        hasher.update([0u8]);
        for arg in args {
            hasher.update(arg.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }

    /// Decide whether `path` must be rebuilt.
    ///
    /// Stale when there is no entry, the file is missing or differs from the
    /// entry, the command hash changed, or any dependency is missing, new,
    /// newer than the artifact, or differs from the fingerprint recorded with
    /// the artifact (or from its own entry). Failing to inspect anything
    /// counts as stale.
    pub fn needs_rebuild(&self, path: &Path, dependencies: &[PathBuf], command_hash: &str) -> Freshness {
        let Some(entry) = self.entry(path) else {
            return Freshness::Stale(StaleReason::NoEntry);
        };

        if let Err(reason) = check_matches_entry(path, entry) {
            return Freshness::Stale(reason);
        }

        if entry.command_hash != command_hash {
            return Freshness::Stale(StaleReason::CommandChanged);
        }

        let mut visited = HashSet::new();
        for dep in dependencies {
            if let Err(reason) = self.check_dependency(dep, entry, &mut visited) {
                return Freshness::Stale(reason);
            }
        }

        Freshness::UpToDate
    }

    /// Re-derive the state of one dependency instead of trusting its entry.
    ///
    /// Every dependency must exist, be no newer than the artifact that lists
    /// it, and still carry the content recorded with that artifact. Content is
    /// only re-hashed when the modification time moved. Dependencies that are
    /// produced artifacts themselves must also still match their own entry,
    /// recursively through their recorded dependencies.
    fn check_dependency<'a>(
        &'a self,
        dep: &Path,
        parent: &'a CacheEntry,
        visited: &mut HashSet<PathBuf>,
    ) -> Result<(), StaleReason> {
        let mut stack: Vec<(PathBuf, &CacheEntry)> = vec![(dep.to_path_buf(), parent)];

        while let Some((current, parent)) = stack.pop() {
            let mtime = match modified_nanos(&current) {
                Ok(mtime) => mtime,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(StaleReason::DependencyMissing(current));
                }
                Err(e) => {
                    return Err(StaleReason::Unreadable {
                        path: current,
                        error: e.to_string(),
                    });
                }
            };

            if mtime > parent.timestamp {
                return Err(StaleReason::DependencyNewer(current));
            }

            let Some(recorded) = parent.dependency_fingerprints.get(&key(&current)) else {
                return Err(StaleReason::DependencyAdded(current));
            };
            if mtime != recorded.timestamp {
                match Self::calculate_file_hash(&current) {
                    Ok(hash) if hash == recorded.hash => {}
                    Ok(_) => return Err(StaleReason::DependencyStale(current)),
                    Err(e) => {
                        return Err(StaleReason::Unreadable {
                            path: current,
                            error: e.to_string(),
                        })
                    }
                }
            }

            if !visited.insert(current.clone()) {
                continue;
            }

            if let Some(entry) = self.entry(&current) {
                if check_matches_entry(&current, entry).is_err() {
                    return Err(StaleReason::DependencyStale(current));
                }
                stack.extend(
                    entry
                        .dependencies
                        .iter()
                        .map(|d| (PathBuf::from(d), entry)),
                );
            }
        }

        Ok(())
    }

    /// Record the post-build state of a freshly produced artifact
    pub fn update_entry(
        &mut self,
        path: &Path,
        dependencies: &[PathBuf],
        command_hash: &str,
        object_file: &Path,
        compilation_time: Duration,
    ) -> Result<(), CacheError> {
        let Fingerprint { timestamp, hash } = Fingerprint::of(path)?;
        let dependency_fingerprints = dependencies
            .iter()
            .map(|dep| Ok((key(dep), Fingerprint::of(dep)?)))
            .collect::<Result<BTreeMap<_, _>, CacheError>>()?;

        self.put_entry(CacheEntry {
            path: key(path),
            hash,
            timestamp,
            dependencies: dependencies.iter().map(|d| key(d)).collect(),
            dependency_fingerprints,
            command_hash: command_hash.to_string(),
            object_file: key(object_file),
            compilation_time: u64::try_from(compilation_time.as_nanos()).unwrap_or(u64::MAX),
        });
        Ok(())
    }

    /// Remove entries whose artifact no longer exists. Returns how many were
    /// dropped.
    pub fn clean(&mut self) -> usize {
        let before = self.document.entries.len();
        self.document
            .entries
            .retain(|path, _| Path::new(path).exists());
        before - self.document.entries.len()
    }
}

/// Compare a file on disk against its entry
fn check_matches_entry(path: &Path, entry: &CacheEntry) -> Result<(), StaleReason> {
    let mtime = match modified_nanos(path) {
        Ok(mtime) => mtime,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StaleReason::Missing),
        Err(e) => {
            return Err(StaleReason::Unreadable {
                path: path.to_path_buf(),
                error: e.to_string(),
            })
        }
    };

    if mtime != entry.timestamp {
        return Err(StaleReason::Modified);
    }

    match Cache::calculate_file_hash(path) {
        Ok(hash) if hash == entry.hash => Ok(()),
        Ok(_) => Err(StaleReason::ContentChanged),
        Err(e) => Err(StaleReason::Unreadable {
            path: path.to_path_buf(),
            error: e.to_string(),
        }),
    }
}

fn key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Modification time of a file in nanoseconds since the unix epoch
fn modified_nanos(path: &Path) -> std::io::Result<u64> {
    let modified = std::fs::metadata(path)?.modified()?;
    let since_epoch = modified.duration_since(UNIX_EPOCH).unwrap_or_default();
    Ok(u64::try_from(since_epoch.as_nanos()).unwrap_or(u64::MAX))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
