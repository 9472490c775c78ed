//! Source discovery and include scanning
//!
//! Discovery expands the configured source patterns into a de-duplicated file
//! list. Patterns are globs relative to the project root (or absolute):
//! `*` and `?` match within one path component, `[...]` matches a character
//! class, and `**` matches across directories, so `src/**.cpp`,
//! `src/**/*.cpp` and `*.c` all work. Exclude patterns drop a file when they
//! match its file name as a glob or appear anywhere in its path.
//!
//! The include scanner follows `#include` directives transitively to find
//! the headers a translation unit depends on.

use regex::Regex;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::error::DiscoveryError;

/// Expand source patterns relative to `root`.
///
/// Files are returned lexically normalized, in pattern order, sorted by name
/// within each pattern, with duplicates removed. Finding nothing is an error.
pub fn discover_sources(
    root: &Path,
    patterns: &[String],
    excludes: &[String],
) -> Result<Vec<PathBuf>, DiscoveryError> {
    let excludes = excludes
        .iter()
        .map(|pattern| Ok((pattern.as_str(), glob_to_regex(pattern)?)))
        .collect::<Result<Vec<_>, DiscoveryError>>()?;

    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for pattern in patterns {
        for file in expand_pattern(root, pattern)? {
            let file = normalize_path(&file);
            let shown = file.strip_prefix(root).unwrap_or(&file).to_string_lossy();
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let excluded = excludes
                .iter()
                .any(|(raw, re)| re.is_match(&name) || shown.contains(raw));
            if excluded {
                tracing::debug!("Excluding {shown}");
                continue;
            }

            if seen.insert(file.clone()) {
                files.push(file);
            }
        }
    }

    if files.is_empty() {
        return Err(DiscoveryError::NoSources);
    }
    Ok(files)
}

/// Expand a single pattern into matching files
fn expand_pattern(root: &Path, pattern: &str) -> Result<Vec<PathBuf>, DiscoveryError> {
    if pattern.matches("**").count() > 1 {
        return Err(DiscoveryError::InvalidPattern {
            pattern: pattern.to_string(),
            error: "only one recursive wildcard is supported".to_string(),
        });
    }

    let mut normalized = pattern.replace('\\', "/");
    while let Some(stripped) = normalized.strip_prefix("./") {
        normalized = stripped.to_string();
    }
    let absolute = Path::new(&normalized).is_absolute();
    let regex = glob_to_regex(&normalized)?;

    // Walk from the longest wildcard-free directory prefix
    let literal_len = normalized
        .find(['*', '?', '['])
        .unwrap_or(normalized.len());
    let base = match normalized[..literal_len].rfind('/') {
        Some(idx) => &normalized[..=idx],
        None => "",
    };
    let rest = &normalized[base.len()..];
    let walk_root = if absolute {
        PathBuf::from(base)
    } else {
        root.join(base)
    };

    if !walk_root.is_dir() {
        return Ok(Vec::new());
    }

    let mut walker = WalkDir::new(&walk_root).min_depth(1).sort_by_file_name();
    if !rest.contains("**") {
        walker = walker.max_depth(rest.split('/').count());
    }

    let mut matches = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| DiscoveryError::Walk {
            path: walk_root.clone(),
            error: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let candidate = if absolute {
            entry.path().to_string_lossy().replace('\\', "/")
        } else {
            match entry.path().strip_prefix(root) {
                Ok(relative) => relative.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            }
        };

        if regex.is_match(&candidate) {
            matches.push(entry.path().to_path_buf());
        }
    }

    Ok(matches)
}

/// Translate a glob into an anchored regular expression
pub(crate) fn glob_to_regex(pattern: &str) -> Result<Regex, DiscoveryError> {
    let invalid = |error: String| DiscoveryError::InvalidPattern {
        pattern: pattern.to_string(),
        error,
    };

    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("(?:.*/)?");
                } else {
                    out.push_str(".*");
                }
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => {
                let mut class = String::from("[");
                if chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                }
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    if c == '\\' || c == '[' {
                        class.push('\\');
                    }
                    class.push(c);
                }
                if !closed {
                    return Err(invalid("unterminated character class".to_string()));
                }
                class.push(']');
                out.push_str(&class);
            }
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');

    Regex::new(&out).map_err(|e| invalid(e.to_string()))
}

/// Transitive `#include` scanner
#[derive(Debug)]
pub struct IncludeScanner {
    include_dirs: Vec<PathBuf>,
    local_include: Regex,
    system_include: Regex,
}

impl IncludeScanner {
    /// Create a scanner searching the given include directories
    pub fn new(include_dirs: Vec<PathBuf>) -> Result<Self, DiscoveryError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| DiscoveryError::InvalidPattern {
                pattern: pattern.to_string(),
                error: e.to_string(),
            })
        };

        Ok(Self {
            include_dirs,
            local_include: compile(r#"^\s*#\s*include\s*"([^"]+)""#)?,
            system_include: compile(r"^\s*#\s*include\s*<([^>]+)>")?,
        })
    }

    /// Headers `source` depends on, directly or through other headers, in
    /// discovery order.
    ///
    /// Quoted includes resolve next to the including file first, then in the
    /// include directories; angle-bracket includes only in the include
    /// directories. Includes that resolve nowhere (system headers) are
    /// skipped.
    pub fn scan(&self, source: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
        let source = normalize_path(source);
        let mut visited: HashSet<PathBuf> = HashSet::from([source.clone()]);
        let mut dependencies = Vec::new();
        let mut stack = vec![source];

        while let Some(file) = stack.pop() {
            let content = std::fs::read(&file).map_err(|e| DiscoveryError::Scan {
                path: file.clone(),
                error: e.to_string(),
            })?;
            let content = String::from_utf8_lossy(&content);
            let dir = file.parent().unwrap_or_else(|| Path::new(""));

            let mut found = Vec::new();
            for line in content.lines() {
                let resolved = if let Some(caps) = self.local_include.captures(line) {
                    let include = &caps[1];
                    let sibling = dir.join(include);
                    if sibling.is_file() {
                        Some(sibling)
                    } else {
                        self.resolve_in_include_dirs(include)
                    }
                } else if let Some(caps) = self.system_include.captures(line) {
                    self.resolve_in_include_dirs(&caps[1])
                } else {
                    None
                };

                if let Some(header) = resolved.map(|p| normalize_path(&p)) {
                    if visited.insert(header.clone()) {
                        dependencies.push(header.clone());
                        found.push(header);
                    }
                }
            }

            // Reverse so the first include is scanned next
            stack.extend(found.into_iter().rev());
        }

        Ok(dependencies)
    }

    fn resolve_in_include_dirs(&self, include: &str) -> Option<PathBuf> {
        self.include_dirs
            .iter()
            .map(|dir| dir.join(include))
            .find(|candidate| candidate.is_file())
    }
}

/// Lexically collapse `.` and `..` components
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)))
                    && out.pop();
                if !popped {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
