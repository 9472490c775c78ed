//! Compiler diagnostics
//!
//! Turns GCC/Clang style output into structured diagnostics so a failed
//! compilation can be reported per location instead of as a raw stderr dump.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// `error` or `fatal error`
    Error,
    /// `warning`
    Warning,
    /// A `note` with nothing before it to attach to
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Note => write!(f, "note"),
        }
    }
}

/// One compiler message at a source location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub file: String,
    pub line: u32,
    pub column: Option<u32>,
    /// Source excerpt the compiler echoed (source line and caret), one
    /// entry per line with its alignment kept
    pub code: Option<String>,
    /// Attached notes and other trailing lines
    pub suggestions: Vec<String>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)?;
        if let Some(column) = self.column {
            write!(f, ":{column}")?;
        }
        write!(f, ": {}: {}", self.severity, self.message)
    }
}

fn location_regex() -> Option<&'static Regex> {
    static LOCATION: OnceLock<Option<Regex>> = OnceLock::new();
    LOCATION
        .get_or_init(|| {
            Regex::new(r"^(.*?):(\d+):(?:(\d+):)?\s+(warning|error|note|fatal error):\s+(.*)$").ok()
        })
        .as_ref()
}

/// Parse compiler output into diagnostics.
///
/// A `note` attaches to the preceding diagnostic as a suggestion. Indented
/// lines after a diagnostic are collected into its code snippet and other
/// non-empty lines become suggestions.
pub fn parse(output: &str) -> Vec<Diagnostic> {
    let Some(location) = location_regex() else {
        return Vec::new();
    };

    let mut diagnostics: Vec<Diagnostic> = Vec::new();

    for line in output.lines() {
        if let Some(caps) = location.captures(line) {
            let kind = &caps[4];
            let message = caps[5].to_string();

            if kind == "note" {
                if let Some(current) = diagnostics.last_mut() {
                    current.suggestions.push(message);
                    continue;
                }
            }

            let severity = match kind {
                "warning" => Severity::Warning,
                "note" => Severity::Note,
                _ => Severity::Error,
            };

            diagnostics.push(Diagnostic {
                severity,
                message,
                file: caps[1].to_string(),
                line: caps[2].parse().unwrap_or(0),
                column: caps.get(3).and_then(|m| m.as_str().parse().ok()),
                code: None,
                suggestions: Vec::new(),
            });
        } else if let Some(current) = diagnostics.last_mut() {
            if line.trim().is_empty() {
                continue;
            }
            if line.starts_with([' ', '\t']) {
                let line = line.trim_end();
                match &mut current.code {
                    Some(code) => {
                        code.push('\n');
                        code.push_str(line);
                    }
                    None => current.code = Some(line.to_string()),
                }
            } else {
                current.suggestions.push(line.to_string());
            }
        }
    }

    diagnostics
}

/// Log diagnostics at a level matching their severity
pub fn report(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        match diagnostic.severity {
            Severity::Error => tracing::error!("{diagnostic}"),
            Severity::Warning => tracing::warn!("{diagnostic}"),
            Severity::Note => tracing::info!("{diagnostic}"),
        }
        for code in diagnostic.code.iter().flat_map(|code| code.lines()) {
            tracing::info!("{code}");
        }
        for suggestion in &diagnostic.suggestions {
            tracing::info!("    note: {suggestion}");
        }
    }
}
