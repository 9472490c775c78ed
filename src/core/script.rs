//! Script configuration (kiln.script)
//!
//! A line-oriented alternative to `kiln.toml`. One statement per line, `//`
//! starts a comment line:
//!
//! ```text
//! Project("app", "1.0.0")
//! Language("c++", "c++17")
//! Compiler("clang")
//! Flags("-Wall", "-Wextra")
//! Executable("app", [Sources("src/**.cpp"), Exclude("*_test.cpp"), IncludeDirs("include")])
//! Target("release", [Flags("-O2", "-DNDEBUG")])
//! ```
//!
//! `StaticLib(...)` and `SharedLib(...)` take the same arguments as
//! `Executable(...)`.

use regex::Regex;

use crate::core::manifest::{Manifest, TargetConfig};
use crate::error::ConfigError;

struct Patterns {
    project: Regex,
    language: Regex,
    output: Regex,
    compiler: Regex,
    flags: Regex,
    target: Regex,
    call: Regex,
    quoted: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, ConfigError> {
        let re = |pattern: &str| {
            Regex::new(pattern).map_err(|e| ConfigError::Script {
                line: 0,
                message: e.to_string(),
            })
        };

        Ok(Self {
            project: re(r#"^Project\s*\(\s*"([^"]+)"\s*,\s*"([^"]+)"\s*\)$"#)?,
            language: re(r#"^Language\s*\(\s*"([^"]+)"(?:\s*,\s*"([^"]+)")?\s*\)$"#)?,
            output: re(r#"^(Executable|StaticLib|SharedLib)\s*\(\s*"([^"]+)"\s*,\s*\[\s*(.*?)\s*\]\s*\)$"#)?,
            compiler: re(r#"^Compiler\s*\(\s*"([^"]+)"\s*\)$"#)?,
            flags: re(r"^Flags\s*\(\s*(.*?)\s*\)$")?,
            target: re(r#"^Target\s*\(\s*"([^"]+)"\s*,\s*\[\s*(.*?)\s*\]\s*\)$"#)?,
            call: re(r"^([A-Za-z]+)\s*\(\s*(.*?)\s*\)$")?,
            quoted: re(r#""([^"]+)""#)?,
        })
    }

    fn strings(&self, args: &str) -> Vec<String> {
        self.quoted
            .captures_iter(args)
            .map(|caps| caps[1].to_string())
            .collect()
    }
}

/// Parse script content into an unvalidated manifest
pub fn parse(content: &str) -> Result<Manifest, ConfigError> {
    let patterns = Patterns::compile()?;
    let mut manifest = Manifest::default();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        parse_statement(&patterns, &mut manifest, line).map_err(|message| {
            ConfigError::Script {
                line: idx + 1,
                message,
            }
        })?;
    }

    Ok(manifest)
}

fn parse_statement(p: &Patterns, manifest: &mut Manifest, line: &str) -> Result<(), String> {
    if let Some(caps) = p.project.captures(line) {
        manifest.project.name = caps[1].to_string();
        manifest.project.version = caps[2].to_string();
        return Ok(());
    }

    if let Some(caps) = p.language.captures(line) {
        manifest.project.language = caps[1].to_string();
        if let Some(standard) = caps.get(2) {
            manifest.project.standard = Some(standard.as_str().to_string());
        }
        return Ok(());
    }

    if let Some(caps) = p.output.captures(line) {
        manifest.build.output_type = match &caps[1] {
            "StaticLib" => "static_lib",
            "SharedLib" => "shared_lib",
            _ => "executable",
        }
        .to_string();
        manifest.build.output_name = caps[2].to_string();

        for item in split_items(&caps[3]) {
            let (name, args) = call(p, &item, "build")?;
            let values = p.strings(args);
            match name {
                "Sources" => manifest.build.sources.extend(values),
                "Exclude" => manifest.build.exclude.extend(values),
                "IncludeDirs" => manifest.build.include_dirs.extend(values),
                _ => return Err(format!("unrecognized build item: {item}")),
            }
        }
        return Ok(());
    }

    if let Some(caps) = p.compiler.captures(line) {
        manifest.toolchain.compiler = caps[1].to_string();
        return Ok(());
    }

    if let Some(caps) = p.flags.captures(line) {
        let flags = p.strings(&caps[1]);
        manifest.toolchain.c_flags.extend(flags.iter().cloned());
        manifest.toolchain.cxx_flags.extend(flags);
        return Ok(());
    }

    if let Some(caps) = p.target.captures(line) {
        let mut target = TargetConfig::default();
        for item in split_items(&caps[2]) {
            let (name, args) = call(p, &item, "target")?;
            if name != "Flags" {
                return Err(format!("unrecognized target item: {item}"));
            }
            let flags = p.strings(args);
            target.c_flags.extend(flags.iter().cloned());
            target.cxx_flags.extend(flags);
        }
        manifest.targets.insert(caps[1].to_string(), target);
        return Ok(());
    }

    Err(format!("unrecognized statement: {line}"))
}

fn call<'a>(p: &Patterns, item: &'a str, block: &str) -> Result<(&'a str, &'a str), String> {
    let caps = p
        .call
        .captures(item)
        .ok_or_else(|| format!("unrecognized {block} item: {item}"))?;
    match (caps.get(1), caps.get(2)) {
        (Some(name), Some(args)) => Ok((name.as_str(), args.as_str())),
        _ => Err(format!("unrecognized {block} item: {item}")),
    }
}

/// Split a block body on top-level commas
fn split_items(content: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_string = false;

    for c in content.chars() {
        match c {
            '"' => {
                in_string = !in_string;
                current.push(c);
            }
            '[' | '(' if !in_string => {
                depth += 1;
                current.push(c);
            }
            ']' | ')' if !in_string => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 && !in_string => {
                items.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        items.push(current.trim().to_string());
    }

    items.retain(|item| !item.is_empty());
    items
}
