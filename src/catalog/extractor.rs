//! Static discovery of tool dependencies in query text.
//!
//! The extractor walks every source query and source precondition of a
//! collection and applies a small ordered table of textual patterns. Each
//! pattern captures the string that names a program and an
//! [`ExtractionRule`] decides how that string becomes a tool name.
//!
//! This is a heuristic: unknown invocation idioms are simply not found, and
//! text that matches nothing adds nothing.

use lazy_static::lazy_static;
use regex::Regex;

use crate::catalog::definition::CollectionDefinition;
use crate::constants::EXECUTABLE_EXTENSIONS;

/// How a captured value is turned into a tool name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionRule {
    /// The capture is a program path, possibly containing spaces.
    WholeValue,
    /// The capture is a command line; the program is its first token.
    FirstToken,
}

pub struct ToolPattern {
    pub label: &'static str,
    pub regex: Regex,
    pub rule: ExtractionRule,
}

lazy_static! {
    /// Ordered pattern table. Add new idioms at the end.
    pub static ref TOOL_PATTERNS: Vec<ToolPattern> = vec![
        ToolPattern {
            label: "execve argv",
            regex: Regex::new(r#"(?i)\bexecve\s*\(\s*argv\s*=\s*\[\s*["']([^"']+)["']"#).unwrap(),
            rule: ExtractionRule::WholeValue,
        },
        ToolPattern {
            label: "process call",
            regex: Regex::new(r#"(?i)\b(?:exec|spawn|popen|shell|run)\s*\(\s*(?:(?:argv|cmd)\s*=\s*)?\[?\s*["']([^"']+)["']"#).unwrap(),
            rule: ExtractionRule::FirstToken,
        },
        ToolPattern {
            label: "named tool parameter",
            regex: Regex::new(r#"(?i)\b(?:executable|tool_?name|binary)\s*[=:]\s*["']([^"']+)["']"#).unwrap(),
            rule: ExtractionRule::WholeValue,
        },
        ToolPattern {
            label: "named command parameter",
            regex: Regex::new(r#"(?i)\bcommand\s*[=:]\s*["']([^"']+)["']"#).unwrap(),
            rule: ExtractionRule::FirstToken,
        },
    ];
}

/// Reduce a captured program reference to a registry-style tool name.
///
/// `C:\\Tools\\Autorunsc.exe` becomes `autorunsc`. Returns `None` for
/// captures that do not look like a program name (variables, templates).
pub fn normalize_tool_name(raw: &str, rule: ExtractionRule) -> Option<String> {
    let value = match rule {
        ExtractionRule::WholeValue => raw.trim(),
        ExtractionRule::FirstToken => raw.split_whitespace().next()?,
    };

    let base = value.rsplit(|c| c == '/' || c == '\\').next()?.trim().to_lowercase();

    let stem = match base.rsplit_once('.') {
        Some((stem, ext)) if EXECUTABLE_EXTENSIONS.contains(&ext) => stem.to_string(),
        _ => base,
    };

    let well_formed = !stem.is_empty()
        && stem.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if well_formed {
        Some(stem)
    } else {
        None
    }
}

/// All tool names referenced in `text`, in order of first appearance.
pub fn extract_tool_names(text: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = Vec::new();

    for pattern in TOOL_PATTERNS.iter() {
        for caps in pattern.regex.captures_iter(text) {
            if let Some(m) = caps.get(1) {
                if let Some(name) = normalize_tool_name(m.as_str(), pattern.rule) {
                    found.push((m.start(), name));
                }
            }
        }
    }

    found.sort_by_key(|(pos, _)| *pos);

    let mut names: Vec<String> = Vec::new();
    for (_, name) in found {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Merge tool names found in the definition's sources into its dependencies.
///
/// Returns how many names were new. Running it again adds nothing.
pub fn enrich(definition: &mut CollectionDefinition) -> usize {
    let discovered: Vec<String> = definition.sources
        .iter()
        .flat_map(|source| {
            std::iter::once(source.query.as_str()).chain(source.precondition.as_deref())
        })
        .flat_map(extract_tool_names)
        .collect();

    discovered.iter().filter(|name| definition.add_dependency(name)).count()
}
