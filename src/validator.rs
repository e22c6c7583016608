//! Structural checks for collection definitions.
//!
//! Only a missing name or an empty source list make a definition invalid.
//! Unresolved tools and queries that do not look like queries are reported
//! as warnings, since the collection may still be useful on a host that has
//! the tool installed.

use lazy_static::lazy_static;
use regex::Regex;

use crate::catalog::CollectionDefinition;
use crate::models::{Status, ValidationResult};
use crate::resolver::DependencyResolver;

lazy_static! {
    static ref QUERY_KEYWORDS: Regex = Regex::new(r"(?i)\b(select|let|from)\b").unwrap();
}

/// Whether `query` contains at least one recognizable query keyword.
pub fn looks_like_query(query: &str) -> bool {
    QUERY_KEYWORDS.is_match(query)
}

pub fn validate(definition: &CollectionDefinition, resolver: &DependencyResolver) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let label = if definition.name.trim().is_empty() {
        errors.push(format!(
            "Collection defined in {} is missing a name",
            definition.file_path.display()
        ));
        definition.file_path.display().to_string()
    } else {
        definition.name.clone()
    };

    if definition.sources.is_empty() {
        errors.push(format!("Collection '{}' has no sources", label));
    }

    for (index, source) in definition.sources.iter().enumerate() {
        let source_label = source
            .name
            .clone()
            .unwrap_or_else(|| format!("source #{}", index + 1));

        if !looks_like_query(&source.query) {
            warnings.push(format!(
                "{} of '{}' does not contain a recognizable query keyword",
                source_label, label
            ));
        }
    }

    for dependency in &definition.dependencies {
        let status = resolver.status(dependency);
        match status.status {
            Status::Missing => warnings.push(format!(
                "Tool '{}' is registered but not available{}",
                dependency,
                status
                    .download_url
                    .map(|_| " (run download to fetch it)")
                    .unwrap_or(" on this host")
            )),
            Status::Unknown => warnings.push(format!(
                "Tool '{}' is not present in the tool registry",
                dependency
            )),
            Status::Available | Status::Cached => {}
        }
    }

    ValidationResult {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}
