//! Error taxonomy for the resolver and packaging pipeline.
//!
//! Only [`PackagerError::Catalog`], [`PackagerError::Config`] and the
//! directory-creation flavour of [`PackagerError::Packaging`] abort an
//! operation. The remaining variants describe per-item failures that are
//! folded into structured results (catalog warnings, `Failed` download
//! results, package warnings).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PackagerError {
    /// Collection directory missing or unreadable.
    #[error("cannot load collections from {path}: {reason}")]
    Catalog { path: PathBuf, reason: String },

    /// One definition file could not be parsed.
    #[error("failed to parse definition {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    /// A tool name has no registry entry.
    #[error("tool '{0}' is not present in the registry")]
    Resolution(String),

    /// Download or extraction failure for a single tool.
    #[error("failed to fetch '{tool}': {reason}")]
    Fetch { tool: String, reason: String },

    /// Output directory could not be prepared.
    #[error("packaging failed at {path}: {reason}")]
    Packaging { path: PathBuf, reason: String },

    /// Packager configuration or registry override file is unusable.
    #[error("invalid configuration {path}: {reason}")]
    Config { path: PathBuf, reason: String },
}

impl PackagerError {
    pub fn catalog(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PackagerError::Catalog { path: path.into(), reason: reason.to_string() }
    }

    pub fn parse(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PackagerError::Parse { path: path.into(), reason: reason.to_string() }
    }

    pub fn packaging(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PackagerError::Packaging { path: path.into(), reason: reason.to_string() }
    }

    pub fn config(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PackagerError::Config { path: path.into(), reason: reason.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_subject() {
        let err = PackagerError::catalog("/missing", "No such file or directory");
        assert!(err.to_string().contains("/missing"));

        let err = PackagerError::Resolution("yara".to_string());
        assert_eq!(err.to_string(), "tool 'yara' is not present in the registry");

        let err = PackagerError::Fetch { tool: "yara".to_string(), reason: "timed out".to_string() };
        assert!(err.to_string().contains("timed out"));
    }
}
