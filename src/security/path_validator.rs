//! Path validation utilities for preventing path traversal.
//!
//! Tool names become cache and package directory names, archive entries
//! become file paths, and the package root is created (and on rebuild,
//! replaced) on behalf of the caller. Each of those goes through here.

use anyhow::{anyhow, bail, Result};
use std::path::{Component, Path, PathBuf};

/// Join an untrusted relative path onto `base`, refusing anything that
/// could land outside it.
///
/// # Security
///
/// This function rejects:
/// - `..` components
/// - Absolute paths, roots and drive prefixes
/// - Null bytes
pub fn safe_join(base: &Path, relative: &Path) -> Result<PathBuf> {
    if relative.to_string_lossy().contains('\0') {
        bail!("Path contains null bytes");
    }

    let mut resolved = base.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(name) => resolved.push(name),
            Component::CurDir => {}
            Component::ParentDir => {
                bail!("Path traversal attempt detected: {} contains '..'", relative.display());
            }
            Component::RootDir | Component::Prefix(_) => {
                bail!("Absolute path not allowed here: {}", relative.display());
            }
        }
    }

    if resolved == base {
        bail!("Path {} does not name an entry", relative.display());
    }

    Ok(resolved)
}

/// Sanitizes a filename to remove potentially dangerous characters.
///
/// Returns a name that is safe as a single path component on all platforms.
pub fn sanitize_filename(filename: &str) -> String {
    let mut sanitized = String::with_capacity(filename.len());

    for ch in filename.chars() {
        match ch {
            '/' | '\\' => sanitized.push('_'),
            '\0' => continue,
            '<' | '>' | ':' | '"' | '|' | '?' | '*' => sanitized.push('_'),
            c if c.is_control() => sanitized.push('_'),
            c => sanitized.push(c),
        }
    }

    let trimmed = sanitized.trim_matches(|c| c == '.' || c == ' ');

    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Validates that a path is safe for output.
///
/// Refuses well-known system locations so that a mistyped output path can
/// never cause a rebuild to replace operating system directories.
pub fn validate_output_path(path: &Path) -> Result<()> {
    let path_str = path.to_string_lossy().to_lowercase().replace('\\', "/");
    let trimmed = path_str.trim_end_matches('/');

    if trimmed.is_empty() || trimmed.len() <= 3 && trimmed.ends_with(':') {
        return Err(anyhow!("Cannot use filesystem root as output: {}", path.display()));
    }

    let dangerous_paths = [
        "/etc",
        "/sys",
        "/proc",
        "/dev",
        "/boot",
        "/bin",
        "/sbin",
        "/usr",
        "/system",
        "/library",
        "c:/windows",
        "c:/program files",
        "c:/programdata",
    ];

    for dangerous in dangerous_paths {
        if trimmed == dangerous || trimmed.starts_with(&format!("{}/", dangerous)) {
            return Err(anyhow!(
                "Cannot write to system directory: {}",
                path.display()
            ));
        }
    }

    Ok(())
}
