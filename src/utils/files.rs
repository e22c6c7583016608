use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// Total size in bytes of every regular file under `path` (or of `path` itself).
pub fn tree_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Whether `dir` is a directory holding at least one entry not named in `ignore`.
pub fn has_content(dir: &Path, ignore: &[&str]) -> bool {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .any(|e| !ignore.contains(&e.file_name().to_string_lossy().as_ref())),
        Err(_) => false,
    }
}

/// Recursively copy `src` into `dest`, creating `dest` if needed.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<u64> {
    let mut copied = 0;
    fs::create_dir_all(dest)
        .context(format!("Failed to create directory: {}", dest.display()))?;

    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.context(format!("Failed to walk {}", src.display()))?;
        let rel_path = entry.path().strip_prefix(src)
            .context(format!("Failed to get relative path for {}", entry.path().display()))?;
        let target = dest.join(rel_path);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .context(format!("Failed to create directory: {}", target.display()))?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
            copied += fs::copy(entry.path(), &target)
                .context(format!("Failed to copy {} to {}", entry.path().display(), target.display()))?;
        }
    }

    Ok(copied)
}

/// Add a numeric suffix to `dest_path` until it names a free location
pub fn unique_destination(dest_path: &Path) -> PathBuf {
    if !dest_path.exists() {
        return dest_path.to_path_buf();
    }

    let file_stem = dest_path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());

    let extension = dest_path.extension()
        .map(|s| format!(".{}", s.to_string_lossy()))
        .unwrap_or_default();

    let mut counter = 1;
    loop {
        let new_path = dest_path.with_file_name(format!("{}_{}{}", file_stem, counter, extension));
        if !new_path.exists() {
            return new_path;
        }
        counter += 1;
    }
}

/// Mark a file executable for its owner, group and others.
#[cfg(unix)]
pub fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    fs::set_permissions(path, perms)
        .context(format!("Failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
pub fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Convert a relative path to forward-slash form for configs and archives.
pub fn to_portable(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
