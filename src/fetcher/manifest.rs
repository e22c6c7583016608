//! On-disk tool cache layout and per-tool integrity manifests.
//!
//! ```text
//! <cache-root>/
//!   <tool>/            extracted content, one directory per tool
//!     .manifest.json   file list with sizes and SHA-256 digests
//!   .staging/          extractions in progress
//!   .downloads/        archives in progress
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::constants::{
    CACHE_DOWNLOAD_DIR, CACHE_MANIFEST_NAME, CACHE_STAGING_DIR, MAX_MANIFEST_HASH_SIZE_MB,
};
use super::extract::url_file_name;
use crate::security::sanitize_filename;
use crate::utils::files::{has_content, to_portable};
use crate::utils::hash::calculate_sha256;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Forward-slash path relative to the tool directory
    pub path: String,
    pub size: u64,
    /// Absent for files above the hashing size limit
    pub sha256: Option<String>,
}

/// Integrity record written next to a tool's extracted content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheManifest {
    pub tool: String,
    pub url: String,
    pub fetched_at: String,
    pub files: Vec<ManifestEntry>,
}

impl CacheManifest {
    /// Describe every file under `dir` (excluding any existing manifest).
    pub fn build(tool: &str, url: &str, dir: &Path) -> Result<Self> {
        let mut files = Vec::new();

        for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
            let entry = entry.context(format!("Failed to walk {}", dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let rel_path = entry.path().strip_prefix(dir)
                .context("Failed to compute relative path")?;
            if rel_path == Path::new(CACHE_MANIFEST_NAME) {
                continue;
            }

            let size = entry.metadata()?.len();
            let sha256 = calculate_sha256(entry.path(), MAX_MANIFEST_HASH_SIZE_MB)
                .context(format!("Failed to hash {}", entry.path().display()))?;

            files.push(ManifestEntry {
                path: to_portable(rel_path),
                size,
                sha256,
            });
        }

        Ok(CacheManifest {
            tool: tool.to_string(),
            url: url.to_string(),
            fetched_at: Utc::now().to_rfc3339(),
            files,
        })
    }

    pub fn write(&self, dir: &Path) -> Result<()> {
        let path = dir.join(CACHE_MANIFEST_NAME);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).context(format!("Failed to write {}", path.display()))
    }

    /// Read the manifest of `dir`, if one exists.
    pub fn read(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(CACHE_MANIFEST_NAME);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .context(format!("Failed to read {}", path.display()))?;
        let manifest = serde_json::from_str(&content)
            .context(format!("Malformed manifest {}", path.display()))?;
        Ok(Some(manifest))
    }

    /// Check every listed file against `dir`. Returns the first mismatch.
    pub fn verify(&self, dir: &Path) -> std::result::Result<(), String> {
        if self.files.is_empty() {
            return Err("manifest lists no files".to_string());
        }

        for entry in &self.files {
            let path = dir.join(&entry.path);
            let metadata = fs::metadata(&path)
                .map_err(|_| format!("{} is missing", entry.path))?;

            if metadata.len() != entry.size {
                return Err(format!(
                    "{} is {} bytes, expected {}",
                    entry.path,
                    metadata.len(),
                    entry.size
                ));
            }

            if let Some(expected) = &entry.sha256 {
                let actual = calculate_sha256(&path, MAX_MANIFEST_HASH_SIZE_MB)
                    .map_err(|e| format!("{} could not be hashed: {}", entry.path, e))?;
                if actual.as_deref() != Some(expected.as_str()) {
                    return Err(format!("{} does not match its recorded hash", entry.path));
                }
            }
        }

        Ok(())
    }
}

/// Health of one tool's cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState {
    /// Directory missing or holding nothing but a manifest
    Empty,
    /// Content present and consistent with its manifest (if any)
    Valid,
    /// Content present but the manifest does not match it
    Corrupt(String),
}

/// Root of the shared download cache.
#[derive(Debug, Clone)]
pub struct ToolCache {
    root: PathBuf,
}

impl ToolCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ToolCache { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tool_dir(&self, name: &str) -> PathBuf {
        self.root.join(sanitize_filename(name))
    }

    /// Fresh staging directory path for one extraction attempt.
    pub fn staging_dir(&self, name: &str) -> PathBuf {
        self.root
            .join(CACHE_STAGING_DIR)
            .join(format!("{}-{}", sanitize_filename(name), uuid::Uuid::new_v4()))
    }

    /// Fresh temporary file path for one download attempt.
    ///
    /// The URL's final path segment is kept so the archive format can still
    /// be recognised from the file name.
    pub fn download_path(&self, name: &str, url: &str) -> PathBuf {
        let file_name = url_file_name(url)
            .map(sanitize_filename)
            .unwrap_or_else(|| sanitize_filename(name));

        self.root
            .join(CACHE_DOWNLOAD_DIR)
            .join(format!("{}-{}", uuid::Uuid::new_v4(), file_name))
    }

    pub fn inspect(&self, name: &str) -> CacheState {
        let dir = self.tool_dir(name);
        if !has_content(&dir, &[CACHE_MANIFEST_NAME]) {
            return CacheState::Empty;
        }

        match CacheManifest::read(&dir) {
            Ok(None) => CacheState::Valid,
            Ok(Some(manifest)) => match manifest.verify(&dir) {
                Ok(()) => CacheState::Valid,
                Err(reason) => {
                    debug!("Cache entry for '{}' failed verification: {}", name, reason);
                    CacheState::Corrupt(reason)
                }
            },
            Err(e) => CacheState::Corrupt(e.to_string()),
        }
    }

    /// Whether `name` has usable cached content.
    pub fn is_populated(&self, name: &str) -> bool {
        self.inspect(name) == CacheState::Valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn populate(cache: &ToolCache, name: &str) -> PathBuf {
        let dir = cache.tool_dir(name);
        fs::create_dir_all(dir.join("bin")).unwrap();
        fs::write(dir.join("bin/yara"), b"\x7fELF fake").unwrap();
        fs::write(dir.join("LICENSE"), b"BSD").unwrap();
        dir
    }

    #[test]
    fn test_empty_and_missing_directories() {
        let root = TempDir::new().unwrap();
        let cache = ToolCache::new(root.path());

        assert_eq!(cache.inspect("yara"), CacheState::Empty);
        fs::create_dir_all(cache.tool_dir("yara")).unwrap();
        assert_eq!(cache.inspect("yara"), CacheState::Empty);

        // A manifest alone is not content
        fs::write(cache.tool_dir("yara").join(CACHE_MANIFEST_NAME), "{}").unwrap();
        assert!(!cache.is_populated("yara"));
    }

    #[test]
    fn test_directory_without_manifest_is_valid() {
        let root = TempDir::new().unwrap();
        let cache = ToolCache::new(root.path());
        populate(&cache, "yara");
        assert!(cache.is_populated("yara"));
    }

    #[test]
    fn test_manifest_round_trip_and_tamper_detection() {
        let root = TempDir::new().unwrap();
        let cache = ToolCache::new(root.path());
        let dir = populate(&cache, "yara");

        let manifest = CacheManifest::build("yara", "https://example.test/yara.zip", &dir).unwrap();
        let paths: Vec<&str> = manifest.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["LICENSE", "bin/yara"]);
        manifest.write(&dir).unwrap();

        let read_back = CacheManifest::read(&dir).unwrap().unwrap();
        assert_eq!(read_back, manifest);
        assert_eq!(cache.inspect("yara"), CacheState::Valid);

        // Same size, different bytes
        fs::write(dir.join("bin/yara"), b"\x7fELF evil").unwrap();
        assert!(matches!(cache.inspect("yara"), CacheState::Corrupt(_)));

        fs::remove_file(dir.join("bin/yara")).unwrap();
        match cache.inspect("yara") {
            CacheState::Corrupt(reason) => assert!(reason.contains("bin/yara")),
            other => panic!("expected corrupt, got {:?}", other),
        }
    }

    #[test]
    fn test_rebuilding_manifest_skips_itself() {
        let root = TempDir::new().unwrap();
        let cache = ToolCache::new(root.path());
        let dir = populate(&cache, "yara");

        CacheManifest::build("yara", "u", &dir).unwrap().write(&dir).unwrap();
        let rebuilt = CacheManifest::build("yara", "u", &dir).unwrap();
        assert!(rebuilt.files.iter().all(|f| f.path != CACHE_MANIFEST_NAME));
    }

    #[test]
    fn test_malformed_manifest_is_corrupt() {
        let root = TempDir::new().unwrap();
        let cache = ToolCache::new(root.path());
        let dir = populate(&cache, "yara");
        fs::write(dir.join(CACHE_MANIFEST_NAME), "not json").unwrap();
        assert!(matches!(cache.inspect("yara"), CacheState::Corrupt(_)));
    }

    #[test]
    fn test_download_path_keeps_archive_name() {
        let cache = ToolCache::new("/cache");
        let path = cache.download_path("yara", "https://example.test/dl/yara-v4.5.zip?sig=abc");
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("-yara-v4.5.zip"));
        assert!(path.starts_with("/cache/.downloads"));

        let bare = cache.download_path("avml", "https://example.test/");
        assert!(bare.file_name().unwrap().to_string_lossy().ends_with("-avml"));
    }

    #[test]
    fn test_tool_dir_is_sanitized() {
        let cache = ToolCache::new("/cache");
        assert_eq!(cache.tool_dir("../../etc"), PathBuf::from("/cache/_.._etc"));
    }
}
