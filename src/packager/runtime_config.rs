use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::constants::{PACKAGE_CONFIG_DIR, RUNTIME_CONFIG_FORMAT_VERSION, RUNTIME_CONFIG_NAME};

/// Configuration handed to the collection engine when a package is deployed.
///
/// All paths are relative to the package root and use forward slashes.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub format_version: String,
    pub package_id: String,
    pub created_at: String,
    pub builder_version: String,
    pub built_on: String,
    pub target_os: String,
    pub collections: Vec<String>,
    /// Collection name to definition file
    pub collection_files: BTreeMap<String, String>,
    /// Present only when tools were bundled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_path: Option<String>,
    /// Tool name to bundled location
    #[serde(default)]
    pub tools: BTreeMap<String, String>,
}

impl RuntimeConfig {
    pub fn new(target_os: &str) -> Self {
        let built_on = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        RuntimeConfig {
            format_version: RUNTIME_CONFIG_FORMAT_VERSION.to_string(),
            package_id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now().to_rfc3339(),
            builder_version: env!("CARGO_PKG_VERSION").to_string(),
            built_on,
            target_os: target_os.to_string(),
            collections: Vec::new(),
            collection_files: BTreeMap::new(),
            tools_path: None,
            tools: BTreeMap::new(),
        }
    }

    /// Location of the runtime configuration inside a package.
    pub fn path_in(root: &Path) -> PathBuf {
        root.join(PACKAGE_CONFIG_DIR).join(RUNTIME_CONFIG_NAME)
    }

    pub fn write(&self, root: &Path) -> Result<PathBuf> {
        let path = Self::path_in(root);
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize runtime configuration")?;
        fs::write(&path, json)
            .context(format!("Failed to write runtime configuration to {}", path.display()))?;
        Ok(path)
    }

    pub fn read(root: &Path) -> Result<Self> {
        let path = Self::path_in(root);
        let content = fs::read_to_string(&path)
            .context(format!("Failed to read runtime configuration {}", path.display()))?;
        serde_json::from_str(&content)
            .context(format!("Malformed runtime configuration {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_new_fills_build_metadata() {
        let config = RuntimeConfig::new("linux");
        assert_eq!(config.format_version, RUNTIME_CONFIG_FORMAT_VERSION);
        assert_eq!(config.package_id.len(), 36);
        assert!(chrono::DateTime::parse_from_rfc3339(&config.created_at).is_ok());
        assert!(!config.built_on.is_empty());
        assert_ne!(RuntimeConfig::new("linux").package_id, config.package_id);
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(PACKAGE_CONFIG_DIR)).unwrap();

        let mut config = RuntimeConfig::new("windows");
        config.collections = vec!["Windows.Autoruns".into()];
        config.collection_files.insert("Windows.Autoruns".into(), "collections/autoruns.yaml".into());

        let path = config.write(dir.path()).unwrap();
        assert!(path.ends_with("config/runtime_config.json"));

        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("tools_path"), "tools_path is omitted when nothing is bundled");

        assert_eq!(RuntimeConfig::read(dir.path()).unwrap(), config);
    }

    #[test]
    fn test_read_missing_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(RuntimeConfig::read(dir.path()).is_err());
    }
}
