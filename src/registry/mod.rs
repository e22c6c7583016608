//! Tool registry: provenance metadata for every tool a collection may need.
//!
//! The registry is an immutable value built once from the built-in table
//! and an optional YAML override file, then shared by reference with the
//! resolver, fetcher and packager. Override entries replace built-in
//! entries of the same name wholesale.
//!
//! ## Override file format
//!
//! ```yaml
//! tools:
//!   yara:
//!     platform: windows
//!     source: downloadable
//!     url: https://example.org/yara.zip
//!     license: BSD-3-Clause
//!   lsof:
//!     platform: linux
//!     source: system_path
//!     path: /usr/sbin/lsof
//! ```

mod builtin;

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::PackagerError;

pub use builtin::builtin_tools;

/// Operating system class a tool runs on.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    #[serde(rename = "windows")]
    Windows,
    #[serde(rename = "linux")]
    Linux,
    #[serde(rename = "macos")]
    MacOS,
    #[serde(rename = "cross-platform")]
    CrossPlatform,
}

impl Platform {
    /// Whether a tool for this platform can run on `os` (a `std::env::consts::OS` value).
    pub fn supports(&self, os: &str) -> bool {
        match self {
            Platform::CrossPlatform => true,
            Platform::Windows => os == "windows",
            Platform::Linux => os == "linux",
            Platform::MacOS => os == "macos",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Windows => write!(f, "windows"),
            Platform::Linux => write!(f, "linux"),
            Platform::MacOS => write!(f, "macos"),
            Platform::CrossPlatform => write!(f, "cross-platform"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    SystemPath,
    Downloadable,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::SystemPath => write!(f, "system_path"),
            SourceKind::Downloadable => write!(f, "downloadable"),
        }
    }
}

/// Where a tool comes from. Exactly one of path or URL exists per record.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ToolSource {
    SystemPath { path: PathBuf },
    Downloadable { url: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ToolRecord {
    /// Filled from the map key when loaded from an override file
    #[serde(default)]
    pub name: String,
    pub platform: Platform,
    #[serde(flatten)]
    pub source: ToolSource,
    #[serde(default)]
    pub license: String,
    #[serde(default)]
    pub description: String,
}

impl ToolRecord {
    pub fn system(name: &str, platform: Platform, path: &str, license: &str, description: &str) -> Self {
        ToolRecord {
            name: name.into(),
            platform,
            source: ToolSource::SystemPath { path: PathBuf::from(path) },
            license: license.into(),
            description: description.into(),
        }
    }

    pub fn download(name: &str, platform: Platform, url: &str, license: &str, description: &str) -> Self {
        ToolRecord {
            name: name.into(),
            platform,
            source: ToolSource::Downloadable { url: url.into() },
            license: license.into(),
            description: description.into(),
        }
    }

    pub fn source_kind(&self) -> SourceKind {
        match self.source {
            ToolSource::SystemPath { .. } => SourceKind::SystemPath,
            ToolSource::Downloadable { .. } => SourceKind::Downloadable,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            ToolSource::SystemPath { path } => Some(path),
            ToolSource::Downloadable { .. } => None,
        }
    }

    pub fn download_url(&self) -> Option<&str> {
        match &self.source {
            ToolSource::Downloadable { url } => Some(url),
            ToolSource::SystemPath { .. } => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OverrideFile {
    #[serde(default)]
    tools: BTreeMap<String, ToolRecord>,
}

/// Name-keyed tool table.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolRecord>,
}

impl ToolRegistry {
    /// Registry holding only the given records.
    pub fn from_records(records: impl IntoIterator<Item = ToolRecord>) -> Self {
        let mut registry = ToolRegistry::default();
        registry.merge(records);
        registry
    }

    /// Registry holding the built-in table.
    pub fn builtin() -> Self {
        Self::from_records(builtin_tools())
    }

    /// Built-in table merged with an optional override file.
    pub fn load(override_file: Option<&Path>) -> Result<Self, PackagerError> {
        let mut registry = Self::builtin();
        if let Some(path) = override_file {
            let records = Self::read_override_file(path)?;
            info!("Applying {} tool overrides from {}", records.len(), path.display());
            registry.merge(records);
        }
        Ok(registry)
    }

    /// Parse an override file into records named after their keys.
    pub fn read_override_file(path: &Path) -> Result<Vec<ToolRecord>, PackagerError> {
        let content = fs::read_to_string(path)
            .map_err(|e| PackagerError::config(path, e))?;
        let parsed: OverrideFile = serde_yaml::from_str(&content)
            .map_err(|e| PackagerError::config(path, e))?;

        Ok(parsed.tools
            .into_iter()
            .map(|(name, mut record)| {
                record.name = name;
                record
            })
            .collect())
    }

    /// Insert records, fully replacing entries with the same name.
    ///
    /// Names are stored lower-cased, the form the extractor produces.
    pub fn merge(&mut self, records: impl IntoIterator<Item = ToolRecord>) {
        for mut record in records {
            record.name = record.name.to_lowercase();
            if self.tools.contains_key(&record.name) {
                debug!("Tool '{}' overridden", record.name);
            }
            self.tools.insert(record.name.clone(), record);
        }
    }

    /// Look up a tool by name, ignoring case.
    pub fn resolve(&self, name: &str) -> Option<&ToolRecord> {
        self.tools.get(&name.to_lowercase())
    }

    /// Records usable on `os`.
    pub fn for_platform(&self, os: &str) -> Vec<&ToolRecord> {
        self.tools.values().filter(|t| t.platform.supports(os)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolRecord> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
