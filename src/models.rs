use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Serialize, Deserialize};

use crate::registry::SourceKind;

/// Resolution state of a single tool dependency.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// System tool present at its registered path
    Available,
    /// Downloadable tool already extracted into the cache
    Cached,
    /// Registered, but neither on disk nor cached
    Missing,
    /// No registry entry for the name
    Unknown,
}

impl Status {
    /// Whether the tool can be used or bundled without a download.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Status::Available | Status::Cached)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Available => write!(f, "available"),
            Status::Cached => write!(f, "cached"),
            Status::Missing => write!(f, "missing"),
            Status::Unknown => write!(f, "unknown"),
        }
    }
}

/// Derived, non-persistent view of one tool's availability.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DependencyStatus {
    pub name: String,
    pub status: Status,
    pub source: Option<SourceKind>,
    /// System path for `Available`, cache directory for `Cached`
    pub path: Option<PathBuf>,
    pub download_url: Option<String>,
    pub size_bytes: u64,
}

impl DependencyStatus {
    pub fn unknown(name: &str) -> Self {
        DependencyStatus {
            name: name.to_string(),
            status: Status::Unknown,
            source: None,
            path: None,
            download_url: None,
            size_bytes: 0,
        }
    }
}

/// Outcome of a single fetch.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Downloaded,
    Failed,
    /// Nothing to do, the tool was already usable
    Available,
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadStatus::Downloaded => write!(f, "downloaded"),
            DownloadStatus::Failed => write!(f, "failed"),
            DownloadStatus::Available => write!(f, "available"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    pub name: String,
    pub status: DownloadStatus,
    pub message: String,
    pub path: Option<PathBuf>,
}

impl DownloadResult {
    pub fn downloaded(name: &str, path: PathBuf) -> Self {
        DownloadResult {
            name: name.to_string(),
            status: DownloadStatus::Downloaded,
            message: format!("Downloaded to {}", path.display()),
            path: Some(path),
        }
    }

    pub fn available(name: &str, path: Option<PathBuf>) -> Self {
        DownloadResult {
            name: name.to_string(),
            status: DownloadStatus::Available,
            message: "Already available".to_string(),
            path,
        }
    }

    pub fn failed(name: &str, message: impl Into<String>) -> Self {
        DownloadResult {
            name: name.to_string(),
            status: DownloadStatus::Failed,
            message: message.into(),
            path: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == DownloadStatus::Failed
    }
}

/// Aggregate of a batch download with per-item outcomes.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DownloadReport {
    pub results: Vec<DownloadResult>,
}

impl DownloadReport {
    pub fn count(&self, status: DownloadStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn failed_count(&self) -> usize {
        self.count(DownloadStatus::Failed)
    }

    pub fn succeeded_count(&self) -> usize {
        self.results.len() - self.failed_count()
    }

    /// True when no item failed.
    pub fn success(&self) -> bool {
        self.failed_count() == 0
    }
}

/// Result of one `Build` invocation.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OfflinePackage {
    pub path: PathBuf,
    pub included_collections: BTreeSet<String>,
    pub bundled_tools: BTreeSet<String>,
    pub size_bytes: u64,
    pub success: bool,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}
