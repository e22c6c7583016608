//! Global constants for the triage packager.
//!
//! This module centralizes all hardcoded values to improve maintainability
//! and make configuration changes easier.

// Buffer size constants
/// Default buffer size for file operations (1MB)
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Chunk size for compression operations (512KB)
pub const COMPRESSION_CHUNK_SIZE: usize = 512 * 1024;

/// Large file threshold for compression decisions (100MB)
pub const LARGE_FILE_COMPRESSION_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Maximum file size hashed into a cache manifest (2GB)
pub const MAX_MANIFEST_HASH_SIZE_MB: u64 = 2048;

// Download constants
/// Default number of concurrent tool downloads
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 4;

/// Upper bound for concurrent tool downloads
pub const MAX_CONCURRENT_DOWNLOADS: usize = 8;

/// Default per-download timeout in seconds
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 120;

/// Shortest accepted per-download timeout in seconds
pub const MIN_DOWNLOAD_TIMEOUT_SECS: u64 = 60;

/// Longest accepted per-download timeout in seconds
pub const MAX_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

/// Default number of caller-side download retries
pub const DEFAULT_DOWNLOAD_RETRIES: usize = 2;

/// Base retry delay in milliseconds
pub const RETRY_BASE_DELAY_MS: u64 = 500;

/// Maximum retry delay in seconds
pub const RETRY_MAX_DELAY_SECS: u64 = 30;

/// User agent sent with every download request
pub const DEFAULT_USER_AGENT: &str = concat!("triage-packager/", env!("CARGO_PKG_VERSION"));

// Cache layout
/// Integrity manifest written into each cached tool directory
pub const CACHE_MANIFEST_NAME: &str = ".manifest.json";

/// Cache subdirectory holding in-progress extractions
pub const CACHE_STAGING_DIR: &str = ".staging";

/// Cache subdirectory holding in-progress archive downloads
pub const CACHE_DOWNLOAD_DIR: &str = ".downloads";

// Package layout
/// Package subdirectory holding collection definitions
pub const PACKAGE_COLLECTIONS_DIR: &str = "collections";

/// Package subdirectory holding bundled tools
pub const PACKAGE_TOOLS_DIR: &str = "tools";

/// Package subdirectory holding the runtime configuration
pub const PACKAGE_CONFIG_DIR: &str = "config";

/// Runtime configuration file name inside the config directory
pub const RUNTIME_CONFIG_NAME: &str = "runtime_config.json";

/// Version of the runtime configuration format
pub const RUNTIME_CONFIG_FORMAT_VERSION: &str = "1.0";

/// Deployment entry point for Unix targets
pub const DEPLOY_SCRIPT_UNIX: &str = "deploy.sh";

/// Deployment entry point for Windows targets
pub const DEPLOY_SCRIPT_WINDOWS: &str = "deploy.ps1";

// File extensions
/// Extensions recognised as collection definition files
pub const DEFINITION_EXTENSIONS: &[&str] = &["yaml", "yml"];

/// Extensions stripped from tool names found in queries
pub const EXECUTABLE_EXTENSIONS: &[&str] = &["exe", "bat", "cmd", "ps1", "sh"];

/// Extensions that are already compressed
pub const COMPRESSED_EXTENSIONS: &[&str] = &[
    "zip", "gz", "tgz", "xz", "bz2", "7z", "rar", "jpg", "jpeg", "png", "gif", "mp3", "mp4",
];
