//! Utility functions shared by the cache, fetcher and packager.
//!
//! ## Components
//!
//! - **Compression**: multi-threaded ZIP archive creation for finished packages
//! - **Hashing**: SHA-256 calculation for cache integrity manifests
//! - **Files**: tree sizing, recursive copies and collision-free destinations
//!
//! ### Archiving a package
//!
//! ```no_run
//! use triage_packager::utils::compress::archive_directory;
//! use std::path::Path;
//!
//! # fn example() -> anyhow::Result<()> {
//! let zip_path = archive_directory(Path::new("/tmp/pkg"), Path::new("/tmp/pkg.zip"))?;
//! println!("Created archive: {}", zip_path.display());
//! # Ok(())
//! # }
//! ```

/// File compression and ZIP archive creation
pub mod compress;

/// Recursive copy, sizing and naming helpers
pub mod files;

/// Cryptographic hash calculation utilities
pub mod hash;
