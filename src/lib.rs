//! # triage-packager
//!
//! Dependency resolver and offline packager for DFIR collection definitions.
//!
//! ## Overview
//!
//! Collection definitions are YAML files describing investigative queries.
//! Many of them shell out to external forensic tools (yara, autorunsc,
//! winpmem, lsof). triage-packager finds those tool references, works out
//! which tools are usable on the build host, fetches the missing ones into a
//! local cache and assembles a self-contained package that can be carried to
//! an air-gapped target.
//!
//! ## Pipeline
//!
//! 1. [`catalog`] loads every definition under a directory and enriches it
//!    with tool names found in its queries.
//! 2. [`registry`] knows where each tool comes from: a system path or a
//!    download URL.
//! 3. [`resolver`] derives the status of a tool (`Available`, `Cached`,
//!    `Missing`, `Unknown`) from the registry and the cache.
//! 4. [`fetcher`] downloads and extracts missing tools with bounded
//!    concurrency.
//! 5. [`validator`] checks definitions for structural problems.
//! 6. [`packager`] writes the package: definitions, bundled tools, runtime
//!    configuration and a deployment entry point.
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use triage_packager::config::PackagerConfig;
//! use triage_packager::operations::Session;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let session = Session::open(Path::new("./definitions"), PackagerConfig::default())?;
//! let selection = session.selection(&[], &[]);
//!
//! let fetcher = session.fetcher()?;
//! let package = session
//!     .build(Some(&fetcher), &selection, Path::new("./package"), true, &CancellationToken::new())
//!     .await?;
//!
//! println!("Bundled {} tools", package.bundled_tools.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`cli`]: Command-line interface definitions and argument parsing
//! - [`operations`]: One entry point per CLI operation
//! - [`models`]: Status, download and package result types
//! - [`config`]: Packager configuration and environment expansion
//! - [`security`]: Path validation and credential scrubbing
//! - [`utils`]: Hashing, file tree and compression helpers
//! - [`constants`]: Application-wide constants

pub mod catalog;
pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod operations;
pub mod packager;
pub mod registry;
pub mod resolver;
pub mod security;
pub mod utils;
pub mod validator;

#[cfg(test)]
mod test_utils;

pub use error::PackagerError;
