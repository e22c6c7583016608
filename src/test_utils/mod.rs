//! Test utilities for triage-packager
//!
//! This module provides common testing utilities, helpers, and fixtures
//! for use across all test modules.

#![cfg(test)]

use anyhow::Result;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::registry::{Platform, ToolRecord, ToolRegistry};

/// Creates a temporary directory that is automatically cleaned up
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Creates a test file structure in a temporary directory
pub fn create_test_file_structure() -> Result<TempDir> {
    let temp_dir = create_temp_dir()?;
    let base_path = temp_dir.path();

    fs::create_dir_all(base_path.join("dir1/subdir1"))?;
    fs::create_dir_all(base_path.join("dir2"))?;

    fs::write(base_path.join("file1.txt"), b"Test content 1")?;
    fs::write(base_path.join("file2.log"), b"Test log content")?;
    fs::write(base_path.join("dir1/file3.txt"), b"Test content 3")?;
    fs::write(base_path.join("dir1/subdir1/file4.txt"), b"Test content 4")?;
    fs::write(base_path.join("dir2/file5.log"), b"Another log file")?;

    Ok(temp_dir)
}

/// Render a minimal collection definition with a single source
pub fn definition_yaml(name: &str, query: &str) -> String {
    let mut yaml = format!("name: {}\ntype: CLIENT\nsources:\n  - query: |\n", name);
    for line in query.lines() {
        yaml.push_str("      ");
        yaml.push_str(line);
        yaml.push('\n');
    }
    yaml
}

/// Write a collection definition under `dir`, creating parent directories
pub fn write_definition(dir: &Path, rel_path: &str, name: &str, query: &str) -> PathBuf {
    let path = dir.join(rel_path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, definition_yaml(name, query)).unwrap();
    path
}

/// Build an in-memory ZIP archive from `(name, content)` pairs
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer
            .start_file(*name, zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Build an in-memory gzip-compressed tarball from `(name, content)` pairs
pub fn tar_gz_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, name, *content).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Registry with one tool of each source kind plus a Windows-only download
pub fn test_registry(system_path: &Path) -> ToolRegistry {
    ToolRegistry::from_records(vec![
        ToolRecord::system("lsof", Platform::Linux, &system_path.to_string_lossy(), "", ""),
        ToolRecord::download("yara", Platform::Windows, "https://example.test/yara.zip", "BSD-3-Clause", ""),
        ToolRecord::download("avml", Platform::Linux, "https://example.test/avml", "MIT", ""),
    ])
}
