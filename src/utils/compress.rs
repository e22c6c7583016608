use std::fs;
use std::io::{Read, Write, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use log::{info, debug, warn};
use zip::{write::FileOptions, ZipWriter};
use crossbeam::channel::{bounded, Sender, Receiver};

use crate::constants::{
    COMPRESSION_CHUNK_SIZE as CHUNK_SIZE,
    LARGE_FILE_COMPRESSION_THRESHOLD,
    COMPRESSED_EXTENSIONS
};
use crate::utils::files::to_portable;

/// File entry with its compression options
struct FileEntry {
    rel_path: String,
    abs_path: PathBuf,
    options: FileOptions,
}

/// Determine compression options based on file type and size.
///
/// Files that are already compressed or very large use the fastest level.
/// Executables keep their permission bits so bundled tools stay runnable.
pub fn get_compression_options(path: &Path) -> FileOptions {
    let low_compression = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => COMPRESSED_EXTENSIONS.contains(&ext.to_lowercase().as_str()),
        _ => false,
    };

    let metadata = fs::metadata(path).ok();
    let large_file = metadata
        .as_ref()
        .map(|m| m.len() > LARGE_FILE_COMPRESSION_THRESHOLD)
        .unwrap_or(false);

    #[cfg(unix)]
    let permissions = {
        use std::os::unix::fs::PermissionsExt;
        metadata.map(|m| m.permissions().mode() & 0o777).unwrap_or(0o644)
    };
    #[cfg(not(unix))]
    let permissions = 0o644;

    let level = if low_compression || large_file { 1 } else { 6 };

    FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .compression_level(Some(level))
        .unix_permissions(permissions)
}

/// Worker function for compression threads
fn compression_worker(
    receiver: Receiver<Option<FileEntry>>,
    zip: Arc<Mutex<ZipWriter<fs::File>>>,
) -> Result<()> {
    let mut buffer = vec![0u8; CHUNK_SIZE];

    while let Ok(entry_opt) = receiver.recv() {
        let entry = match entry_opt {
            Some(entry) => entry,
            None => break,
        };

        let start = Instant::now();

        let file = fs::File::open(&entry.abs_path)
            .context(format!("Failed to open {}", entry.abs_path.display()))?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        // Lock only while writing this entry
        {
            let mut zip = zip.lock()
                .map_err(|_| anyhow!("Archive writer lock poisoned"))?;

            zip.start_file(entry.rel_path.clone(), entry.options)
                .context(format!("Failed to start file entry for {}", entry.rel_path))?;

            loop {
                let bytes_read = reader.read(&mut buffer)
                    .context(format!("Failed to read from {}", entry.abs_path.display()))?;

                if bytes_read == 0 {
                    break;
                }

                zip.write_all(&buffer[..bytes_read])
                    .context(format!("Failed to write to zip for {}", entry.rel_path))?;
            }
        }

        debug!("Compressed {} ({} bytes) in {:?}",
               entry.rel_path, file_size, start.elapsed());
    }

    Ok(())
}

/// Compress a directory tree into a ZIP archive with multithreading.
///
/// Paths inside the archive are relative to `source_dir` and use forward
/// slashes. Returns the path of the written archive.
///
/// # Example
///
/// ```no_run
/// # use std::path::Path;
/// # use triage_packager::utils::compress::archive_directory;
/// let zip_path = archive_directory(
///     Path::new("/tmp/offline-package"),
///     Path::new("/tmp/offline-package.zip"),
/// )?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn archive_directory(source_dir: &Path, zip_path: &Path) -> Result<PathBuf> {
    let start = Instant::now();
    info!("Archiving {} with multithreading...", source_dir.display());

    if zip_path.starts_with(source_dir) {
        return Err(anyhow!("Archive {} cannot be written inside the directory it archives", zip_path.display()));
    }

    if let Some(parent) = zip_path.parent() {
        fs::create_dir_all(parent)
            .context(format!("Failed to create directory: {}", parent.display()))?;
    }

    let zip_file = fs::File::create(zip_path)
        .context("Failed to create zip file")?;

    let zip = Arc::new(Mutex::new(ZipWriter::new(zip_file)));

    let (sender, receiver) = bounded::<Option<FileEntry>>(1000);

    // 1 thread per CPU core, max 8
    let thread_count = std::cmp::min(num_cpus::get(), 8);

    let mut workers = Vec::with_capacity(thread_count);
    for i in 0..thread_count {
        let worker_receiver = receiver.clone();
        let worker_zip = Arc::clone(&zip);

        let handle = std::thread::Builder::new()
            .name(format!("compression-{}", i))
            .spawn(move || compression_worker(worker_receiver, worker_zip))
            .context("Failed to spawn compression worker")?;
        workers.push(handle);
    }
    // Sends fail instead of blocking once every worker has exited
    drop(receiver);

    let mut dirs = Vec::new();
    let scan_result = scan_directory(source_dir, source_dir, &mut dirs, &sender);

    // Signal end of work to all workers, even if the scan failed
    for _ in 0..thread_count {
        if sender.send(None).is_err() {
            break;
        }
    }

    let mut worker_error = None;
    for (i, worker) in workers.into_iter().enumerate() {
        match worker.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Error in compression worker {}: {}", i, e);
                worker_error.get_or_insert(e);
            }
            Err(_) => {
                worker_error.get_or_insert(anyhow!("Compression worker {} panicked", i));
            }
        }
    }

    scan_result?;
    if let Some(e) = worker_error {
        return Err(e);
    }

    {
        let mut zip = Arc::try_unwrap(zip)
            .map_err(|_| anyhow!("Failed to unwrap Arc"))?
            .into_inner()
            .map_err(|_| anyhow!("Archive writer lock poisoned"))?;

        for dir in dirs {
            zip.add_directory(dir, FileOptions::default())?;
        }

        zip.finish().context("Failed to finalize zip file")?;
    }

    info!("Archived {} to {} in {:?}", source_dir.display(), zip_path.display(), start.elapsed());
    Ok(zip_path.to_path_buf())
}

/// Scan directory and queue files for compression
fn scan_directory(
    base_path: &Path,
    dir_path: &Path,
    dirs: &mut Vec<String>,
    sender: &Sender<Option<FileEntry>>,
) -> Result<()> {
    let mut entries = fs::read_dir(dir_path)
        .context(format!("Failed to read directory {}", dir_path.display()))?
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();

        let rel_path = to_portable(path.strip_prefix(base_path).unwrap_or(&path));

        if path.is_dir() {
            dirs.push(format!("{}/", rel_path));
            scan_directory(base_path, &path, dirs, sender)?;
        } else {
            let options = get_compression_options(&path);
            sender.send(Some(FileEntry {
                rel_path,
                abs_path: path.clone(),
                options,
            })).map_err(|_| anyhow!("Compression workers stopped early"))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_file_structure;
    use tempfile::TempDir;
    use zip::read::ZipArchive;

    fn archive_names(zip_path: &Path) -> Vec<String> {
        let file = fs::File::open(zip_path).unwrap();
        let mut archive = ZipArchive::new(file).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn test_archive_directory_contains_all_files() {
        let source = create_test_file_structure().unwrap();
        let out = TempDir::new().unwrap();
        let zip_path = out.path().join("package.zip");

        let result = archive_directory(source.path(), &zip_path).unwrap();
        assert_eq!(result, zip_path);

        let names = archive_names(&zip_path);
        for expected in ["file1.txt", "file2.log", "dir1/file3.txt", "dir1/subdir1/file4.txt", "dir2/file5.log"] {
            assert!(names.iter().any(|n| n == expected), "Expected {} in archive", expected);
        }
        assert!(names.iter().any(|n| n == "dir1/subdir1/"));
    }

    #[test]
    fn test_archive_content_round_trip() {
        let source = create_test_file_structure().unwrap();
        let out = TempDir::new().unwrap();
        let zip_path = out.path().join("package.zip");
        archive_directory(source.path(), &zip_path).unwrap();

        let mut archive = ZipArchive::new(fs::File::open(&zip_path).unwrap()).unwrap();
        let mut content = String::new();
        archive.by_name("dir2/file5.log").unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "Another log file");
    }

    #[test]
    fn test_archive_empty_directory() {
        let source = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let zip_path = out.path().join("empty.zip");

        archive_directory(source.path(), &zip_path).unwrap();
        assert!(archive_names(&zip_path).is_empty());
    }

    #[test]
    fn test_archive_inside_source_rejected() {
        let source = create_test_file_structure().unwrap();
        let zip_path = source.path().join("self.zip");
        assert!(archive_directory(source.path(), &zip_path).is_err());
    }

    #[test]
    fn test_missing_source_is_error() {
        let out = TempDir::new().unwrap();
        let result = archive_directory(Path::new("/nonexistent/source"), &out.path().join("x.zip"));
        assert!(result.is_err());
    }
}
