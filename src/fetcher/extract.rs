//! Archive extraction for downloaded tools.
//!
//! The strategy is chosen from the download URL's file name. Every entry is
//! joined onto the destination with [`safe_join`], so an archive that tries
//! to write outside it fails as a whole.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use zip::ZipArchive;

use crate::security::{safe_join, sanitize_filename};
use crate::utils::files::set_executable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
    /// Single gzip-compressed file
    Gzip,
    /// Anything else: copied as-is
    Standalone,
}

/// Last path segment of a URL, without query string or fragment.
pub fn url_file_name(url: &str) -> Option<&str> {
    url.split(['?', '#'])
        .next()
        .and_then(|u| u.rsplit('/').next())
        .filter(|s| !s.is_empty())
}

/// Select an extraction strategy from a URL or file name.
pub fn detect_format(url: &str) -> ArchiveFormat {
    let name = url_file_name(url).unwrap_or(url).to_lowercase();

    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        ArchiveFormat::TarGz
    } else if name.ends_with(".tar") {
        ArchiveFormat::Tar
    } else if name.ends_with(".zip") {
        ArchiveFormat::Zip
    } else if name.ends_with(".gz") {
        ArchiveFormat::Gzip
    } else {
        ArchiveFormat::Standalone
    }
}

/// Extract `archive` into `dest_dir` and return the relative paths of the
/// files written. `file_name` names the output for standalone and gzip inputs.
pub fn extract(
    archive: &Path,
    format: ArchiveFormat,
    dest_dir: &Path,
    file_name: &str,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dest_dir)
        .context(format!("Failed to create directory: {}", dest_dir.display()))?;

    let files = match format {
        ArchiveFormat::Zip => extract_zip(archive, dest_dir)?,
        ArchiveFormat::Tar => {
            let file = File::open(archive)?;
            extract_tar(BufReader::new(file), dest_dir)?
        }
        ArchiveFormat::TarGz => {
            let file = File::open(archive)?;
            extract_tar(flate2::read::GzDecoder::new(BufReader::new(file)), dest_dir)?
        }
        ArchiveFormat::Gzip => {
            let stem = file_name
                .strip_suffix(".gz")
                .or_else(|| file_name.strip_suffix(".GZ"))
                .unwrap_or(file_name);
            let target = dest_dir.join(sanitize_filename(stem));

            let mut decoder = flate2::read::GzDecoder::new(BufReader::new(File::open(archive)?));
            let mut out = File::create(&target)?;
            io::copy(&mut decoder, &mut out)
                .context(format!("Failed to decompress {}", archive.display()))?;
            set_executable(&target)?;
            vec![PathBuf::from(sanitize_filename(stem))]
        }
        ArchiveFormat::Standalone => {
            let name = sanitize_filename(file_name);
            let target = dest_dir.join(&name);
            fs::copy(archive, &target)
                .context(format!("Failed to copy {} to {}", archive.display(), target.display()))?;
            set_executable(&target)?;
            vec![PathBuf::from(name)]
        }
    };

    debug!("Extracted {} files from {} ({:?})", files.len(), archive.display(), format);
    Ok(files)
}

fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(BufReader::new(file))
        .map_err(|e| anyhow!("Invalid zip archive: {}", e))?;
    let mut extracted = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| anyhow!("Invalid zip entry {}: {}", i, e))?;

        let relative_path = match entry.enclosed_name() {
            Some(path) => path.to_path_buf(),
            None => bail!("Invalid path in archive: {}", entry.name()),
        };
        let target = safe_join(dest_dir, &relative_path)?;

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut outfile = File::create(&target)
            .context(format!("Failed to create {}", target.display()))?;
        io::copy(&mut entry, &mut outfile)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o777))?;
        }

        extracted.push(relative_path);
    }

    Ok(extracted)
}

/// Lexically resolve a link target against the archive directory holding
/// the link. `None` when the target is absolute or climbs above the root.
fn resolve_link(link_dir: &Path, link_target: &Path) -> Option<PathBuf> {
    let mut resolved = PathBuf::new();
    for component in link_dir.join(link_target).components() {
        match component {
            Component::Normal(name) => resolved.push(name),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if resolved.as_os_str().is_empty() {
        None
    } else {
        Some(resolved)
    }
}

/// Replace each in-tree link with a copy of the file it points at.
///
/// Links may point at other links, so resolution repeats until a pass
/// makes no progress. Whatever is left dangles and is skipped.
fn materialize_links(
    dest_dir: &Path,
    mut pending: Vec<(PathBuf, PathBuf)>,
    extracted: &mut Vec<PathBuf>,
) -> Result<()> {
    pending.retain(|(link, source)| link != source);

    loop {
        let (ready, waiting): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|(_, source)| dest_dir.join(source).is_file());

        if ready.is_empty() {
            for (link, source) in &waiting {
                debug!("Skipping dangling link {} -> {}", link.display(), source.display());
            }
            return Ok(());
        }

        for (link, source) in ready {
            let target = safe_join(dest_dir, &link)?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(dest_dir.join(&source), &target)
                .context(format!("Failed to materialize link {}", link.display()))?;
            extracted.push(link);
        }

        pending = waiting;
    }
}

fn extract_tar<R: Read>(reader: R, dest_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut archive = tar::Archive::new(reader);
    let mut extracted = Vec::new();
    let mut links = Vec::new();

    for entry in archive.entries().context("Invalid tar archive")? {
        let mut entry = entry.context("Invalid tar entry")?;
        let relative_path = entry.path()?.into_owned();
        if relative_path.components().all(|c| matches!(c, Component::CurDir)) {
            continue;
        }
        let target = safe_join(dest_dir, &relative_path)?;

        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if entry_type.is_symlink() || entry_type.is_hard_link() {
            // Symlinks are relative to their directory, hard links to the root
            let link_dir = if entry_type.is_symlink() {
                relative_path.parent().map(Path::to_path_buf).unwrap_or_default()
            } else {
                PathBuf::new()
            };
            match entry.link_name()?.and_then(|l| resolve_link(&link_dir, &l)) {
                Some(source) => links.push((relative_path, source)),
                None => debug!("Skipping link {} that leaves the archive", relative_path.display()),
            }
            continue;
        }
        if !entry_type.is_file() {
            debug!("Skipping non-regular tar entry {}", relative_path.display());
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        entry
            .unpack(&target)
            .context(format!("Failed to unpack {}", relative_path.display()))?;

        extracted.push(relative_path);
    }

    materialize_links(dest_dir, links, &mut extracted)?;
    Ok(extracted)
}
