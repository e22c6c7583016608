//! Tool fetcher: downloads missing tools into the shared cache.
//!
//! Downloads run on a bounded pool of async tasks. Each fetch streams the
//! archive to `<cache>/.downloads`, extracts it on a blocking thread into a
//! fresh directory under `<cache>/.staging`, records an integrity manifest,
//! and only then renames the staging directory into `<cache>/<tool>`. A
//! failure at any step leaves neither the temporary archive nor partial
//! extraction behind.
//!
//! Fetches for the same tool are serialized with a per-name lock, and the
//! cache is re-checked once the lock is held, so a tool is never extracted
//! twice over itself.

pub mod extract;
pub mod manifest;
pub mod transport;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use futures::future;
use log::{debug, info, warn};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::constants::{DEFAULT_DOWNLOAD_TIMEOUT_SECS, DEFAULT_MAX_CONCURRENT_DOWNLOADS};
use crate::error::PackagerError;
use crate::models::{DependencyStatus, DownloadReport, DownloadResult, Status};
use crate::registry::{SourceKind, ToolRecord};
use crate::resolver::DependencyResolver;
use crate::security::{safe_error_message, scrub_url};

use self::extract::{detect_format, extract, url_file_name};
use self::manifest::CacheManifest;
pub use self::transport::{HttpTransport, Transport};

pub struct Fetcher {
    resolver: DependencyResolver,
    transport: Arc<dyn Transport>,
    max_concurrent: usize,
    timeout: Duration,
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Fetcher {
    pub fn new(resolver: DependencyResolver, transport: Arc<dyn Transport>) -> Self {
        Fetcher {
            resolver,
            transport,
            max_concurrent: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Number of downloads allowed in flight at once (at least one).
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Upper bound for a single network transfer.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    /// Run a resolver query on the blocking pool.
    ///
    /// Cache checks re-hash manifest entries, so they stay off the runtime
    /// threads the downloads are polled on.
    async fn check<T, F>(&self, query: F) -> Result<T>
    where
        F: FnOnce(&DependencyResolver) -> T + Send + 'static,
        T: Send + 'static,
    {
        let resolver = self.resolver.clone();
        tokio::task::spawn_blocking(move || query(&resolver))
            .await
            .context("Status check task panicked")
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    /// Download and install one downloadable tool.
    ///
    /// Never returns an error: every failure becomes a `Failed` result.
    pub async fn fetch(&self, record: &ToolRecord) -> DownloadResult {
        let name = record.name.as_str();
        let url = match record.download_url() {
            Some(url) => url,
            None => {
                let owned = record.clone();
                let status = match self.check(move |r| r.status_of(&owned)).await {
                    Ok(status) => status,
                    Err(e) => return DownloadResult::failed(name, format!("{:#}", e)),
                };
                return if status.status == Status::Available {
                    DownloadResult::available(name, status.path)
                } else {
                    DownloadResult::failed(name, "system tool is not present and has no download URL")
                };
            }
        };

        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        // Another task may have finished this tool while we waited
        let owned = name.to_string();
        if self.check(move |r| r.cache().is_populated(&owned)).await.unwrap_or(false) {
            debug!("'{}' already cached", name);
            return DownloadResult::available(name, Some(self.resolver.cache().tool_dir(name)));
        }

        let start = Instant::now();
        info!("Fetching {} from {}", name, scrub_url(url));

        match self.install(name, url).await {
            Ok(path) => {
                info!("Fetched {} in {:?}", name, start.elapsed());
                DownloadResult::downloaded(name, path)
            }
            Err(e) => {
                let err = PackagerError::Fetch {
                    tool: name.to_string(),
                    reason: format!("{:#}", e),
                };
                let message = safe_error_message("Download failed", &err);
                warn!("{}", message);
                DownloadResult::failed(name, message)
            }
        }
    }

    async fn install(&self, name: &str, url: &str) -> Result<PathBuf> {
        let cache = self.resolver.cache();
        let download_path = cache.download_path(name, url);
        let staging_dir = cache.staging_dir(name);

        let result = self.download_and_stage(name, url, &download_path, &staging_dir).await;

        if download_path.exists() {
            if let Err(e) = tokio::fs::remove_file(&download_path).await {
                warn!("Failed to remove temporary file {}: {}", download_path.display(), e);
            }
        }

        let outcome = match result {
            Ok(()) => self.promote(name, &staging_dir).await,
            Err(e) => Err(e),
        };

        if outcome.is_err() && staging_dir.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&staging_dir).await {
                warn!("Failed to remove staging directory {}: {}", staging_dir.display(), e);
            }
        }

        outcome
    }

    async fn download_and_stage(
        &self,
        name: &str,
        url: &str,
        download_path: &Path,
        staging_dir: &Path,
    ) -> Result<()> {
        for dir in [download_path.parent(), staging_dir.parent()].into_iter().flatten() {
            tokio::fs::create_dir_all(dir)
                .await
                .context(format!("Failed to create directory: {}", dir.display()))?;
        }

        let bytes = tokio::time::timeout(self.timeout, self.transport.download(url, download_path))
            .await
            .map_err(|_| anyhow!("timed out after {}s", self.timeout.as_secs_f32()))??;
        debug!("Downloaded {} bytes for {}", bytes, name);

        let format = detect_format(url);
        let file_name = url_file_name(url).unwrap_or(name).to_string();
        let archive = download_path.to_path_buf();
        let staging = staging_dir.to_path_buf();
        let tool = name.to_string();
        let source_url = url.to_string();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let files = extract(&archive, format, &staging, &file_name)?;
            if files.is_empty() {
                return Err(anyhow!("archive contained no files"));
            }
            CacheManifest::build(&tool, &source_url, &staging)?.write(&staging)
        })
        .await
        .context("Extraction task panicked")??;

        Ok(())
    }

    /// Move a finished staging directory into its cache slot.
    async fn promote(&self, name: &str, staging_dir: &Path) -> Result<PathBuf> {
        let target = self.resolver.cache().tool_dir(name);

        // Anything already here failed verification or is empty
        if target.exists() {
            debug!("Replacing stale cache entry {}", target.display());
            tokio::fs::remove_dir_all(&target)
                .await
                .context(format!("Failed to remove stale cache entry {}", target.display()))?;
        }

        tokio::fs::rename(staging_dir, &target)
            .await
            .context(format!("Failed to move {} into the cache", staging_dir.display()))?;
        Ok(target)
    }

    /// Resolve and, where needed, download every named tool.
    ///
    /// Results are returned in input order with duplicates removed. The
    /// cancellation token is checked before each download starts; a
    /// download already in progress runs to completion.
    pub async fn fetch_all(&self, names: &[String], cancel: &CancellationToken) -> DownloadReport {
        let names = dedup(names);
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        info!("Resolving {} tools ({} concurrent downloads)", names.len(), self.max_concurrent);

        let futures = names.iter().map(|name| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let owned = name.clone();
                let status = match self.check(move |r| r.status(&owned)).await {
                    Ok(status) => status,
                    Err(e) => return DownloadResult::failed(name, format!("{:#}", e)),
                };
                let record = match status.status {
                    Status::Available | Status::Cached => {
                        return DownloadResult::available(name, status.path);
                    }
                    Status::Unknown => {
                        return DownloadResult::failed(name, PackagerError::Resolution(name.clone()).to_string());
                    }
                    Status::Missing => match self.resolver.registry().resolve(name) {
                        Some(record) if record.source_kind() == SourceKind::Downloadable => record,
                        _ => {
                            return DownloadResult::failed(
                                name,
                                "system tool is not present on this host and cannot be downloaded",
                            );
                        }
                    },
                };

                let _permit = tokio::select! {
                    permit = semaphore.acquire() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return DownloadResult::failed(name, "download pool closed"),
                    },
                    _ = cancel.cancelled() => return DownloadResult::failed(name, "cancelled"),
                };

                if cancel.is_cancelled() {
                    return DownloadResult::failed(name, "cancelled");
                }

                self.fetch(record).await
            }
        });

        let report = DownloadReport {
            results: future::join_all(futures).await,
        };

        info!(
            "Download finished: {} succeeded, {} failed",
            report.succeeded_count(),
            report.failed_count()
        );
        report
    }

    /// Network-free preview of what `fetch_all` would do.
    pub fn plan(&self, names: &[String]) -> Vec<DependencyStatus> {
        let names = dedup(names);
        self.resolver.statuses(names.iter().map(String::as_str))
    }
}

fn dedup(names: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    names
        .iter()
        .filter(|n| seen.insert(n.as_str()))
        .cloned()
        .collect()
}
