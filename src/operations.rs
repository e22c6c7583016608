//! High-level operations behind each CLI command.
//!
//! A [`Session`] ties the loaded catalog, the tool registry and the cache
//! together. The CLI opens one session per invocation and calls a single
//! operation on it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::catalog::Catalog;
use crate::config::PackagerConfig;
use crate::constants::RETRY_MAX_DELAY_SECS;
use crate::error::PackagerError;
use crate::fetcher::manifest::ToolCache;
use crate::fetcher::{Fetcher, HttpTransport, Transport};
use crate::models::{DependencyStatus, DownloadReport, OfflinePackage, Status, ValidationResult};
use crate::packager::{archive_path_for, verify_package, Packager};
use crate::registry::{SourceKind, ToolRegistry};
use crate::resolver::DependencyResolver;
use crate::utils::compress::archive_directory;
use crate::validator;

/// One row of the `list` output.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionSummary {
    pub name: String,
    pub collection_type: String,
    pub description: String,
    pub file_path: PathBuf,
    pub dependencies: Vec<DependencyStatus>,
}

/// Result of the `download` operation.
#[derive(Debug, Clone)]
pub enum DownloadOutcome {
    /// Dry run: what would be fetched
    Plan(Vec<DependencyStatus>),
    Report(DownloadReport),
}

pub struct Session {
    config: PackagerConfig,
    catalog: Arc<Catalog>,
    resolver: DependencyResolver,
}

impl Session {
    /// Load and enrich the catalog and build the registry and cache view.
    pub fn open(collections_path: &Path, config: PackagerConfig) -> Result<Self, PackagerError> {
        let catalog = Catalog::load_enriched(collections_path)?;
        let registry = ToolRegistry::load(config.tools_file.as_deref())?;
        info!(
            "Registry holds {} tools; cache at {}",
            registry.len(),
            config.cache_dir.display()
        );

        let resolver = DependencyResolver::new(Arc::new(registry), ToolCache::new(&config.cache_dir));
        Ok(Session {
            config,
            catalog: Arc::new(catalog),
            resolver,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    pub fn config(&self) -> &PackagerConfig {
        &self.config
    }

    pub fn selection(&self, include: &[String], exclude: &[String]) -> Vec<String> {
        self.catalog.select(include, exclude)
    }

    /// Distinct tool dependencies of the selected collections, in order.
    pub fn dependencies_of(&self, selection: &[String]) -> Vec<String> {
        let mut tools: Vec<String> = Vec::new();
        for name in selection {
            if let Some(definition) = self.catalog.get(name) {
                for dependency in &definition.dependencies {
                    if !tools.contains(dependency) {
                        tools.push(dependency.clone());
                    }
                }
            }
        }
        tools
    }

    pub fn list(&self, selection: &[String]) -> Vec<CollectionSummary> {
        selection
            .iter()
            .filter_map(|name| self.catalog.get(name).map(|def| (name, def)))
            .map(|(name, def)| CollectionSummary {
                name: name.clone(),
                collection_type: def.collection_type.clone(),
                description: def.description.clone(),
                file_path: def.file_path.clone(),
                dependencies: self
                    .resolver
                    .statuses(def.dependencies.iter().map(String::as_str)),
            })
            .collect()
    }

    /// Fetcher over HTTP(S) configured from the session settings.
    pub fn fetcher(&self) -> anyhow::Result<Fetcher> {
        let transport = HttpTransport::new(&self.config.user_agent)?;
        Ok(self.fetcher_with(Arc::new(transport)))
    }

    pub fn fetcher_with(&self, transport: Arc<dyn Transport>) -> Fetcher {
        Fetcher::new(self.resolver.clone(), transport)
            .with_max_concurrent(self.config.max_concurrent_downloads)
            .with_timeout(Duration::from_secs(self.config.download_timeout_secs))
    }

    /// Fetch every missing dependency of `selection`, or only report what
    /// would be fetched when `validate_only` is set.
    pub async fn download(
        &self,
        fetcher: &Fetcher,
        selection: &[String],
        validate_only: bool,
        cancel: &CancellationToken,
    ) -> DownloadOutcome {
        let tools = self.dependencies_of(selection);

        if validate_only {
            info!("Dry run: planning {} tools without network access", tools.len());
            return DownloadOutcome::Plan(fetcher.plan(&tools));
        }

        DownloadOutcome::Report(
            download_with_retry(
                fetcher,
                &tools,
                self.config.download_retries,
                Duration::from_millis(self.config.retry_delay_ms),
                cancel,
            )
            .await,
        )
    }

    /// Validate each selected collection. Unknown names are invalid.
    pub fn validate(&self, selection: &[String]) -> Vec<(String, ValidationResult)> {
        selection
            .iter()
            .map(|name| {
                let result = match self.catalog.get(name) {
                    Some(definition) => validator::validate(definition, &self.resolver),
                    None => ValidationResult {
                        valid: false,
                        errors: vec![format!("Collection '{}' not found in catalog", name)],
                        warnings: Vec::new(),
                    },
                };
                (name.clone(), result)
            })
            .collect()
    }

    /// Build a package. When bundling and a fetcher is supplied, missing
    /// tools are downloaded first so they can be bundled.
    pub async fn build(
        &self,
        fetcher: Option<&Fetcher>,
        selection: &[String],
        output: &Path,
        bundle_tools: bool,
        cancel: &CancellationToken,
    ) -> Result<OfflinePackage, PackagerError> {
        let mut pre_warnings = Vec::new();

        if bundle_tools {
            if let Some(fetcher) = fetcher {
                let tools = self.dependencies_of(selection);
                let report = download_with_retry(
                    fetcher,
                    &tools,
                    self.config.download_retries,
                    Duration::from_millis(self.config.retry_delay_ms),
                    cancel,
                )
                .await;

                for result in report.results.iter().filter(|r| r.is_failed()) {
                    pre_warnings.push(format!("Tool '{}' not fetched: {}", result.name, result.message));
                }
            }
        }

        let packager = Packager::new(Arc::clone(&self.catalog), self.resolver.clone())
            .with_target_os(&self.config.target_os);
        let selection = selection.to_vec();
        let output_path = output.to_path_buf();

        let mut package = tokio::task::spawn_blocking(move || {
            packager.build(&selection, &output_path, bundle_tools)
        })
        .await
        .map_err(|e| PackagerError::packaging(output, e))??;

        if !pre_warnings.is_empty() {
            pre_warnings.append(&mut package.warnings);
            package.warnings = pre_warnings;
        }
        Ok(package)
    }

    /// Build a package and archive it next to the output directory.
    pub async fn package(
        &self,
        fetcher: Option<&Fetcher>,
        selection: &[String],
        output: &Path,
        bundle_tools: bool,
        cancel: &CancellationToken,
    ) -> Result<(OfflinePackage, PathBuf), PackagerError> {
        let package = self.build(fetcher, selection, output, bundle_tools, cancel).await?;

        let root = package.path.clone();
        let zip_path = archive_path_for(&root);
        let zip_target = zip_path.clone();

        tokio::task::spawn_blocking(move || archive_directory(&root, &zip_target))
            .await
            .map_err(|e| PackagerError::packaging(&zip_path, e))?
            .map_err(|e| PackagerError::packaging(&zip_path, format!("{:#}", e)))?;

        Ok((package, zip_path))
    }
}

/// Verify a built package in place before handing it to the engine.
pub fn deploy(output: &Path) -> ValidationResult {
    let result = verify_package(output);
    if result.valid {
        info!("Package at {} is ready to deploy", output.display());
    } else {
        for error in &result.errors {
            warn!("{}", error);
        }
    }
    result
}

fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor)
        .min(Duration::from_secs(RETRY_MAX_DELAY_SECS))
}

/// Run `fetch_all`, then re-attempt failed downloadable tools with
/// exponential back-off. Results keep the order of the first attempt.
pub async fn download_with_retry(
    fetcher: &Fetcher,
    names: &[String],
    retries: usize,
    base_delay: Duration,
    cancel: &CancellationToken,
) -> DownloadReport {
    let mut report = fetcher.fetch_all(names, cancel).await;

    for attempt in 1..=retries as u32 {
        let retryable: Vec<String> = report
            .results
            .iter()
            .filter(|r| r.is_failed())
            .filter(|r| {
                let status = fetcher.resolver().status(&r.name);
                status.status == Status::Missing && status.source == Some(SourceKind::Downloadable)
            })
            .map(|r| r.name.clone())
            .collect();

        if retryable.is_empty() || cancel.is_cancelled() {
            break;
        }

        let delay = retry_delay(base_delay, attempt);
        warn!(
            "Retrying {} failed downloads in {:?} (attempt {}/{})",
            retryable.len(),
            delay,
            attempt,
            retries
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => break,
        }

        let retried: BTreeMap<String, _> = fetcher
            .fetch_all(&retryable, cancel)
            .await
            .results
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect();

        for result in report.results.iter_mut() {
            if let Some(updated) = retried.get(&result.name) {
                *result = updated.clone();
            }
        }
    }

    report
}
