//! Dependency resolution: classify a tool name as Available, Cached,
//! Missing or Unknown from the registry and the filesystem alone.

use std::fs;
use std::sync::Arc;

use log::debug;

use crate::fetcher::manifest::ToolCache;
use crate::models::{DependencyStatus, Status};
use crate::registry::{ToolRecord, ToolRegistry, ToolSource};
use crate::utils::files::tree_size;

/// Read-only view over a registry and a cache root.
///
/// Holds no mutable state, so a single resolver can be shared between
/// concurrent fetch tasks.
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    registry: Arc<ToolRegistry>,
    cache: ToolCache,
}

impl DependencyResolver {
    pub fn new(registry: Arc<ToolRegistry>, cache: ToolCache) -> Self {
        DependencyResolver { registry, cache }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ToolCache {
        &self.cache
    }

    /// Current status of `name`.
    pub fn status(&self, name: &str) -> DependencyStatus {
        match self.registry.resolve(name) {
            Some(record) => self.status_of(record),
            None => {
                debug!("Tool '{}' has no registry entry", name);
                DependencyStatus::unknown(name)
            }
        }
    }

    /// Status of a record that is already known to the registry.
    pub fn status_of(&self, record: &ToolRecord) -> DependencyStatus {
        let mut status = DependencyStatus {
            name: record.name.clone(),
            status: Status::Missing,
            source: Some(record.source_kind()),
            path: None,
            download_url: record.download_url().map(str::to_string),
            size_bytes: 0,
        };

        match &record.source {
            ToolSource::SystemPath { path } => {
                if let Ok(metadata) = fs::metadata(path) {
                    status.status = Status::Available;
                    status.path = Some(path.clone());
                    status.size_bytes = if metadata.is_dir() { tree_size(path) } else { metadata.len() };
                }
            }
            ToolSource::Downloadable { .. } => {
                if self.cache.is_populated(&record.name) {
                    let dir = self.cache.tool_dir(&record.name);
                    status.status = Status::Cached;
                    status.size_bytes = tree_size(&dir);
                    status.path = Some(dir);
                }
            }
        }

        status
    }

    /// Statuses for several names, in input order.
    pub fn statuses<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<DependencyStatus> {
        names.into_iter().map(|n| self.status(n)).collect()
    }
}
