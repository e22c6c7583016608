use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::catalog::definition::CollectionDefinition;
use crate::catalog::extractor;
use crate::constants::DEFINITION_EXTENSIONS;
use crate::error::PackagerError;

/// In-memory index of collection definitions keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    root: PathBuf,
    definitions: BTreeMap<String, CollectionDefinition>,
    /// Skipped files, duplicate names and nameless definitions
    pub warnings: Vec<String>,
}

fn is_definition_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| DEFINITION_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

impl Catalog {
    /// Recursively load every definition file under `dir`.
    ///
    /// Files are visited in sorted path order. A file that fails to parse is
    /// skipped with a warning; a later definition reusing a name replaces the
    /// earlier one. Fails only when `dir` itself is missing or unreadable.
    pub fn load(dir: &Path) -> Result<Self, PackagerError> {
        if !dir.is_dir() {
            return Err(PackagerError::catalog(dir, "directory does not exist"));
        }
        std::fs::read_dir(dir).map_err(|e| PackagerError::catalog(dir, e))?;

        let mut catalog = Catalog {
            root: dir.to_path_buf(),
            ..Default::default()
        };

        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    catalog.warn(format!("Skipping unreadable entry under {}: {}", dir.display(), e));
                    continue;
                }
            };

            let path = entry.path();
            if !entry.file_type().is_file() || !is_definition_file(path) {
                continue;
            }

            match CollectionDefinition::from_file(path) {
                Ok(definition) => catalog.insert(definition),
                Err(e) => catalog.warn(format!("Skipping {}: {}", path.display(), e)),
            }
        }

        info!("Loaded {} collection definitions from {}", catalog.len(), dir.display());
        Ok(catalog)
    }

    /// Load and run the dependency extractor over every definition.
    pub fn load_enriched(dir: &Path) -> Result<Self, PackagerError> {
        let mut catalog = Self::load(dir)?;
        catalog.enrich_dependencies();
        Ok(catalog)
    }

    /// Run the extractor over every definition in place.
    pub fn enrich_dependencies(&mut self) -> usize {
        let mut added = 0;
        for definition in self.definitions.values_mut() {
            let count = extractor::enrich(definition);
            if count > 0 {
                debug!("Discovered {} tool dependencies in {}", count, definition.name);
            }
            added += count;
        }
        added
    }

    /// Insert a definition, replacing any earlier one of the same name.
    pub fn insert(&mut self, definition: CollectionDefinition) {
        let key = if definition.name.is_empty() {
            let stem = definition.file_path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "unnamed".to_string());
            self.warn(format!("Definition {} has no name; indexed as '{}'", definition.file_path.display(), stem));
            stem
        } else {
            definition.name.clone()
        };

        let duplicate = self.definitions.get(&key).map(|previous| {
            format!(
                "Duplicate collection '{}': {} replaces {}",
                key,
                definition.file_path.display(),
                previous.file_path.display()
            )
        });
        if let Some(message) = duplicate {
            self.warn(message);
        }

        self.definitions.insert(key, definition);
    }

    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, name: &str) -> Option<&CollectionDefinition> {
        self.definitions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Definitions sorted by index key.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &CollectionDefinition)> {
        self.definitions.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.definitions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Resolve an include/exclude filter to index keys.
    ///
    /// An empty `include` selects every collection. Included names missing
    /// from the catalog are kept so downstream stages can report them.
    pub fn select(&self, include: &[String], exclude: &[String]) -> Vec<String> {
        let base: Vec<String> = if include.is_empty() {
            self.names()
        } else {
            include.to_vec()
        };

        let mut selected: Vec<String> = Vec::new();
        for name in base {
            if !exclude.contains(&name) && !selected.contains(&name) {
                selected.push(name);
            }
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::write_definition;
    use tempfile::TempDir;

    #[test]
    fn test_missing_directory_is_catalog_error() {
        let result = Catalog::load(Path::new("/nonexistent/collections"));
        assert!(matches!(result, Err(PackagerError::Catalog { .. })));
    }

    #[test]
    fn test_malformed_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        write_definition(dir.path(), "a.yaml", "Linux.A", "SELECT * FROM info()");
        write_definition(dir.path(), "nested/b.yml", "Linux.B", "SELECT * FROM info()");
        write_definition(dir.path(), "c.yaml", "Linux.C", "SELECT * FROM info()");
        std::fs::write(dir.path().join("broken.yaml"), "name: [unclosed\nsources: {").unwrap();
        std::fs::write(dir.path().join("README.md"), "not a definition").unwrap();

        let catalog = Catalog::load(dir.path()).unwrap();

        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.warnings.len(), 1);
        assert!(catalog.warnings[0].contains("broken.yaml"));
    }

    #[test]
    fn test_duplicate_names_last_loaded_wins() {
        let dir = TempDir::new().unwrap();
        write_definition(dir.path(), "a_first.yaml", "Shared.Name", "SELECT 1 FROM info()");
        write_definition(dir.path(), "b_second.yaml", "Shared.Name", "SELECT 2 FROM info()");

        for _ in 0..3 {
            let catalog = Catalog::load(dir.path()).unwrap();
            assert_eq!(catalog.len(), 1);
            let def = catalog.get("Shared.Name").unwrap();
            assert!(def.file_path.ends_with("b_second.yaml"));
            assert!(catalog.warnings.iter().any(|w| w.contains("Duplicate")));
        }
    }

    #[test]
    fn test_nameless_definition_indexed_by_stem() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("orphan.yaml"), "description: no name here\n").unwrap();

        let catalog = Catalog::load(dir.path()).unwrap();
        assert!(catalog.contains("orphan"));
        assert!(catalog.get("orphan").unwrap().name.is_empty());
    }

    #[test]
    fn test_load_enriched_discovers_tools() {
        let dir = TempDir::new().unwrap();
        write_definition(dir.path(), "a.yaml", "Windows.Autoruns", r#"SELECT * FROM execve(argv=["autorunsc.exe"])"#);

        let catalog = Catalog::load_enriched(dir.path()).unwrap();
        assert_eq!(catalog.get("Windows.Autoruns").unwrap().dependencies, vec!["autorunsc"]);
    }

    #[test]
    fn test_select_include_exclude() {
        let dir = TempDir::new().unwrap();
        write_definition(dir.path(), "a.yaml", "A", "SELECT * FROM info()");
        write_definition(dir.path(), "b.yaml", "B", "SELECT * FROM info()");
        write_definition(dir.path(), "c.yaml", "C", "SELECT * FROM info()");
        let catalog = Catalog::load(dir.path()).unwrap();

        assert_eq!(catalog.select(&[], &["B".to_string()]), vec!["A", "C"]);
        assert_eq!(
            catalog.select(&["C".to_string(), "Nope".to_string(), "C".to_string()], &[]),
            vec!["C", "Nope"]
        );
    }
}
