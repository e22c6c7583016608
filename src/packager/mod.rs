//! Offline package assembly.
//!
//! A package is a directory tree:
//!
//! ```text
//! <output>/
//!   collections/             copied definition files
//!   tools/<name>/...         bundled tools (only when bundling)
//!   config/runtime_config.json
//!   deploy.sh | deploy.ps1
//! ```
//!
//! Only failures to prepare the directory tree abort a build. Everything
//! after that is best effort: problems are collected as warnings on the
//! returned [`OfflinePackage`].

pub mod deploy;
pub mod runtime_config;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};

use crate::catalog::Catalog;
use crate::constants::{PACKAGE_COLLECTIONS_DIR, PACKAGE_CONFIG_DIR, PACKAGE_TOOLS_DIR};
use crate::error::PackagerError;
use crate::models::{DependencyStatus, OfflinePackage, Status, ValidationResult};
use crate::resolver::DependencyResolver;
use crate::security::{sanitize_filename, validate_output_path};
use crate::utils::files::{copy_tree, to_portable, tree_size, unique_destination};

use self::deploy::{deploy_script_name, generate_deploy_script};
use self::runtime_config::RuntimeConfig;

#[derive(Debug, Clone)]
pub struct Packager {
    catalog: Arc<Catalog>,
    resolver: DependencyResolver,
    target_os: String,
}

impl Packager {
    pub fn new(catalog: Arc<Catalog>, resolver: DependencyResolver) -> Self {
        Packager {
            catalog,
            resolver,
            target_os: std::env::consts::OS.to_string(),
        }
    }

    /// OS the deployment entry point is generated for.
    pub fn with_target_os(mut self, target_os: &str) -> Self {
        self.target_os = target_os.to_lowercase();
        self
    }

    /// Build an offline package for `selection` at `output`.
    ///
    /// An existing package at `output` is replaced. Any other non-empty
    /// directory is refused.
    pub fn build(
        &self,
        selection: &[String],
        output: &Path,
        bundle_tools: bool,
    ) -> Result<OfflinePackage, PackagerError> {
        let start = Instant::now();
        info!("Building offline package at {}", output.display());

        prepare_output(output, bundle_tools)?;

        let mut package = OfflinePackage {
            path: output.to_path_buf(),
            included_collections: BTreeSet::new(),
            bundled_tools: BTreeSet::new(),
            size_bytes: 0,
            success: true,
            warnings: Vec::new(),
        };
        let mut runtime = RuntimeConfig::new(&self.target_os);

        self.copy_collections(selection, output, &mut package, &mut runtime);

        if bundle_tools {
            runtime.tools_path = Some(PACKAGE_TOOLS_DIR.to_string());
            self.bundle_tools(output, &mut package, &mut runtime);
        }

        runtime.collections = package.included_collections.iter().cloned().collect();

        if let Err(e) = runtime.write(output) {
            record(&mut package.warnings, format!("Runtime configuration not written: {:#}", e));
        }

        if let Err(e) = generate_deploy_script(output, &runtime) {
            record(&mut package.warnings, format!("Deploy script not generated: {:#}", e));
        }

        package.size_bytes = tree_size(output);

        info!(
            "Package built in {:?}: {} collections, {} tools, {} bytes, {} warnings",
            start.elapsed(),
            package.included_collections.len(),
            package.bundled_tools.len(),
            package.size_bytes,
            package.warnings.len()
        );
        Ok(package)
    }

    fn copy_collections(
        &self,
        selection: &[String],
        output: &Path,
        package: &mut OfflinePackage,
        runtime: &mut RuntimeConfig,
    ) {
        let collections_dir = output.join(PACKAGE_COLLECTIONS_DIR);
        let mut seen = BTreeSet::new();

        for name in selection {
            if !seen.insert(name.as_str()) {
                continue;
            }

            let definition = match self.catalog.get(name) {
                Some(definition) => definition,
                None => {
                    record(&mut package.warnings, format!("Collection '{}' not found in catalog; skipped", name));
                    continue;
                }
            };

            let file_name = definition
                .file_path
                .file_name()
                .map(|f| sanitize_filename(&f.to_string_lossy()))
                .unwrap_or_else(|| format!("{}.yaml", sanitize_filename(name)));
            let dest = unique_destination(&collections_dir.join(file_name));

            match fs::copy(&definition.file_path, &dest) {
                Ok(_) => {
                    debug!("Copied {} to {}", definition.file_path.display(), dest.display());
                    let rel = dest.strip_prefix(output).unwrap_or(&dest);
                    runtime.collection_files.insert(name.clone(), to_portable(rel));
                    package.included_collections.insert(name.clone());
                }
                Err(e) => {
                    package.success = false;
                    record(
                        &mut package.warnings,
                        format!("Failed to copy collection '{}' from {}: {}", name, definition.file_path.display(), e),
                    );
                }
            }
        }
    }

    /// Distinct dependencies of the included collections, keyed by
    /// registry name so case variants collapse to one entry.
    fn required_tools(&self, package: &OfflinePackage) -> BTreeMap<String, DependencyStatus> {
        let mut tools = BTreeMap::new();
        for name in &package.included_collections {
            if let Some(definition) = self.catalog.get(name) {
                for dependency in &definition.dependencies {
                    let status = self.resolver.status(dependency);
                    tools.entry(status.name.clone()).or_insert(status);
                }
            }
        }
        tools
    }

    fn bundle_tools(&self, output: &Path, package: &mut OfflinePackage, runtime: &mut RuntimeConfig) {
        let tools_dir = output.join(PACKAGE_TOOLS_DIR);
        let registry = self.resolver.registry();
        let native: BTreeSet<&str> = registry
            .for_platform(&self.target_os)
            .into_iter()
            .map(|t| t.name.as_str())
            .collect();

        for (name, status) in self.required_tools(package) {
            let source = match (status.status, &status.path) {
                (Status::Available | Status::Cached, Some(path)) => path.clone(),
                (state, _) => {
                    record(&mut package.warnings, format!("Tool '{}' is {}; omitted from bundle", name, state));
                    continue;
                }
            };

            let dest = tools_dir.join(sanitize_filename(&name));
            match bundle_one(&source, &dest) {
                Ok(bytes) => {
                    debug!("Bundled {} ({} bytes)", name, bytes);
                    let rel = dest.strip_prefix(output).unwrap_or(&dest);
                    runtime.tools.insert(name.clone(), to_portable(rel));
                    if let Some(tool) = registry.resolve(&name).filter(|r| !native.contains(r.name.as_str())) {
                        record(&mut package.warnings, format!(
                            "Tool '{}' is built for {}, package targets {}",
                            name, tool.platform, self.target_os
                        ));
                    }
                    package.bundled_tools.insert(name);
                }
                Err(e) => {
                    if dest.exists() {
                        let _ = fs::remove_dir_all(&dest);
                    }
                    record(&mut package.warnings, format!("Failed to bundle tool '{}': {:#}", name, e));
                }
            }
        }
    }
}

/// Copy a system binary or a cached tool tree into `dest`.
fn bundle_one(source: &Path, dest: &Path) -> Result<u64> {
    if source.is_dir() {
        return copy_tree(source, dest);
    }

    fs::create_dir_all(dest).context(format!("Failed to create directory: {}", dest.display()))?;
    let file_name = source
        .file_name()
        .ok_or_else(|| anyhow!("{} has no file name", source.display()))?;
    let target = dest.join(file_name);
    fs::copy(source, &target).context(format!("Failed to copy {} to {}", source.display(), target.display()))
}

fn record(warnings: &mut Vec<String>, message: String) {
    warn!("{}", message);
    warnings.push(message);
}

fn is_package(path: &Path) -> bool {
    RuntimeConfig::path_in(path).is_file()
}

/// Create a fresh package tree at `output`.
fn prepare_output(output: &Path, bundle_tools: bool) -> Result<(), PackagerError> {
    validate_output_path(output).map_err(|e| PackagerError::packaging(output, e))?;

    if output.exists() {
        if !output.is_dir() {
            return Err(PackagerError::packaging(output, "exists and is not a directory"));
        }

        let empty = fs::read_dir(output)
            .map_err(|e| PackagerError::packaging(output, e))?
            .next()
            .is_none();

        if is_package(output) {
            info!("Replacing existing package at {}", output.display());
            fs::remove_dir_all(output).map_err(|e| PackagerError::packaging(output, e))?;
        } else if !empty {
            return Err(PackagerError::packaging(
                output,
                "directory is not empty and does not contain a package; refusing to overwrite",
            ));
        }
    }

    let mut dirs = vec![
        output.to_path_buf(),
        output.join(PACKAGE_COLLECTIONS_DIR),
        output.join(PACKAGE_CONFIG_DIR),
    ];
    if bundle_tools {
        dirs.push(output.join(PACKAGE_TOOLS_DIR));
    }

    for dir in dirs {
        fs::create_dir_all(&dir).map_err(|e| PackagerError::packaging(&dir, e))?;
    }

    Ok(())
}

/// Check a built package against its own runtime configuration.
pub fn verify_package(root: &Path) -> ValidationResult {
    let mut result = ValidationResult { valid: true, ..Default::default() };

    let runtime = match RuntimeConfig::read(root) {
        Ok(runtime) => runtime,
        Err(e) => {
            result.valid = false;
            result.errors.push(format!("{:#}", e));
            return result;
        }
    };

    let mut missing = |what: &str, rel: &str| {
        result.errors.push(format!("{} {} is missing", what, rel));
    };

    for (name, rel) in &runtime.collection_files {
        if !root.join(rel).is_file() {
            missing(&format!("Collection '{}' file", name), rel);
        }
    }

    for (name, rel) in &runtime.tools {
        if !root.join(rel).exists() {
            missing(&format!("Tool '{}' at", name), rel);
        }
    }

    if let Some(tools_path) = &runtime.tools_path {
        if !root.join(tools_path).is_dir() {
            missing("Tools directory", tools_path);
        }
    }

    let script = deploy_script_name(&runtime.target_os);
    if !root.join(script).is_file() {
        missing("Deploy script", script);
    }

    for name in &runtime.collections {
        if !runtime.collection_files.contains_key(name) {
            result.warnings.push(format!("Collection '{}' has no recorded file", name));
        }
    }

    result.valid = result.errors.is_empty();
    result
}

/// Default location for the archive of a package directory.
pub fn archive_path_for(root: &Path) -> PathBuf {
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "package".to_string());
    root.with_file_name(format!("{}.zip", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::manifest::ToolCache;
    use crate::registry::{Platform, ToolRecord, ToolRegistry};
    use crate::test_utils::write_definition;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        packager: Packager,
    }

    impl Fixture {
        fn output(&self) -> PathBuf {
            self.dir.path().join("out/package")
        }
    }

    /// Two collections sharing `yara` (cached; the scan also needs
    /// `yara64`) plus one needing `lsof` (system) and `ghost` (unknown).
    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let defs = dir.path().join("defs");
        write_definition(&defs, "windows/yara_scan.yaml", "Windows.YaraScan", r#"SELECT * FROM execve(argv=["yara64.exe", "-r"])
SELECT * FROM execve(argv=["yara.exe", "-s"])"#);
        write_definition(&defs, "windows/yara_memory.yaml", "Windows.YaraMemory", r#"SELECT * FROM execve(argv=["yara.exe"])"#);
        write_definition(&defs, "linux/netstat.yaml", "Linux.OpenFiles", r#"SELECT * FROM execve(argv=["/usr/bin/lsof", "-n"])
SELECT * FROM execve(argv=["ghost"])"#);

        let lsof = dir.path().join("sys/lsof");
        fs::create_dir_all(lsof.parent().unwrap()).unwrap();
        fs::write(&lsof, b"lsof-binary").unwrap();

        let registry = Arc::new(ToolRegistry::from_records(vec![
            ToolRecord::download("yara", Platform::Windows, "https://example.test/yara.zip", "", ""),
            ToolRecord::download("yara64", Platform::Windows, "https://example.test/yara64.zip", "", ""),
            ToolRecord::system("lsof", Platform::Linux, &lsof.to_string_lossy(), "", ""),
        ]));
        let cache = ToolCache::new(dir.path().join("cache"));
        for tool in ["yara", "yara64"] {
            fs::create_dir_all(cache.tool_dir(tool)).unwrap();
            fs::write(cache.tool_dir(tool).join(format!("{}.exe", tool)), b"MZ").unwrap();
        }

        let catalog = Arc::new(Catalog::load_enriched(&defs).unwrap());
        let resolver = DependencyResolver::new(registry, cache);
        Fixture {
            dir,
            packager: Packager::new(catalog, resolver).with_target_os("linux"),
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_build_without_tools_has_no_tools_dir() {
        let fx = fixture();
        let out = fx.output();

        let package = fx.packager.build(&names(&["Windows.YaraScan"]), &out, false).unwrap();

        assert!(package.success);
        assert!(!out.join("tools").exists());
        assert!(out.join("collections/yara_scan.yaml").is_file());
        assert!(out.join("config/runtime_config.json").is_file());
        assert!(out.join("deploy.sh").is_file());
        assert!(package.bundled_tools.is_empty());
        assert_eq!(package.size_bytes, tree_size(&out));

        let runtime = RuntimeConfig::read(&out).unwrap();
        assert_eq!(runtime.tools_path, None);
        assert_eq!(runtime.collections, vec!["Windows.YaraScan"]);
    }

    #[test]
    fn test_unknown_collection_is_skipped_with_warning() {
        let fx = fixture();
        let package = fx
            .packager
            .build(&names(&["Windows.YaraScan", "No.Such.Collection"]), &fx.output(), false)
            .unwrap();

        assert!(package.success);
        assert_eq!(package.included_collections.len(), 1);
        assert!(package.warnings.iter().any(|w| w.contains("No.Such.Collection")));
    }

    #[test]
    fn test_shared_dependency_bundled_once() {
        let fx = fixture();
        let out = fx.output();

        let package = fx
            .packager
            .build(&names(&["Windows.YaraScan", "Windows.YaraMemory"]), &out, true)
            .unwrap();

        assert!(package.success);
        let bundled: Vec<&str> = package.bundled_tools.iter().map(|s| s.as_str()).collect();
        assert_eq!(bundled, vec!["yara", "yara64"]);

        let tool_dirs: Vec<_> = fs::read_dir(out.join("tools")).unwrap().collect();
        assert_eq!(tool_dirs.len(), 2);
        assert!(out.join("tools/yara/yara.exe").is_file());

        let runtime = RuntimeConfig::read(&out).unwrap();
        assert_eq!(runtime.tools_path.as_deref(), Some("tools"));
        assert_eq!(runtime.tools.get("yara").map(String::as_str), Some("tools/yara"));

        // Windows tools in a linux package are bundled but flagged
        assert!(package.warnings.iter().any(|w| w.contains("'yara' is built for windows")));
    }

    #[test]
    fn test_system_tool_bundled_and_unknown_omitted() {
        let fx = fixture();
        let out = fx.output();

        let package = fx.packager.build(&names(&["Linux.OpenFiles"]), &out, true).unwrap();

        assert!(package.success);
        assert!(package.bundled_tools.contains("lsof"));
        assert!(!package.bundled_tools.contains("ghost"));
        assert!(out.join("tools/lsof/lsof").is_file());
        assert!(package.warnings.iter().any(|w| w.contains("'ghost'") && w.contains("unknown")));
        assert!(!package.warnings.iter().any(|w| w.contains("built for")));
    }

    #[test]
    fn test_rebuild_replaces_previous_package() {
        let fx = fixture();
        let out = fx.output();

        fx.packager.build(&names(&["Windows.YaraScan", "Windows.YaraMemory"]), &out, true).unwrap();
        let first = RuntimeConfig::read(&out).unwrap();

        let package = fx.packager.build(&names(&["Linux.OpenFiles"]), &out, false).unwrap();
        let second = RuntimeConfig::read(&out).unwrap();

        assert_ne!(first.package_id, second.package_id);
        assert!(!out.join("tools").exists());
        assert!(!out.join("collections/yara_scan.yaml").exists());
        assert_eq!(package.included_collections.len(), 1);
    }

    #[test]
    fn test_refuses_foreign_non_empty_directory() {
        let fx = fixture();
        let out = fx.output();
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("notes.txt"), "case notes").unwrap();

        let err = fx.packager.build(&names(&["Windows.YaraScan"]), &out, false).unwrap_err();

        assert!(matches!(err, PackagerError::Packaging { .. }));
        assert!(out.join("notes.txt").exists());
    }

    #[test]
    fn test_file_name_collisions_get_suffix() {
        let dir = TempDir::new().unwrap();
        let defs = dir.path().join("defs");
        write_definition(&defs, "a/triage.yaml", "A.Triage", "SELECT * FROM info()");
        write_definition(&defs, "b/triage.yaml", "B.Triage", "SELECT * FROM info()");

        let catalog = Arc::new(Catalog::load(&defs).unwrap());
        let resolver = DependencyResolver::new(
            Arc::new(ToolRegistry::default()),
            ToolCache::new(dir.path().join("cache")),
        );
        let out = dir.path().join("pkg");

        let package = Packager::new(catalog, resolver)
            .build(&names(&["A.Triage", "B.Triage"]), &out, false)
            .unwrap();

        assert_eq!(package.included_collections.len(), 2);
        assert!(out.join("collections/triage.yaml").is_file());
        assert!(out.join("collections/triage_1.yaml").is_file());
    }

    #[test]
    fn test_verify_package() {
        let fx = fixture();
        let out = fx.output();
        fx.packager.build(&names(&["Windows.YaraScan"]), &out, true).unwrap();

        let result = verify_package(&out);
        assert!(result.valid, "{:?}", result.errors);

        fs::remove_file(out.join("collections/yara_scan.yaml")).unwrap();
        let result = verify_package(&out);
        assert!(!result.valid);
        assert!(result.errors[0].contains("Windows.YaraScan"));

        let empty = TempDir::new().unwrap();
        assert!(!verify_package(empty.path()).valid);
    }

    #[test]
    fn test_system_directory_output_refused() {
        let fx = fixture();
        let err = fx.packager.build(&names(&["Windows.YaraScan"]), Path::new("/etc/triage"), false);
        assert!(matches!(err, Err(PackagerError::Packaging { .. })));
    }

    #[test]
    fn test_archive_path_for() {
        assert_eq!(archive_path_for(Path::new("/tmp/pkg")), PathBuf::from("/tmp/pkg.zip"));
    }
}
