use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::config::{expand_path, PackagerConfig};
use crate::error::PackagerError;

/// Command-line arguments for triage-packager.
///
/// One operation per invocation. Collection selection, output location and
/// packager settings are shared by all operations; flags that an operation
/// does not use are ignored.
#[derive(Parser, Debug)]
#[clap(
    name = "triage-packager",
    version,
    about = "Resolve tool dependencies of DFIR collections and build offline packages"
)]
pub struct Args {
    /// Operation to run
    #[clap(value_enum)]
    pub operation: Operation,

    /// Directory containing collection definition files
    #[clap(short = 'p', long)]
    pub collections_path: Option<PathBuf>,

    /// Package directory to build, archive or verify
    #[clap(short, long)]
    pub output_path: Option<PathBuf>,

    /// Only these collections (comma-separated names)
    #[clap(short, long, value_delimiter = ',')]
    pub include: Vec<String>,

    /// Skip these collections (comma-separated names)
    #[clap(short, long, value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Bundle required tools into the package, fetching missing ones first
    #[clap(long)]
    pub offline: bool,

    /// Report what download would fetch without touching the network
    #[clap(long)]
    pub validate_only: bool,

    /// Path to packager configuration YAML file
    #[clap(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Tool cache directory (overrides the configuration file)
    #[clap(long)]
    pub cache_dir: Option<PathBuf>,

    /// Tool registry override file (overrides the configuration file)
    #[clap(long)]
    pub tools_file: Option<PathBuf>,

    /// Target operating system of the deployment entry point
    #[clap(long)]
    pub target_os: Option<TargetOS>,

    /// Verbose logging
    #[clap(short, long)]
    pub verbose: bool,
}

/// Operation selector.
#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub enum Operation {
    /// Show collections and the status of their tool dependencies
    List,
    /// Fetch missing downloadable tools into the cache
    Download,
    /// Assemble a package directory
    Build,
    /// Check collection definitions
    Validate,
    /// Build and archive a package
    Package,
    /// Verify a built package before deployment
    Deploy,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::List => write!(f, "list"),
            Operation::Download => write!(f, "download"),
            Operation::Build => write!(f, "build"),
            Operation::Validate => write!(f, "validate"),
            Operation::Package => write!(f, "package"),
            Operation::Deploy => write!(f, "deploy"),
        }
    }
}

impl Operation {
    /// Whether the operation reads the collection catalog.
    pub fn needs_catalog(&self) -> bool {
        !matches!(self, Operation::Deploy)
    }

    /// Whether the operation writes or reads a package directory.
    pub fn needs_output(&self) -> bool {
        matches!(self, Operation::Build | Operation::Package | Operation::Deploy)
    }
}

/// Deployment target operating system.
#[derive(Clone, Debug, ValueEnum, PartialEq)]
pub enum TargetOS {
    /// Microsoft Windows
    Windows,
    /// Linux distributions
    Linux,
    /// Apple macOS
    #[value(name = "macos")]
    MacOS,
}

impl std::fmt::Display for TargetOS {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetOS::Windows => write!(f, "windows"),
            TargetOS::Linux => write!(f, "linux"),
            TargetOS::MacOS => write!(f, "macos"),
        }
    }
}

impl Args {
    /// Load the configuration file (or defaults) and apply flag overrides.
    pub fn packager_config(&self) -> Result<PackagerConfig, PackagerError> {
        let mut config = PackagerConfig::load_or_default(self.config.as_deref())?;

        if let Some(cache_dir) = &self.cache_dir {
            config.cache_dir = expand_path(&cache_dir.to_string_lossy());
        }
        if let Some(tools_file) = &self.tools_file {
            config.tools_file = Some(expand_path(&tools_file.to_string_lossy()));
        }
        if let Some(target_os) = &self.target_os {
            config.target_os = target_os.to_string();
        }

        config.clamp();
        Ok(config)
    }
}
