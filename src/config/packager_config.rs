use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::env_vars::expand_path;
use crate::constants::{
    DEFAULT_DOWNLOAD_RETRIES, DEFAULT_DOWNLOAD_TIMEOUT_SECS, DEFAULT_MAX_CONCURRENT_DOWNLOADS,
    DEFAULT_USER_AGENT, MAX_CONCURRENT_DOWNLOADS, MAX_DOWNLOAD_TIMEOUT_SECS,
    MIN_DOWNLOAD_TIMEOUT_SECS, RETRY_BASE_DELAY_MS,
};
use crate::error::PackagerError;

/// Packager settings, read from YAML and overridable from the command line.
///
/// ```yaml
/// cache_dir: $HOME/.cache/triage-packager/tools
/// tools_file: ./tools.yaml
/// max_concurrent_downloads: 4
/// download_timeout_secs: 120
/// download_retries: 2
/// target_os: windows
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PackagerConfig {
    pub cache_dir: PathBuf,
    /// Registry override file merged over the built-in tool table
    pub tools_file: Option<PathBuf>,
    pub max_concurrent_downloads: usize,
    pub download_timeout_secs: u64,
    /// Extra attempts for failed downloads
    pub download_retries: usize,
    pub retry_delay_ms: u64,
    pub user_agent: String,
    /// OS the generated deployment entry point is written for
    pub target_os: String,
}

impl Default for PackagerConfig {
    fn default() -> Self {
        PackagerConfig {
            cache_dir: default_cache_dir(),
            tools_file: None,
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            download_retries: DEFAULT_DOWNLOAD_RETRIES,
            retry_delay_ms: RETRY_BASE_DELAY_MS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            target_os: std::env::consts::OS.to_string(),
        }
    }
}

/// Per-user cache location for downloaded tools.
pub fn default_cache_dir() -> PathBuf {
    let base = if cfg!(windows) {
        std::env::var("LOCALAPPDATA").ok().map(PathBuf::from)
    } else {
        std::env::var("XDG_CACHE_HOME")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".cache")))
    };

    base.unwrap_or_else(std::env::temp_dir)
        .join("triage-packager")
        .join("tools")
}

impl PackagerConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self, PackagerError> {
        let content = fs::read_to_string(path)
            .map_err(|e| PackagerError::config(path, e))?;

        let mut config: PackagerConfig = serde_yaml::from_str(&content)
            .map_err(|e| PackagerError::config(path, e))?;

        config.process_environment_variables();
        config.clamp();
        debug!("Loaded packager configuration from {}", path.display());
        Ok(config)
    }

    /// Load `path` when given, otherwise use defaults.
    ///
    /// A path that is given but missing is an error rather than a silent
    /// fall back, so typos in `--config` are noticed.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, PackagerError> {
        match path {
            Some(path) => Self::from_yaml_file(path),
            None => {
                info!("No config path provided, using default configuration");
                Ok(Self::default())
            }
        }
    }

    /// Expand `$VAR`, `${VAR}`, `%VAR%` and `~/` in path settings
    pub fn process_environment_variables(&mut self) {
        self.cache_dir = expand_path(&self.cache_dir.to_string_lossy());
        if let Some(tools_file) = &self.tools_file {
            self.tools_file = Some(expand_path(&tools_file.to_string_lossy()));
        }
    }

    /// Bring numeric settings into their supported ranges.
    pub fn clamp(&mut self) {
        let concurrency = self.max_concurrent_downloads.clamp(1, MAX_CONCURRENT_DOWNLOADS);
        if concurrency != self.max_concurrent_downloads {
            warn!(
                "max_concurrent_downloads {} out of range, using {}",
                self.max_concurrent_downloads, concurrency
            );
            self.max_concurrent_downloads = concurrency;
        }

        let timeout = self
            .download_timeout_secs
            .clamp(MIN_DOWNLOAD_TIMEOUT_SECS, MAX_DOWNLOAD_TIMEOUT_SECS);
        if timeout != self.download_timeout_secs {
            warn!(
                "download_timeout_secs {} out of range, using {}",
                self.download_timeout_secs, timeout
            );
            self.download_timeout_secs = timeout;
        }

        self.target_os = self.target_os.to_lowercase();
    }
}
