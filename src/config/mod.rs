mod env_vars;
mod packager_config;

// Re-export packager config
pub use packager_config::{default_cache_dir, PackagerConfig};

// Re-export environment variable functions
pub use env_vars::{expand_env_vars, expand_path, normalize_path_for_os};
