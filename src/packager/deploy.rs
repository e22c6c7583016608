use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;

use crate::constants::{DEPLOY_SCRIPT_UNIX, DEPLOY_SCRIPT_WINDOWS};
use crate::packager::runtime_config::RuntimeConfig;
use crate::utils::files::set_executable;

/// Entry point file name for a target OS.
pub fn deploy_script_name(target_os: &str) -> &'static str {
    if target_os.eq_ignore_ascii_case("windows") {
        DEPLOY_SCRIPT_WINDOWS
    } else {
        DEPLOY_SCRIPT_UNIX
    }
}

/// Single-quote a value for POSIX sh
fn sh_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Single-quote a value for PowerShell
fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn unix_script(config: &RuntimeConfig) -> String {
    let checks: String = config
        .collection_files
        .values()
        .map(|file| format!("require \"$PACKAGE_ROOT\"/{}\n", sh_quote(file)))
        .collect();

    format!(
        r#"#!/bin/sh
# Deployment entry point for offline collection package {package_id}
# Generated by triage-packager {version} on {created_at}
set -eu

PACKAGE_ROOT="$(cd "$(dirname "$0")" && pwd)"
CONFIG="$PACKAGE_ROOT/config/runtime_config.json"

require() {{
    if [ ! -e "$1" ]; then
        echo "Package layout invalid: missing $1" >&2
        exit 1
    fi
}}

require "$CONFIG"
require "$PACKAGE_ROOT/collections"
{checks}
if [ -d "$PACKAGE_ROOT/tools" ]; then
    TRIAGE_TOOLS_DIR="$PACKAGE_ROOT/tools"
    export TRIAGE_TOOLS_DIR
fi

ENGINE="${{COLLECTION_ENGINE:-}}"
if [ -z "$ENGINE" ]; then
    echo "Set COLLECTION_ENGINE to the collection engine executable" >&2
    exit 2
fi

exec "$ENGINE" --config "$CONFIG" --collections "$PACKAGE_ROOT/collections" "$@"
"#,
        package_id = config.package_id,
        version = config.builder_version,
        created_at = config.created_at,
        checks = checks,
    )
}

fn windows_script(config: &RuntimeConfig) -> String {
    let checks: String = config
        .collection_files
        .values()
        .map(|file| format!("    (Join-Path $PackageRoot {}),\n", ps_quote(&file.replace('/', "\\"))))
        .collect();

    format!(
        r#"# Deployment entry point for offline collection package {package_id}
# Generated by triage-packager {version} on {created_at}
$ErrorActionPreference = 'Stop'

$PackageRoot = Split-Path -Parent $MyInvocation.MyCommand.Path
$Config = Join-Path $PackageRoot 'config\runtime_config.json'
$Collections = Join-Path $PackageRoot 'collections'

$Required = @(
{checks}    $Config,
    $Collections
)
foreach ($Path in $Required) {{
    if (-not (Test-Path -LiteralPath $Path)) {{
        [Console]::Error.WriteLine("Package layout invalid: missing $Path")
        exit 1
    }}
}}

$ToolsDir = Join-Path $PackageRoot 'tools'
if (Test-Path -LiteralPath $ToolsDir) {{
    $env:TRIAGE_TOOLS_DIR = $ToolsDir
}}

$Engine = $env:COLLECTION_ENGINE
if (-not $Engine) {{
    [Console]::Error.WriteLine('Set COLLECTION_ENGINE to the collection engine executable')
    exit 2
}}

& $Engine --config $Config --collections $Collections @args
exit $LASTEXITCODE
"#,
        package_id = config.package_id,
        version = config.builder_version,
        created_at = config.created_at,
        checks = checks,
    )
}

/// Write the deployment entry point for `config.target_os` into `root`.
pub fn generate_deploy_script(root: &Path, config: &RuntimeConfig) -> Result<PathBuf> {
    let script_path = root.join(deploy_script_name(&config.target_os));

    let script_content = if config.target_os.eq_ignore_ascii_case("windows") {
        windows_script(config)
    } else {
        unix_script(config)
    };

    fs::write(&script_path, script_content)
        .context(format!("Failed to write deploy script to {}", script_path.display()))?;
    set_executable(&script_path)?;

    info!("Deploy script for {} generated at {}", config.target_os, script_path.display());
    Ok(script_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(target_os: &str) -> RuntimeConfig {
        let mut config = RuntimeConfig::new(target_os);
        config.collections = vec!["Linux.Triage".into()];
        config
            .collection_files
            .insert("Linux.Triage".into(), "collections/it's.yaml".into());
        config
    }

    #[test]
    fn test_script_name_per_os() {
        assert_eq!(deploy_script_name("windows"), "deploy.ps1");
        assert_eq!(deploy_script_name("Windows"), "deploy.ps1");
        assert_eq!(deploy_script_name("linux"), "deploy.sh");
        assert_eq!(deploy_script_name("macos"), "deploy.sh");
    }

    #[test]
    fn test_unix_script_checks_layout_and_runs_engine() {
        let dir = TempDir::new().unwrap();
        let cfg = config("linux");

        let path = generate_deploy_script(dir.path(), &cfg).unwrap();
        let script = fs::read_to_string(&path).unwrap();

        assert!(script.starts_with("#!/bin/sh"));
        assert!(script.contains(&cfg.package_id));
        assert!(script.contains("require \"$PACKAGE_ROOT\"/'collections/it'\\''s.yaml'"));
        assert!(script.contains("${COLLECTION_ENGINE:-}"));
        assert!(script.contains("exec \"$ENGINE\" --config \"$CONFIG\""));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            assert_ne!(fs::metadata(&path).unwrap().permissions().mode() & 0o111, 0);
        }
    }

    #[test]
    fn test_windows_script() {
        let dir = TempDir::new().unwrap();
        let path = generate_deploy_script(dir.path(), &config("windows")).unwrap();
        let script = fs::read_to_string(&path).unwrap();

        assert!(path.ends_with("deploy.ps1"));
        assert!(script.contains("'collections\\it''s.yaml'"));
        assert!(script.contains("$env:COLLECTION_ENGINE"));
        assert!(script.contains("Test-Path -LiteralPath $Path"));
    }
}
