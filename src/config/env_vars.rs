use std::path::PathBuf;

use lazy_static::lazy_static;
use regex::{Captures, Regex};

lazy_static! {
    /// `${VAR}`, `$VAR` and `%VAR%` references
    static ref ENV_REFERENCE: Regex = Regex::new(
        r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)|%([A-Za-z_][A-Za-z0-9_()]*)%"
    ).unwrap();
}

/// Expand Unix (`$VAR`, `${VAR}`) and Windows (`%VAR%`) environment
/// references. Undefined variables are left untouched.
pub fn expand_env_vars(input: &str) -> String {
    ENV_REFERENCE
        .replace_all(input, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            std::env::var(name).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

/// Normalize path separators for the current OS
pub fn normalize_path_for_os(path: &str) -> String {
    if cfg!(windows) {
        path.replace('/', "\\")
    } else {
        path.replace('\\', "/")
    }
}

/// Expand a configured path: `~/`, environment references, then separators.
pub fn expand_path(input: &str) -> PathBuf {
    let mut expanded = expand_env_vars(input);

    if let Some(rest) = expanded.strip_prefix("~/").or_else(|| expanded.strip_prefix("~\\")) {
        if let Some(home) = home_dir() {
            expanded = format!("{}/{}", home, rest);
        }
    }

    PathBuf::from(normalize_path_for_os(&expanded))
}

fn home_dir() -> Option<String> {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .ok()
        .filter(|h| !h.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    // Each test uses its own variable names; tests run in parallel.

    #[test]
    fn test_unix_styles() {
        env::set_var("TP_TEST_CACHE_ROOT", "/srv/cache");
        assert_eq!(expand_env_vars("$TP_TEST_CACHE_ROOT/tools"), "/srv/cache/tools");
        assert_eq!(expand_env_vars("${TP_TEST_CACHE_ROOT}tools"), "/srv/cachetools");
        env::remove_var("TP_TEST_CACHE_ROOT");
    }

    #[test]
    fn test_windows_style() {
        env::set_var("TP_TEST_LOCALAPPDATA", "C:\\Users\\analyst\\AppData\\Local");
        assert_eq!(
            expand_env_vars("%TP_TEST_LOCALAPPDATA%\\triage"),
            "C:\\Users\\analyst\\AppData\\Local\\triage"
        );
        env::remove_var("TP_TEST_LOCALAPPDATA");
    }

    #[test]
    fn test_mixed_and_repeated() {
        env::set_var("TP_TEST_A", "a");
        env::set_var("TP_TEST_B", "b");
        assert_eq!(expand_env_vars("$TP_TEST_A/%TP_TEST_B%/${TP_TEST_A}"), "a/b/a");
        env::remove_var("TP_TEST_A");
        env::remove_var("TP_TEST_B");
    }

    #[test]
    fn test_undefined_and_malformed_left_alone() {
        assert_eq!(expand_env_vars("$TP_TEST_UNDEFINED_X/x"), "$TP_TEST_UNDEFINED_X/x");
        assert_eq!(expand_env_vars("%TP_TEST_UNDEFINED_Y%"), "%TP_TEST_UNDEFINED_Y%");
        assert_eq!(expand_env_vars("%INCOMPLETE"), "%INCOMPLETE");
        assert_eq!(expand_env_vars("%%"), "%%");
        assert_eq!(expand_env_vars("${unclosed"), "${unclosed");
        assert_eq!(expand_env_vars("price: $5"), "price: $5");
    }

    #[cfg(unix)]
    #[test]
    fn test_expand_path_normalizes_separators() {
        env::set_var("TP_TEST_BASE", "/opt");
        assert_eq!(expand_path("$TP_TEST_BASE\\triage\\tools"), PathBuf::from("/opt/triage/tools"));
        env::remove_var("TP_TEST_BASE");
    }
}
