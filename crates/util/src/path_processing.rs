//! Filesystem path helpers shared by the settings and store modules.

use std::env;
use std::path::PathBuf;

use dirs_next::{config_dir, home_dir};

/// Directory name used under the platform configuration directory.
pub const APP_DIR_NAME: &str = "cadence";

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let p = path.trim();
    if p == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = p.strip_prefix("~/") {
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    if let Some(rest) = p.strip_prefix("~\\") {
        // Windows-style
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    PathBuf::from(p)
}

/// Resolve a file path from an environment override, falling back to
/// `<config_dir>/cadence/<file_name>`.
pub fn config_file_path(env_var: &str, file_name: &str) -> PathBuf {
    if let Ok(path) = env::var(env_var) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return expand_tilde(trimmed);
        }
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
        .join(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_absolute_paths_alone() {
        assert_eq!(expand_tilde("/tmp/history.json"), PathBuf::from("/tmp/history.json"));
    }

    #[test]
    fn env_override_wins_over_config_dir() {
        temp_env::with_var("CADENCE_TEST_PATH", Some("/tmp/cadence/custom.json"), || {
            assert_eq!(
                config_file_path("CADENCE_TEST_PATH", "ignored.json"),
                PathBuf::from("/tmp/cadence/custom.json")
            );
        });
    }

    #[test]
    fn blank_override_falls_back_to_config_dir() {
        temp_env::with_var("CADENCE_TEST_BLANK", Some("   "), || {
            let path = config_file_path("CADENCE_TEST_BLANK", "settings.json");
            assert!(path.ends_with("cadence/settings.json"), "unexpected path: {}", path.display());
        });
    }
}
