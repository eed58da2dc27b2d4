//! Engine settings persisted as JSON.
//!
//! The file lives in the standard configuration directory
//! (`~/.config/cadence/settings.json` on most platforms) unless
//! `CADENCE_SETTINGS_PATH` points elsewhere. A missing file yields defaults; a
//! malformed one is logged and also yields defaults so a bad edit never blocks a run.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::path_processing::{config_file_path, expand_tilde};

/// Environment variable allowing callers to override the settings file path.
pub const SETTINGS_PATH_ENV: &str = "CADENCE_SETTINGS_PATH";

/// Environment variable overriding the execution history file location.
pub const HISTORY_PATH_ENV: &str = "CADENCE_HISTORY_PATH";

/// Default filename for the settings payload.
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Default filename for the execution history store.
pub const HISTORY_FILE_NAME: &str = "history.json";

/// Executions retained per scenario unless configured otherwise.
pub const DEFAULT_EXECUTIONS_PER_SCENARIO: usize = 50;

/// Error surfaced when reading or writing settings fails.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// I/O failure (for example, permissions or missing directory).
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization or deserialization failure.
    #[error("settings serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// History store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HistorySettings {
    /// Explicit history file; `None` uses the config directory.
    pub path: Option<String>,
    /// Executions kept per scenario, newest first.
    pub max_per_scenario: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            path: None,
            max_per_scenario: DEFAULT_EXECUTIONS_PER_SCENARIO,
        }
    }
}

/// Persisted engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineSettings {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub log_filter: String,
    pub history: HistorySettings,
    /// Directory for per-scenario context snapshots; `None` disables snapshots.
    pub context_dir: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            history: HistorySettings::default(),
            context_dir: None,
        }
    }
}

impl EngineSettings {
    /// Load settings from the default location.
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from(&default_settings_path())
    }

    /// Load settings from an explicit file.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        match fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(settings) => Ok(settings),
                Err(error) => {
                    warn!(
                        path = %path.display(),
                        error = %error,
                        "Failed to parse settings file; using defaults"
                    );
                    Ok(Self::default())
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(error) => Err(SettingsError::Io(error)),
        }
    }

    /// Persist settings to the given file, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }

    /// History file location: `CADENCE_HISTORY_PATH`, then `history.path`, then the config dir.
    pub fn history_path(&self) -> PathBuf {
        if let Ok(path) = env::var(HISTORY_PATH_ENV)
            && !path.trim().is_empty()
        {
            return expand_tilde(&path);
        }
        match self.history.path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => expand_tilde(path),
            _ => config_file_path(HISTORY_PATH_ENV, HISTORY_FILE_NAME),
        }
    }

    /// Context snapshot directory, when enabled.
    pub fn context_dir(&self) -> Option<PathBuf> {
        self.context_dir
            .as_deref()
            .map(str::trim)
            .filter(|dir| !dir.is_empty())
            .map(expand_tilde)
    }
}

/// Settings file location honoring `CADENCE_SETTINGS_PATH`.
pub fn default_settings_path() -> PathBuf {
    config_file_path(SETTINGS_PATH_ENV, SETTINGS_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let settings = EngineSettings::load_from(&temp_dir.path().join("absent.json")).expect("load settings");
        assert_eq!(settings, EngineSettings::default());
        assert_eq!(settings.history.max_per_scenario, DEFAULT_EXECUTIONS_PER_SCENARIO);
    }

    #[test]
    fn malformed_file_yields_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        let settings = EngineSettings::load_from(&path).expect("load settings");
        assert_eq!(settings, EngineSettings::default());
    }

    #[test]
    fn round_trips_partial_documents() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("settings.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{ "history": { "max_per_scenario": 5 } }"#).unwrap();

        let mut settings = EngineSettings::load_from(&path).expect("load settings");
        assert_eq!(settings.history.max_per_scenario, 5);
        assert_eq!(settings.log_filter, "info");

        settings.context_dir = Some("/tmp/cadence-contexts".into());
        settings.save_to(&path).expect("save settings");
        let reloaded = EngineSettings::load_from(&path).expect("reload settings");
        assert_eq!(reloaded.context_dir(), Some(PathBuf::from("/tmp/cadence-contexts")));
    }

    #[test]
    fn history_path_env_override_wins() {
        let settings = EngineSettings {
            history: HistorySettings {
                path: Some("/tmp/from-settings.json".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        temp_env::with_var(HISTORY_PATH_ENV, Some("/tmp/from-env.json"), || {
            assert_eq!(settings.history_path(), PathBuf::from("/tmp/from-env.json"));
        });
        temp_env::with_var(HISTORY_PATH_ENV, None::<&str>, || {
            assert_eq!(settings.history_path(), PathBuf::from("/tmp/from-settings.json"));
        });
    }
}
