//! Shared helpers for the Cadence workspace: settings persistence and path resolution.

pub mod path_processing;
pub mod settings;

pub use path_processing::{APP_DIR_NAME, config_file_path, expand_tilde};
pub use settings::{EngineSettings, HistorySettings, SettingsError};
