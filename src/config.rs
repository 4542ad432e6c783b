//! Application configuration and data paths
//!
//! Everything lives under one data directory:
//!
//! - `session.json`, `pending_load.json`, `blacklist.json`
//! - `presets/`, `templates/`
//! - `logs/fxchain.log`
//!
//! The default directory is `dirs::config_dir()/fxchain`; the
//! `FXCHAIN_DATA_DIR` environment variable overrides it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::StorageError;
use crate::session::store::read_json;

const APP_NAME: &str = "fxchain";
const CONFIG_FILE: &str = "config.json";
pub const DATA_DIR_ENV: &str = "FXCHAIN_DATA_DIR";

pub fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub data_dir: PathBuf,
    /// Quiet period after a chain change before the session is written
    pub autosave_debounce_ms: u64,
    /// Unconditional save period
    pub autosave_interval_secs: u64,
    pub undo_window_secs: u64,
    /// Used when `RUST_LOG` is not set
    pub log_level: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            autosave_debounce_ms: 2000,
            autosave_interval_secs: 30,
            undo_window_secs: 5,
            log_level: "info".to_string(),
        }
    }
}

impl SessionConfig {
    /// Defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Read `<data_dir>/config.json`, falling back to defaults when absent.
    /// The directory the file was found in always wins over its `data_dir` field.
    pub fn load(data_dir: &Path) -> Result<Self, StorageError> {
        let mut config = read_json::<SessionConfig>(&data_dir.join(CONFIG_FILE))?
            .unwrap_or_default();
        config.data_dir = data_dir.to_path_buf();
        Ok(config)
    }

    pub fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }

    pub fn autosave_interval(&self) -> Duration {
        // A zero period would make tokio's interval panic
        Duration::from_secs(self.autosave_interval_secs.max(1))
    }

    pub fn undo_window(&self) -> Duration {
        Duration::from_secs(self.undo_window_secs)
    }

    pub fn presets_dir(&self) -> PathBuf {
        self.data_dir.join("presets")
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.data_dir.join("templates")
    }

    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join("logs").join(format!("{}.log", APP_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_file() {
        let dir = TempDir::new().unwrap();
        let config = SessionConfig::load(dir.path()).unwrap();
        assert_eq!(config.data_dir, dir.path());
        assert_eq!(config.autosave_debounce(), Duration::from_secs(2));
        assert_eq!(config.autosave_interval(), Duration::from_secs(30));
        assert_eq!(config.undo_window(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_file_overrides_some_fields() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{ "autosave_interval_secs": 10, "data_dir": "/elsewhere" }"#,
        )
        .unwrap();
        let config = SessionConfig::load(dir.path()).unwrap();
        assert_eq!(config.autosave_interval(), Duration::from_secs(10));
        assert_eq!(config.undo_window_secs, 5);
        assert_eq!(config.data_dir, dir.path());
        assert_eq!(config.presets_dir(), dir.path().join("presets"));
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let mut config = SessionConfig::with_data_dir("/tmp/x");
        config.autosave_interval_secs = 0;
        assert_eq!(config.autosave_interval(), Duration::from_secs(1));
    }
}
