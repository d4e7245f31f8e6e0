use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::VerdantError;
use crate::{runtime_paths, Result};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    pub sqlite_path: Option<String>,
    pub photo_root: Option<String>,
    pub default_user: Option<String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            VerdantError::Runtime(format!(
                "failed to read config {}: {e}",
                path.to_string_lossy()
            ))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            VerdantError::Runtime(format!(
                "invalid config {}: {e}",
                path.to_string_lossy()
            ))
        })
    }

    /// Missing file means defaults; a present-but-broken file is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            Some(path) => {
                tracing::debug!(path = %path.to_string_lossy(), "config file absent, using defaults");
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    pub fn resolve_db_path(&self) -> String {
        self.sqlite_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .unwrap_or_else(runtime_paths::default_db_path)
    }

    pub fn resolve_photo_root(&self) -> PathBuf {
        self.photo_root
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(runtime_paths::default_photo_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_paths_win_over_platform_defaults() {
        let config = Config {
            sqlite_path: Some("/tmp/garden.db".to_string()),
            photo_root: Some("/tmp/photos".to_string()),
            default_user: None,
        };
        assert_eq!(config.resolve_db_path(), "/tmp/garden.db");
        assert_eq!(config.resolve_photo_root(), PathBuf::from("/tmp/photos"));
    }

    #[test]
    fn blank_entries_fall_back() {
        let config = Config {
            sqlite_path: Some("   ".to_string()),
            photo_root: None,
            default_user: None,
        };
        assert!(config.resolve_db_path().ends_with("verdant.db"));
    }

    #[test]
    fn load_round_trips_a_config_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"sqlite_path": "/tmp/x.db"}"#).expect("write config");
        let config = Config::load(&path).expect("load");
        assert_eq!(config.sqlite_path.as_deref(), Some("/tmp/x.db"));
        assert!(Config::load_or_default(Some(&dir.path().join("missing.json")))
            .expect("defaults")
            .sqlite_path
            .is_none());
    }
}
