//! Persisted connection settings
//!
//! Stored as pretty-printed JSON, by default in
//! `<config dir>/raceanalyzer/connection.json`. Missing fields take their
//! defaults, so older files keep loading as settings are added.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::protocol::{CommError, ConnectionConfig};

/// File name of the settings file inside the config directory
pub const CONFIG_FILE_NAME: &str = "connection.json";

impl ConnectionConfig {
    /// Default settings file location
    pub fn default_path() -> io::Result<PathBuf> {
        let base = dirs::config_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "Could not find home directory")
            })?;
        Ok(base.join("raceanalyzer").join(CONFIG_FILE_NAME))
    }

    /// Load settings from `path`
    pub fn load(path: &Path) -> Result<Self, CommError> {
        let content = fs::read_to_string(path)?;
        let config: ConnectionConfig = serde_json::from_str(&content)
            .map_err(|e| CommError::Config(format!("{}: {}", path.display(), e)))?;
        debug!("loaded connection settings from {}", path.display());
        Ok(config)
    }

    /// Load settings from `path`, or defaults if the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self, CommError> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!("{} not found, using default settings", path.display());
            Ok(Self::default())
        }
    }

    /// Save settings to `path`, creating parent directories as needed
    pub fn save(&self, path: &Path) -> Result<(), CommError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| CommError::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }
}
