//! Store configuration
//!
//! [`StoreConfig`] names the directories the stores read from and tunes the
//! walker. It can be built in code or loaded from a TOML file:
//!
//! ```toml
//! xml_dir = "/home/me/.local/share/TpLogger/logs"
//! pidgin_dir = "/home/me/.purple/logs"
//! fetch_batch = 32
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;

/// Default number of events a walker pulls from one iterator at a time
pub const DEFAULT_FETCH_BATCH: usize = 16;

/// Configuration for the log stores and the walker built over them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base directory of the XML store, `None` to disable it
    pub xml_dir: Option<PathBuf>,
    /// Base directory of the Pidgin store, `None` to disable it
    pub pidgin_dir: Option<PathBuf>,
    /// Lookahead chunk size used by walkers
    pub fetch_batch: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            xml_dir: Some(
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("TpLogger")
                    .join("logs"),
            ),
            pidgin_dir: Some(
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".purple")
                    .join("logs"),
            ),
            fetch_batch: DEFAULT_FETCH_BATCH,
        }
    }
}

impl StoreConfig {
    /// Configuration reading only an XML store
    pub fn xml_only(dir: impl Into<PathBuf>) -> Self {
        Self {
            xml_dir: Some(dir.into()),
            pidgin_dir: None,
            ..Default::default()
        }
    }

    /// Configuration reading only a Pidgin store
    pub fn pidgin_only(dir: impl Into<PathBuf>) -> Self {
        Self {
            xml_dir: None,
            pidgin_dir: Some(dir.into()),
            ..Default::default()
        }
    }

    /// Load a configuration from a TOML file
    ///
    /// Keys missing from the file keep their default value.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| StoreError::config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&contents)?;
        debug!(path = %path.display(), ?config, "Loaded store configuration");
        Ok(config)
    }

    /// Parse a configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self, StoreError> {
        let config: Self = toml::from_str(contents).map_err(|e| StoreError::config(e.to_string()))?;
        if config.fetch_batch == 0 {
            return Err(StoreError::config("fetch_batch must be at least 1"));
        }
        Ok(config)
    }

    /// Set the XML store directory
    pub fn with_xml_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.xml_dir = Some(dir.into());
        self
    }

    /// Set the Pidgin store directory
    pub fn with_pidgin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pidgin_dir = Some(dir.into());
        self
    }

    /// Set the walker lookahead chunk size (at least 1)
    pub fn with_fetch_batch(mut self, fetch_batch: usize) -> Self {
        self.fetch_batch = fetch_batch.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert!(config.xml_dir.unwrap().ends_with("TpLogger/logs"));
        assert!(config.pidgin_dir.unwrap().ends_with(".purple/logs"));
        assert_eq!(config.fetch_batch, DEFAULT_FETCH_BATCH);
    }

    #[test]
    fn test_single_store_configs() {
        let config = StoreConfig::xml_only("/srv/logs");
        assert_eq!(config.xml_dir, Some(PathBuf::from("/srv/logs")));
        assert!(config.pidgin_dir.is_none());

        let config = StoreConfig::pidgin_only("/srv/purple");
        assert!(config.xml_dir.is_none());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = StoreConfig::from_toml_str("xml_dir = \"/srv/logs\"\nfetch_batch = 4\n").unwrap();
        assert_eq!(config.xml_dir, Some(PathBuf::from("/srv/logs")));
        assert_eq!(config.fetch_batch, 4);
        assert_eq!(config.pidgin_dir, StoreConfig::default().pidgin_dir);
    }

    #[test]
    fn test_from_toml_rejects_zero_batch() {
        let err = StoreConfig::from_toml_str("fetch_batch = 0").unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("chatlog.toml");
        std::fs::write(&path, "pidgin_dir = \"/tmp/purple\"\n").unwrap();

        let config = StoreConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.pidgin_dir, Some(PathBuf::from("/tmp/purple")));

        assert!(StoreConfig::from_toml_file(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_fetch_batch_floor() {
        assert_eq!(StoreConfig::default().with_fetch_batch(0).fetch_batch, 1);
    }
}
