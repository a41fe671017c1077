use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::registry::TypeRegistry;

/// Default configuration file name, looked up in the working directory
pub const CONFIG_FILE: &str = "receipe_editor.toml";

/// Editor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Press-hold debounce before a press becomes a drag
    pub press_hold_ms: u64,

    /// Log filter used when `RUST_LOG` is not set
    pub log_filter: String,

    /// Type catalogs registered at start-up, in order
    pub catalogs: Vec<PathBuf>,

    /// Directory holding saved receipes
    pub storage_dir: PathBuf,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            press_hold_ms: 100,
            log_filter: "info,receipe_editor=debug".to_string(),
            catalogs: vec![PathBuf::from("catalogs/tabular.json")],
            storage_dir: PathBuf::from("receipes"),
        }
    }
}

impl EditorConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration if the file exists
    pub fn try_load(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        Self::load(path).map(Some)
    }

    /// Load configuration, returning defaults on any error.
    ///
    /// The failure is handed back so it can be reported once logging is up.
    pub fn load_or_default(path: impl AsRef<Path>) -> (Self, Option<anyhow::Error>) {
        match Self::try_load(path) {
            Ok(config) => (config.unwrap_or_default(), None),
            Err(e) => (Self::default(), Some(e)),
        }
    }

    /// Save configuration as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create config directory: {}", parent.display())
                })?;
            }
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    pub fn press_hold(&self) -> Duration {
        Duration::from_millis(self.press_hold_ms)
    }

    /// Builtin types plus every configured catalog that loads.
    ///
    /// A broken catalog is logged and skipped.
    pub fn build_registry(&self) -> TypeRegistry {
        let mut registry = TypeRegistry::with_builtins();
        for catalog in &self.catalogs {
            if let Err(e) = registry.load_catalog(catalog) {
                tracing::warn!("Skipping type catalog: {:#}", e);
            }
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = EditorConfig::default();
        assert_eq!(config.press_hold(), Duration::from_millis(100));
        assert_eq!(config.storage_dir, PathBuf::from("receipes"));
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join(CONFIG_FILE);

        let config = EditorConfig {
            press_hold_ms: 250,
            catalogs: vec![PathBuf::from("a.json"), PathBuf::from("b.json")],
            ..EditorConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = EditorConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "press_hold_ms = 50\n").unwrap();

        let loaded = EditorConfig::load(&path).unwrap();
        assert_eq!(loaded.press_hold_ms, 50);
        assert_eq!(loaded.log_filter, EditorConfig::default().log_filter);
    }

    #[test]
    fn test_broken_file_falls_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "press_hold_ms = \"soon\"").unwrap();

        assert!(EditorConfig::load(&path).is_err());
        let (config, error) = EditorConfig::load_or_default(&path);
        assert_eq!(config, EditorConfig::default());
        let error = error.unwrap();
        assert!(format!("{:#}", error).contains("Failed to parse config file"));

        let missing = temp_dir.path().join("missing.toml");
        assert!(EditorConfig::try_load(&missing).unwrap().is_none());
        let (config, error) = EditorConfig::load_or_default(&missing);
        assert_eq!(config, EditorConfig::default());
        assert!(error.is_none());
    }

    #[test]
    fn test_missing_catalog_is_skipped() {
        let config = EditorConfig {
            catalogs: vec![PathBuf::from("/definitely/not/here.json")],
            ..EditorConfig::default()
        };
        let registry = config.build_registry();
        assert_eq!(registry.len(), TypeRegistry::with_builtins().len());
    }
}
