//! Configuration loading and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::ColloquyConfig;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Load configuration from a YAML file.
pub fn load_config(path: &Path) -> Result<ColloquyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from YAML text.
pub fn parse_config(content: &str) -> Result<ColloquyConfig, ConfigError> {
    let config: ColloquyConfig = serde_yaml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &ColloquyConfig) -> Result<(), ConfigError> {
    if config.version == 0 {
        return Err(ConfigError::Invalid(
            "version must be greater than 0".to_string(),
        ));
    }

    if config.app.name.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "app.name must not be empty".to_string(),
        ));
    }

    if config.runtime.command_marker.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "runtime.command_marker must not be empty".to_string(),
        ));
    }

    if config.runtime.default_language.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "runtime.default_language must not be empty".to_string(),
        ));
    }

    if config.menu.page_size == 0 {
        return Err(ConfigError::Invalid(
            "menu.page_size must be > 0".to_string(),
        ));
    }

    for (field, text) in [
        ("menu.next_text", &config.menu.next_text),
        ("menu.prev_text", &config.menu.prev_text),
        ("menu.close_text", &config.menu.close_text),
        ("menu.template", &config.menu.template),
    ] {
        if text.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("{field} must not be empty")));
        }
    }

    for lang in config.translations.keys() {
        if lang.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "translations must not contain an empty language code".to_string(),
            ));
        }
    }

    Ok(())
}

/// Holds the current configuration and reloads it on demand.
pub struct ConfigManager {
    path: PathBuf,
    config: Arc<RwLock<ColloquyConfig>>,
}

impl ConfigManager {
    /// Create a new config manager.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: Arc::new(RwLock::new(ColloquyConfig::default())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a reference to the current config.
    pub fn config(&self) -> Arc<RwLock<ColloquyConfig>> {
        self.config.clone()
    }

    /// Load configuration from file. On failure the previous config stays.
    pub async fn load(&self) -> Result<(), ConfigError> {
        let config = load_config(&self.path)?;
        let mut current = self.config.write().await;
        *current = config;
        tracing::info!(path = %self.path.display(), "config loaded");
        Ok(())
    }

    pub async fn snapshot(&self) -> ColloquyConfig {
        self.config.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ColloquyConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.runtime.command_marker, "/");
        assert_eq!(config.runtime.presence_grace_ms, 5_000);
        assert_eq!(config.menu.page_size, 5);
        assert_eq!(config.messages.timeout, "Timed out");
        assert_eq!(config.messages.match_error, "Invalid Input");
    }

    #[test]
    fn test_parse_partial_yaml_fills_defaults() {
        let config = parse_config(
            r#"
app:
  name: pizza-bot
menu:
  page_size: 3
  close_on_timeout: false
translations:
  tr:
    Timed out: Zaman aşımı
"#,
        )
        .unwrap();
        assert_eq!(config.app.name, "pizza-bot");
        assert_eq!(config.menu.page_size, 3);
        assert!(!config.menu.close_on_timeout);
        assert_eq!(config.menu.next_text, "➡️");
        assert_eq!(
            config.translations["tr"].get("Timed out").map(String::as_str),
            Some("Zaman aşımı")
        );
    }

    #[test]
    fn test_validate_rejects_zero_page_size() {
        let result = parse_config("menu:\n  page_size: 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_empty_navigation_text() {
        let result = parse_config("menu:\n  next_text: \"  \"\n");
        assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("next_text")));
    }

    #[test]
    fn test_validate_rejects_empty_command_marker() {
        let result = parse_config("runtime:\n  command_marker: \"\"\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_manager_loads_from_file_and_keeps_previous_on_error() {
        tokio_test::block_on(async {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(file, "app:\n  name: demo\nruntime:\n  default_language: tr").unwrap();

            let manager = ConfigManager::new(file.path());
            manager.load().await.unwrap();
            let loaded = manager.snapshot().await;
            assert_eq!(loaded.app.name, "demo");
            assert_eq!(loaded.runtime.default_language, "tr");

            let bad = ConfigManager::new(file.path().with_extension("missing"));
            assert!(matches!(bad.load().await, Err(ConfigError::Io(_))));
            assert_eq!(bad.snapshot().await.app.name, "colloquy");
        });
    }
}
