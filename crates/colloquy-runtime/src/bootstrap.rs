//! Bootstrap - builds a runnable bot from `colloquy.yaml`.

use std::collections::BTreeMap;
use std::fs::{create_dir_all, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use colloquy_config::{ColloquyConfig, ConfigError, ConfigManager, ObservabilityConfig};
use colloquy_core::{TranslationError, TranslationTable, Transport};
use colloquy_stores::BroadcastEventBus;

use crate::context::EngineContext;
use crate::hooks::HookRegistry;
use crate::router::Router;
use crate::settings::Settings;

/// Bootstrap errors.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("translation error in '{language}': {source}")]
    Translation {
        language: String,
        #[source]
        source: TranslationError,
    },
}

/// A bot assembled from configuration. Register triggers on `router`
/// before sharing it.
pub struct BotApp {
    pub router: Router,
    pub context: Arc<EngineContext>,
    pub hook_registry: Arc<HookRegistry>,
    /// Set when the bot was loaded from a file
    pub config_manager: Option<Arc<ConfigManager>>,
}

static TRACING_INIT: OnceLock<()> = OnceLock::new();

impl BotApp {
    /// Load `path`, initialise tracing and build the bot over `transport`.
    pub async fn from_config_path(
        path: impl Into<PathBuf>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, BootstrapError> {
        Self::from_config_path_with_hooks(path, transport, Arc::new(HookRegistry::new())).await
    }

    pub async fn from_config_path_with_hooks(
        path: impl Into<PathBuf>,
        transport: Arc<dyn Transport>,
        hook_registry: Arc<HookRegistry>,
    ) -> Result<Self, BootstrapError> {
        let config_manager = Arc::new(ConfigManager::new(path));
        config_manager.load().await?;
        let config = config_manager.snapshot().await;
        init_tracing_if_needed(&config.observability);

        let mut app = Self::from_config(&config, transport, hook_registry)?;
        app.config_manager = Some(config_manager);
        Ok(app)
    }

    /// Build from an already loaded configuration.
    pub fn from_config(
        config: &ColloquyConfig,
        transport: Arc<dyn Transport>,
        hook_registry: Arc<HookRegistry>,
    ) -> Result<Self, BootstrapError> {
        let translations = build_translations(config)?;
        let event_bus = Arc::new(BroadcastEventBus::new(config.runtime.event_bus_capacity));
        let context = EngineContext::builder(transport)
            .settings(Settings::from(config))
            .event_bus(event_bus)
            .translations(translations)
            .hooks(hook_registry.clone())
            .build();

        tracing::info!(
            app = %config.app.name,
            environment = %config.app.environment,
            languages = config.translations.len(),
            "bot assembled"
        );

        Ok(Self {
            router: Router::new(context.clone()),
            context,
            hook_registry,
            config_manager: None,
        })
    }
}

/// Register every configured language, in name order so key checks are
/// made against the same reference language on every run.
pub fn build_translations(config: &ColloquyConfig) -> Result<TranslationTable, BootstrapError> {
    let mut table = TranslationTable::new();
    let ordered: BTreeMap<_, _> = config.translations.iter().collect();
    for (language, entries) in ordered {
        table
            .register_language(
                language.clone(),
                entries.clone(),
                config.runtime.translation_key_check,
            )
            .map_err(|source| BootstrapError::Translation {
                language: language.clone(),
                source,
            })?;
    }
    Ok(table)
}

/// Where log lines go: `COLLOQUY_LOG_FILE` wins over the configured file,
/// and stdout stays free for the conversation itself.
fn log_file_path(observability: &ObservabilityConfig) -> Option<String> {
    std::env::var("COLLOQUY_LOG_FILE")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| observability.log_file.clone())
}

fn level_directive(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    }
}

fn init_tracing_if_needed(observability: &ObservabilityConfig) {
    TRACING_INIT.get_or_init(|| {
        let log_file = log_file_path(observability);
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level_directive(&observability.log_level)));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true);

        let installed = match log_file.as_deref().and_then(open_log_file) {
            Some(file) => builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .try_init(),
            None => builder.with_writer(std::io::stderr).try_init(),
        };
        if installed.is_ok() {
            tracing::info!(
                log_level = %observability.log_level,
                log_file = log_file.as_deref().unwrap_or("(stderr)"),
                "tracing initialized"
            );
        }
    });
}

/// Open `path` for appending, creating parent directories. Failures fall
/// back to stderr logging.
fn open_log_file(path: &str) -> Option<File> {
    let path = Path::new(path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(err) = create_dir_all(parent) {
            eprintln!("cannot create log directory {}: {err}", parent.display());
            return None;
        }
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| eprintln!("cannot open log file {}: {err}", path.display()))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use colloquy_config::parse_config;
    use colloquy_core::Caller;
    use colloquy_stores::RecordingTransport;

    fn entries(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_config_drives_settings_and_translations() {
        let config = parse_config(
            r#"
version: 1
app:
  name: shop-bot
runtime:
  command_marker: "!"
messages:
  timeout: "timeout"
translations:
  de:
    timeout: "Zeit abgelaufen"
  en:
    timeout: "Time is up"
"#,
        )
        .unwrap();
        let transport = Arc::new(RecordingTransport::new());
        let app = BotApp::from_config(&config, transport, Arc::new(HookRegistry::new())).unwrap();

        let ctx = &app.context;
        assert_eq!(ctx.settings().command_marker, "!");
        let german = Caller::new(1).with_language("de");
        assert_eq!(ctx.translate("timeout", &german), "Zeit abgelaufen");
        assert_eq!(ctx.translate("timeout", &Caller::new(2)), "Time is up");
    }

    #[test]
    fn test_key_check_rejects_mismatched_language() {
        let mut config = ColloquyConfig::default();
        config
            .translations
            .insert("en".to_string(), entries(&[("hello", "Hello"), ("bye", "Bye")]));
        config
            .translations
            .insert("fr".to_string(), entries(&[("hello", "Bonjour")]));

        let err = build_translations(&config).unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::Translation { ref language, .. } if language == "fr"
        ));

        config.runtime.translation_key_check = false;
        assert!(build_translations(&config).is_ok());
    }

    #[test]
    fn test_level_directive_defaults_to_info() {
        assert_eq!(level_directive(" DEBUG "), "debug");
        assert_eq!(level_directive("warning"), "warn");
        assert_eq!(level_directive("loud"), "info");
    }

    #[test]
    fn test_open_log_file_creates_parent_directories() {
        let dir = std::env::temp_dir().join(format!("colloquy-logs-{}", std::process::id()));
        let path = dir.join("nested").join("bot.log");
        assert!(open_log_file(path.to_str().unwrap()).is_some());
        assert!(path.exists());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_from_config_path_reports_missing_file() {
        let dir = std::env::temp_dir().join("colloquy-bootstrap-missing");
        let transport = Arc::new(RecordingTransport::new());
        let result = BotApp::from_config_path(dir.join("nope.yaml"), transport).await;
        assert!(matches!(result, Err(BootstrapError::Config(_))));
    }
}
