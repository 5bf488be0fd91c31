//! # Colloquy Config
//!
//! Single-file configuration for a colloquy bot.
//! One `colloquy.yaml` configures the runtime knobs, the menu defaults,
//! engine message texts, translations and observability.

mod loader;

pub use loader::{load_config, parse_config, ConfigError, ConfigManager};

use std::collections::HashMap;

use serde::Deserialize;

/// Top-level configuration schema.
#[derive(Debug, Clone, Deserialize)]
pub struct ColloquyConfig {
    /// Config schema version.
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub menu: MenuConfig,
    #[serde(default)]
    pub messages: MessagesConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    /// `language -> key -> text`
    #[serde(default)]
    pub translations: HashMap<String, HashMap<String, String>>,
}

fn default_version() -> u32 {
    1
}

impl Default for ColloquyConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            app: AppConfig::default(),
            runtime: RuntimeConfig::default(),
            menu: MenuConfig::default(),
            messages: MessagesConfig::default(),
            observability: ObservabilityConfig::default(),
            translations: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            environment: default_env(),
        }
    }
}

fn default_app_name() -> String {
    "colloquy".to_string()
}

fn default_env() -> String {
    "development".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Prefix marking a command (`/start`)
    #[serde(default = "default_command_marker")]
    pub command_marker: String,
    /// Pause after a presence indicator asked to wait
    #[serde(default = "default_presence_grace_ms")]
    pub presence_grace_ms: u64,
    #[serde(default = "default_language")]
    pub default_language: String,
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
    /// Verify that every translation carries the same keys
    #[serde(default = "default_true")]
    pub translation_key_check: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command_marker: default_command_marker(),
            presence_grace_ms: default_presence_grace_ms(),
            default_language: default_language(),
            event_bus_capacity: default_event_bus_capacity(),
            translation_key_check: true,
        }
    }
}

fn default_command_marker() -> String {
    "/".to_string()
}

fn default_presence_grace_ms() -> u64 {
    5_000
}

fn default_language() -> String {
    "en".to_string()
}

fn default_event_bus_capacity() -> usize {
    256
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct MenuConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_next_text")]
    pub next_text: String,
    #[serde(default = "default_prev_text")]
    pub prev_text: String,
    #[serde(default = "default_close_text")]
    pub close_text: String,
    #[serde(default = "default_true")]
    pub use_close_button: bool,
    #[serde(default = "default_true")]
    pub close_on_timeout: bool,
    #[serde(default = "default_menu_template")]
    pub template: String,
}

impl Default for MenuConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            next_text: default_next_text(),
            prev_text: default_prev_text(),
            close_text: default_close_text(),
            use_close_button: true,
            close_on_timeout: true,
            template: default_menu_template(),
        }
    }
}

fn default_page_size() -> usize {
    5
}

fn default_next_text() -> String {
    "➡️".to_string()
}

fn default_prev_text() -> String {
    "⬅️".to_string()
}

fn default_close_text() -> String {
    "❌".to_string()
}

fn default_menu_template() -> String {
    "Choose option".to_string()
}

/// Engine texts; each is a translation key falling back to itself.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagesConfig {
    #[serde(default = "default_timeout_message")]
    pub timeout: String,
    #[serde(default = "default_match_error")]
    pub match_error: String,
    /// Sent when a once-limited trigger is denied; unset sends nothing
    #[serde(default)]
    pub blocked: Option<String>,
    /// Sent when `only_for` denies a caller; unset sends nothing
    #[serde(default)]
    pub unauthorized: Option<String>,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout_message(),
            match_error: default_match_error(),
            blocked: None,
            unauthorized: None,
        }
    }
}

fn default_timeout_message() -> String {
    "Timed out".to_string()
}

fn default_match_error() -> String {
    "Invalid Input".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
