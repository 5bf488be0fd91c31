use std::time::Duration;

use colloquy_config::ColloquyConfig;

/// Engine-wide knobs resolved from [`ColloquyConfig`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub command_marker: String,
    pub presence_grace: Duration,
    pub default_language: String,
    pub timeout_message: String,
    pub match_error: String,
    pub blocked_message: Option<String>,
    pub unauthorized_message: Option<String>,
    pub menu: MenuDefaults,
}

/// Defaults for paginated menus.
#[derive(Debug, Clone)]
pub struct MenuDefaults {
    pub page_size: usize,
    pub next_text: String,
    pub prev_text: String,
    pub close_text: String,
    pub use_close_button: bool,
    pub close_on_timeout: bool,
    pub template: String,
}

impl From<&ColloquyConfig> for Settings {
    fn from(config: &ColloquyConfig) -> Self {
        Self {
            command_marker: config.runtime.command_marker.clone(),
            presence_grace: Duration::from_millis(config.runtime.presence_grace_ms),
            default_language: config.runtime.default_language.clone(),
            timeout_message: config.messages.timeout.clone(),
            match_error: config.messages.match_error.clone(),
            blocked_message: config.messages.blocked.clone(),
            unauthorized_message: config.messages.unauthorized.clone(),
            menu: MenuDefaults {
                page_size: config.menu.page_size,
                next_text: config.menu.next_text.clone(),
                prev_text: config.menu.prev_text.clone(),
                close_text: config.menu.close_text.clone(),
                use_close_button: config.menu.use_close_button,
                close_on_timeout: config.menu.close_on_timeout,
                template: config.menu.template.clone(),
            },
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from(&ColloquyConfig::default())
    }
}

impl Default for MenuDefaults {
    fn default() -> Self {
        Settings::default().menu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_menu_defaults_follow_config_defaults() {
        let config = ColloquyConfig::default();
        let defaults = MenuDefaults::default();
        assert_eq!(defaults.page_size, config.menu.page_size);
        assert_eq!(defaults.template, config.menu.template);
        assert_eq!(defaults.close_on_timeout, config.menu.close_on_timeout);
    }
}
