//! Request / Resume - the suspension vocabulary.
//!
//! A handler suspends by handing a [`Request`] to the scheduler and is
//! resumed with a [`Resume`]. The request variant is fixed where the request
//! is built, so the scheduler never inspects payload shapes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::menu::{Menu, MenuBuilder};
use crate::message::{Media, MessageHandle, MessageStyle, Presence, Target};

/// Callback invoked with the handle of every prompt the input protocol sends.
pub type OnSent = Arc<dyn Fn(&MessageHandle) + Send + Sync>;

/// One suspension request.
#[derive(Debug)]
pub enum Request {
    /// Plain text reply
    Text(String),
    Input(InputRequest),
    Send(SendRequest),
    Notify(NotifyRequest),
    Presence(PresenceRequest),
    Menu(MenuRequest),
    /// Fetch the most recently sent message
    FetchLast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Text,
    Input,
    Send,
    Notify,
    Presence,
    Menu,
    FetchLast,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Input => "input",
            Self::Send => "send",
            Self::Notify => "notify",
            Self::Presence => "presence",
            Self::Menu => "menu",
            Self::FetchLast => "fetch_last",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Text(_) => RequestKind::Text,
            Self::Input(_) => RequestKind::Input,
            Self::Send(_) => RequestKind::Send,
            Self::Notify(_) => RequestKind::Notify,
            Self::Presence(_) => RequestKind::Presence,
            Self::Menu(_) => RequestKind::Menu,
            Self::FetchLast => RequestKind::FetchLast,
        }
    }
}

impl From<&str> for Request {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Request {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Request {
    fn from(value: i64) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<InputRequest> for Request {
    fn from(value: InputRequest) -> Self {
        Self::Input(value)
    }
}

impl From<SendRequest> for Request {
    fn from(value: SendRequest) -> Self {
        Self::Send(value)
    }
}

impl From<NotifyRequest> for Request {
    fn from(value: NotifyRequest) -> Self {
        Self::Notify(value)
    }
}

impl From<PresenceRequest> for Request {
    fn from(value: PresenceRequest) -> Self {
        Self::Presence(value)
    }
}

impl From<MenuRequest> for Request {
    fn from(value: MenuRequest) -> Self {
        Self::Menu(value)
    }
}

/// Prompt the caller and wait for a reply.
#[derive(Clone)]
pub struct InputRequest {
    pub prompt: String,
    /// Reply must match; unset accepts the first reply
    pub pattern: Option<Regex>,
    /// `None` uses the configured default, an empty text disables the notice
    pub match_error: Option<String>,
    pub match_error_style: MessageStyle,
    /// Extra attempts after the first one
    pub retries: u32,
    pub timeout: Option<Duration>,
    /// Re-send the prompt before every attempt
    pub keep_asking: bool,
    /// Edit this message instead of sending the prompt anew
    pub edit: Option<MessageHandle>,
    pub style: MessageStyle,
    /// Supersede any wait already pending for the caller
    pub cancel_previous: bool,
    pub on_sent: Option<OnSent>,
}

impl fmt::Debug for InputRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputRequest")
            .field("prompt", &self.prompt)
            .field("pattern", &self.pattern.as_ref().map(Regex::as_str))
            .field("match_error", &self.match_error)
            .field("retries", &self.retries)
            .field("timeout", &self.timeout)
            .field("keep_asking", &self.keep_asking)
            .field("edit", &self.edit)
            .field("cancel_previous", &self.cancel_previous)
            .finish_non_exhaustive()
    }
}

impl InputRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            pattern: None,
            match_error: None,
            match_error_style: MessageStyle::default(),
            retries: 0,
            timeout: None,
            keep_asking: false,
            edit: None,
            style: MessageStyle::default(),
            cancel_previous: false,
            on_sent: None,
        }
    }

    pub fn matching(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Compile `pattern` as a regular expression.
    pub fn pattern(self, pattern: &str) -> Result<Self, regex::Error> {
        Ok(self.matching(Regex::new(pattern)?))
    }

    pub fn match_error(mut self, text: impl Into<String>) -> Self {
        self.match_error = Some(text.into());
        self
    }

    pub fn match_error_style(mut self, style: MessageStyle) -> Self {
        self.match_error_style = style;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn keep_asking(mut self) -> Self {
        self.keep_asking = true;
        self
    }

    pub fn edit(mut self, message: MessageHandle) -> Self {
        self.edit = Some(message);
        self
    }

    pub fn style(mut self, style: MessageStyle) -> Self {
        self.style = style;
        self
    }

    pub fn cancel_previous(mut self) -> Self {
        self.cancel_previous = true;
        self
    }

    pub fn on_sent<F>(mut self, callback: F) -> Self
    where
        F: Fn(&MessageHandle) + Send + Sync + 'static,
    {
        self.on_sent = Some(Arc::new(callback));
        self
    }

    pub fn accepts(&self, text: &str) -> bool {
        self.pattern.as_ref().map(|p| p.is_match(text)).unwrap_or(true)
    }

    /// Total number of prompt-and-wait attempts.
    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// Send (or edit) a message, optionally with media.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendRequest {
    pub text: Option<String>,
    pub edit: Option<MessageHandle>,
    pub media: Option<Media>,
    pub style: MessageStyle,
}

impl SendRequest {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn media(media: Media) -> Self {
        Self {
            media: Some(media),
            ..Self::default()
        }
    }

    /// Edit `message` in place; identical text is a no-op.
    pub fn edit(mut self, message: MessageHandle) -> Self {
        self.edit = Some(message);
        self
    }

    pub fn style(mut self, style: MessageStyle) -> Self {
        self.style = style;
        self
    }
}

/// Render a template and deliver it to third parties.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyRequest {
    pub template: String,
    /// Extra template variables
    pub source: Map<String, Value>,
    pub targets: Vec<Target>,
    pub style: MessageStyle,
}

impl NotifyRequest {
    pub fn new<I, T>(template: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Target>,
    {
        Self {
            template: template.into(),
            source: Map::new(),
            targets: targets.into_iter().map(Into::into).collect(),
            style: MessageStyle::default(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.source.insert(key.into(), value.into());
        self
    }

    pub fn style(mut self, style: MessageStyle) -> Self {
        self.style = style;
        self
    }
}

/// Show a presence indicator, optionally pausing for the grace period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceRequest {
    pub kind: Presence,
    pub wait: bool,
}

impl PresenceRequest {
    pub fn new(kind: Presence) -> Self {
        Self { kind, wait: false }
    }

    pub fn and_wait(mut self) -> Self {
        self.wait = true;
        self
    }
}

/// Where a menu's layout comes from.
#[derive(Clone)]
pub enum MenuSource {
    /// Fixed layout; pressing a button resolves with its value
    Layout(Menu),
    /// Rebuilt on every render
    Builder(Arc<dyn MenuBuilder>),
}

impl fmt::Debug for MenuSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Layout(menu) => f.debug_tuple("Layout").field(menu).finish(),
            Self::Builder(_) => f.write_str("Builder(..)"),
        }
    }
}

/// Show an interactive menu and wait for a selection.
#[derive(Debug, Clone)]
pub struct MenuRequest {
    pub source: MenuSource,
    /// `None` uses the configured default
    pub close_on_timeout: Option<bool>,
    /// Notice the menu is edited to on timeout; unset deletes the menu
    pub timeout_message: Option<String>,
    pub style: MessageStyle,
}

impl MenuRequest {
    pub fn layout(menu: Menu) -> Self {
        Self::from_source(MenuSource::Layout(menu))
    }

    pub fn builder(builder: Arc<dyn MenuBuilder>) -> Self {
        Self::from_source(MenuSource::Builder(builder))
    }

    fn from_source(source: MenuSource) -> Self {
        Self {
            source,
            close_on_timeout: None,
            timeout_message: None,
            style: MessageStyle::default(),
        }
    }

    pub fn close_on_timeout(mut self, close: bool) -> Self {
        self.close_on_timeout = Some(close);
        self
    }

    pub fn timeout_message(mut self, text: impl Into<String>) -> Self {
        self.timeout_message = Some(text.into());
        self
    }

    pub fn style(mut self, style: MessageStyle) -> Self {
        self.style = style;
        self
    }
}

/// Resumption value fed back into a suspended handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Resume {
    /// Nothing to report
    Empty,
    /// Reply text
    Text(String),
    /// The wait was pre-empted by a newer wait or a command
    Superseded,
    /// Input retries were exhausted without a match
    NoMatch,
    Sent(MessageHandle),
    /// Edit skipped because the text was unchanged
    Unchanged,
    /// Menu resolved with a value
    Selected(Value),
    /// Menu closed without a selection
    Dismissed,
    LastMessage(Option<MessageHandle>),
}

impl Resume {
    pub fn is_superseded(&self) -> bool {
        matches!(self, Self::Superseded)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<&MessageHandle> {
        match self {
            Self::Sent(handle) => Some(handle),
            Self::LastMessage(handle) => handle.as_ref(),
            _ => None,
        }
    }

    /// Whether this resumption is a command pre-empting the conversation.
    pub fn is_command(&self, marker: &str) -> bool {
        self.as_text().map(|t| t.starts_with(marker)).unwrap_or(false)
    }

    /// Value form, `None` for the empty-ish variants.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Empty | Self::Superseded | Self::Dismissed | Self::LastMessage(None) => None,
            Self::Text(text) => Some(Value::String(text)),
            Self::NoMatch | Self::Unchanged => Some(Value::Bool(false)),
            Self::Selected(value) => Some(value),
            Self::Sent(handle) | Self::LastMessage(Some(handle)) => {
                serde_json::to_value(handle).ok()
            }
        }
    }
}
