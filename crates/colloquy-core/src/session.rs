//! Session - per-caller identity and inbound events
//!
//! A session key scopes every piece of per-caller state: pending waits,
//! once-records and state slots. It is supplied with each inbound event and
//! never owned by any component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::message::MessageHandle;

/// Chat (conversation target) identifier on the transport.
pub type ChatId = i64;

/// Strongly-typed session key (the caller's stable id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(pub i64);

impl SessionKey {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl From<i64> for SessionKey {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<SessionKey> for i64 {
    fn from(value: SessionKey) -> Self {
        value.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl PartialEq<i64> for SessionKey {
    fn eq(&self, other: &i64) -> bool {
        self.0 == *other
    }
}

/// The remote party talking to the bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    /// Stable id, doubles as the session key
    pub id: SessionKey,
    /// Public handle (username), if the caller has one
    #[serde(default)]
    pub handle: Option<String>,
    /// Preferred language code
    #[serde(default)]
    pub language: Option<String>,
}

impl Caller {
    pub fn new(id: i64) -> Self {
        Self {
            id: SessionKey(id),
            handle: None,
            language: None,
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Handle with any leading `@` removed.
    pub fn bare_handle(&self) -> Option<&str> {
        self.handle
            .as_deref()
            .map(|h| h.strip_prefix('@').unwrap_or(h))
    }

    pub fn language_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.language.as_deref().unwrap_or(fallback)
    }
}

/// What arrived from the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundKind {
    /// A message; `text` is absent for stickers, photos and the like
    Message {
        #[serde(default)]
        text: Option<String>,
    },
    /// A button press carrying its callback data
    ButtonPress {
        data: String,
        #[serde(default)]
        message: Option<MessageHandle>,
    },
}

/// Inbound event - one message or button press from a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub caller: Caller,
    pub chat_id: ChatId,
    pub kind: InboundKind,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    /// Create a text message event
    pub fn message(caller: Caller, chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            caller,
            chat_id,
            kind: InboundKind::Message {
                text: Some(text.into()),
            },
            received_at: Utc::now(),
        }
    }

    /// Create a message event without text
    pub fn non_text(caller: Caller, chat_id: ChatId) -> Self {
        Self {
            caller,
            chat_id,
            kind: InboundKind::Message { text: None },
            received_at: Utc::now(),
        }
    }

    /// Create a button press event
    pub fn button_press(caller: Caller, chat_id: ChatId, data: impl Into<String>) -> Self {
        Self {
            caller,
            chat_id,
            kind: InboundKind::ButtonPress {
                data: data.into(),
                message: None,
            },
            received_at: Utc::now(),
        }
    }

    pub fn session(&self) -> SessionKey {
        self.caller.id
    }

    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            InboundKind::Message { text } => text.as_deref(),
            InboundKind::ButtonPress { .. } => None,
        }
    }

    pub fn button_data(&self) -> Option<&str> {
        match &self.kind {
            InboundKind::ButtonPress { data, .. } => Some(data.as_str()),
            InboundKind::Message { .. } => None,
        }
    }

    /// Whether the text starts with the command marker.
    pub fn is_command(&self, marker: &str) -> bool {
        self.text().map(|t| t.starts_with(marker)).unwrap_or(false)
    }

    /// Command name without marker, arguments or `@bot` suffix.
    pub fn command_name(&self, marker: &str) -> Option<&str> {
        let rest = self.text()?.strip_prefix(marker)?;
        let word = rest.split_whitespace().next()?;
        let name = word.split('@').next().unwrap_or(word);
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }
}
