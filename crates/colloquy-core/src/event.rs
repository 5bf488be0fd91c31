//! Diagnostic events emitted by the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Origin of a diagnostic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Raised by the engine itself
    Internal,
    /// Raised on behalf of the remote party
    External,
}

/// BotEvent - one diagnostic fact (`command.call`, `prop.expired`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotEvent {
    pub name: String,
    pub kind: EventKind,
    #[serde(default)]
    pub data: Option<String>,
    pub at: DateTime<Utc>,
}

impl BotEvent {
    pub fn internal(name: impl Into<String>, data: Option<String>) -> Self {
        Self {
            name: name.into(),
            kind: EventKind::Internal,
            data,
            at: Utc::now(),
        }
    }

    pub fn external(name: impl Into<String>, data: Option<String>) -> Self {
        Self {
            name: name.into(),
            kind: EventKind::External,
            data,
            at: Utc::now(),
        }
    }

    /// Event carrying structured data, flattened to a JSON string.
    pub fn internal_json(name: impl Into<String>, data: &serde_json::Value) -> Self {
        let data = match data {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self::internal(name, Some(data))
    }
}
