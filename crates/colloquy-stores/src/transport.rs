//! RecordingTransport - in-memory transport that keeps every outgoing call.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, RwLock};

use colloquy_core::{
    ChatId, Media, MessageHandle, MessageStyle, Presence, Target, Transport, TransportError,
};

/// One recorded outgoing call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Text {
        chat_id: ChatId,
        message_id: i64,
        text: String,
        style: MessageStyle,
    },
    Edit {
        chat_id: ChatId,
        message_id: i64,
        text: String,
        style: MessageStyle,
    },
    Media {
        chat_id: ChatId,
        count: usize,
    },
    Presence {
        chat_id: ChatId,
        kind: Presence,
    },
    Delete {
        chat_id: ChatId,
        message_id: i64,
    },
}

impl Outgoing {
    pub fn chat_id(&self) -> ChatId {
        match self {
            Self::Text { chat_id, .. }
            | Self::Edit { chat_id, .. }
            | Self::Media { chat_id, .. }
            | Self::Presence { chat_id, .. }
            | Self::Delete { chat_id, .. } => *chat_id,
        }
    }

    /// Text of a send or edit.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } | Self::Edit { text, .. } => Some(text.as_str()),
            _ => None,
        }
    }
}

/// Transport that records calls instead of delivering them.
///
/// Handles resolve through [`register_handle`](Self::register_handle);
/// unknown handles and targets marked failing are reported as errors.
pub struct RecordingTransport {
    outgoing: RwLock<Vec<Outgoing>>,
    live: RwLock<HashSet<(ChatId, i64)>>,
    handles: RwLock<HashMap<String, ChatId>>,
    failing: RwLock<HashSet<ChatId>>,
    next_id: AtomicI64,
    changed: Notify,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            outgoing: RwLock::new(Vec::new()),
            live: RwLock::new(HashSet::new()),
            handles: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashSet::new()),
            next_id: AtomicI64::new(1),
            changed: Notify::new(),
        }
    }

    pub async fn register_handle(&self, handle: impl Into<String>, chat_id: ChatId) {
        let handle = handle.into();
        let handle = handle.trim_start_matches('@').to_string();
        self.handles.write().await.insert(handle, chat_id);
    }

    /// Make every delivery to `chat_id` fail.
    pub async fn fail_chat(&self, chat_id: ChatId) {
        self.failing.write().await.insert(chat_id);
    }

    pub async fn outgoing(&self) -> Vec<Outgoing> {
        self.outgoing.read().await.clone()
    }

    pub async fn outgoing_to(&self, chat_id: ChatId) -> Vec<Outgoing> {
        self.outgoing
            .read()
            .await
            .iter()
            .filter(|o| o.chat_id() == chat_id)
            .cloned()
            .collect()
    }

    /// Texts of sends and edits, in order.
    pub async fn texts(&self) -> Vec<String> {
        self.outgoing
            .read()
            .await
            .iter()
            .filter_map(|o| o.text().map(str::to_string))
            .collect()
    }

    pub async fn last(&self) -> Option<Outgoing> {
        self.outgoing.read().await.last().cloned()
    }

    pub async fn count(&self) -> usize {
        self.outgoing.read().await.len()
    }

    /// Wait until at least `count` calls were recorded, or `limit` elapses.
    pub async fn wait_for(&self, count: usize, limit: Duration) -> bool {
        let waiting = async {
            loop {
                let notified = self.changed.notified();
                if self.count().await >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(limit, waiting).await.is_ok()
    }

    pub async fn is_live(&self, message: &MessageHandle) -> bool {
        self.live
            .read()
            .await
            .contains(&(message.chat_id, message.message_id))
    }

    async fn resolve(&self, target: &Target) -> Result<ChatId, TransportError> {
        let chat_id = match target {
            Target::Id(id) => *id,
            Target::Handle(handle) => {
                let handle = handle.trim_start_matches('@');
                *self
                    .handles
                    .read()
                    .await
                    .get(handle)
                    .ok_or_else(|| TransportError::NotFound(format!("@{handle}")))?
            }
        };
        self.check(chat_id).await?;
        Ok(chat_id)
    }

    async fn check(&self, chat_id: ChatId) -> Result<(), TransportError> {
        if self.failing.read().await.contains(&chat_id) {
            return Err(TransportError::Rejected(format!("chat {chat_id} is blocked")));
        }
        Ok(())
    }

    async fn record(&self, entry: Outgoing) {
        self.outgoing.write().await.push(entry);
        self.changed.notify_waiters();
    }

    fn next_message_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_text(
        &self,
        target: &Target,
        text: &str,
        style: &MessageStyle,
    ) -> Result<MessageHandle, TransportError> {
        let chat_id = self.resolve(target).await?;
        let message_id = self.next_message_id();
        self.live.write().await.insert((chat_id, message_id));
        self.record(Outgoing::Text {
            chat_id,
            message_id,
            text: text.to_string(),
            style: style.clone(),
        })
        .await;
        Ok(MessageHandle::new(chat_id, message_id, Some(text.to_string())))
    }

    async fn edit_text(
        &self,
        message: &MessageHandle,
        text: &str,
        style: &MessageStyle,
    ) -> Result<MessageHandle, TransportError> {
        self.check(message.chat_id).await?;
        if !self.is_live(message).await {
            return Err(TransportError::NotFound(format!(
                "message {} in chat {}",
                message.message_id, message.chat_id
            )));
        }
        self.record(Outgoing::Edit {
            chat_id: message.chat_id,
            message_id: message.message_id,
            text: text.to_string(),
            style: style.clone(),
        })
        .await;
        Ok(message.with_text(text))
    }

    async fn send_media(
        &self,
        chat_id: ChatId,
        media: &Media,
        _style: &MessageStyle,
    ) -> Result<Vec<MessageHandle>, TransportError> {
        self.check(chat_id).await?;
        let groups = media.groups();
        let Some(group) = groups.first() else {
            return Ok(Vec::new());
        };
        let mut handles = Vec::with_capacity(group.len());
        for item in group {
            let message_id = self.next_message_id();
            self.live.write().await.insert((chat_id, message_id));
            handles.push(MessageHandle::new(chat_id, message_id, item.caption.clone()));
        }
        self.record(Outgoing::Media {
            chat_id,
            count: group.len(),
        })
        .await;
        Ok(handles)
    }

    async fn set_presence(&self, chat_id: ChatId, kind: Presence) -> Result<(), TransportError> {
        self.check(chat_id).await?;
        self.record(Outgoing::Presence { chat_id, kind }).await;
        Ok(())
    }

    async fn delete_message(&self, message: &MessageHandle) -> Result<bool, TransportError> {
        let removed = self
            .live
            .write()
            .await
            .remove(&(message.chat_id, message.message_id));
        if removed {
            self.record(Outgoing::Delete {
                chat_id: message.chat_id,
                message_id: message.message_id,
            })
            .await;
        }
        Ok(removed)
    }
}
