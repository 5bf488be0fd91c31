//! Transport - the outbound half of the external messaging client.
//!
//! Implementations live outside the engine (see `colloquy-stores` for the
//! in-memory recorder and `colloquy-channels` for the console).

use async_trait::async_trait;
use thiserror::Error;

use crate::message::{Media, MessageHandle, MessageStyle, Presence, Target};
use crate::session::ChatId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("target not found: {0}")]
    NotFound(String),
    #[error("rejected by remote: {0}")]
    Rejected(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Transport trait - async interface for delivering messages.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a text message to a chat or a notification target.
    async fn send_text(
        &self,
        target: &Target,
        text: &str,
        style: &MessageStyle,
    ) -> Result<MessageHandle, TransportError>;

    /// Replace the text (and keyboard) of a previously sent message.
    async fn edit_text(
        &self,
        message: &MessageHandle,
        text: &str,
        style: &MessageStyle,
    ) -> Result<MessageHandle, TransportError>;

    /// Send one media group; returns one handle per delivered item.
    async fn send_media(
        &self,
        chat_id: ChatId,
        media: &Media,
        style: &MessageStyle,
    ) -> Result<Vec<MessageHandle>, TransportError>;

    async fn set_presence(&self, chat_id: ChatId, kind: Presence) -> Result<(), TransportError>;

    /// Returns `false` when the message was already gone.
    async fn delete_message(&self, message: &MessageHandle) -> Result<bool, TransportError>;
}
