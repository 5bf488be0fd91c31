//! Outgoing message shapes: handles, styles, media and presence kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::session::ChatId;

/// Maximum number of items the transport accepts in one media group.
pub const MAX_MEDIA_GROUP: usize = 10;

/// Handle to a message the bot has sent.
///
/// Keeps the text it was sent with so an edit with identical content can be
/// skipped without a transport round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHandle {
    pub chat_id: ChatId,
    pub message_id: i64,
    #[serde(default)]
    pub text: Option<String>,
}

impl MessageHandle {
    pub fn new(chat_id: ChatId, message_id: i64, text: Option<String>) -> Self {
        Self {
            chat_id,
            message_id,
            text,
        }
    }

    /// Copy of this handle carrying new text.
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        Self {
            chat_id: self.chat_id,
            message_id: self.message_id,
            text: Some(text.into()),
        }
    }

    pub fn has_text(&self, text: &str) -> bool {
        self.text.as_deref() == Some(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    Markdown,
    Html,
}

/// One inline keyboard button as the transport renders it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardButton {
    /// Callback data delivered back on press
    pub id: String,
    pub text: String,
}

/// Extra styling of an outgoing message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStyle {
    #[serde(default)]
    pub parse_mode: Option<ParseMode>,
    #[serde(default)]
    pub disable_preview: bool,
    #[serde(default)]
    pub silent: bool,
    /// Inline keyboard rows
    #[serde(default)]
    pub keyboard: Vec<Vec<KeyboardButton>>,
}

impl MessageStyle {
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn with_parse_mode(mut self, mode: ParseMode) -> Self {
        self.parse_mode = Some(mode);
        self
    }

    pub fn with_keyboard(mut self, rows: Vec<Vec<KeyboardButton>>) -> Self {
        self.keyboard = rows;
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Same style without any keyboard.
    pub fn without_keyboard(&self) -> Self {
        Self {
            keyboard: Vec::new(),
            ..self.clone()
        }
    }
}

/// One picture of a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    /// URL or local path
    pub source: String,
    #[serde(default)]
    pub caption: Option<String>,
}

impl MediaItem {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            caption: None,
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }
}

/// Media attachment of a send request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Media {
    Photo(MediaItem),
    Gallery { items: Vec<MediaItem> },
}

impl Media {
    pub fn photo(source: impl Into<String>) -> Self {
        Self::Photo(MediaItem::new(source))
    }

    pub fn gallery<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Gallery {
            items: sources.into_iter().map(MediaItem::new).collect(),
        }
    }

    /// Groups as they go over the wire, at most `MAX_MEDIA_GROUP` per group.
    pub fn groups(&self) -> Vec<Vec<MediaItem>> {
        match self {
            Self::Photo(item) => vec![vec![item.clone()]],
            Self::Gallery { items } => items
                .chunks(MAX_MEDIA_GROUP)
                .map(|chunk| chunk.to_vec())
                .collect(),
        }
    }
}

/// Presence indicator shown next to the bot name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Typing,
    UploadPhoto,
    RecordVideo,
    UploadVideo,
    RecordVoice,
    UploadDocument,
    FindLocation,
}

impl Presence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Typing => "typing",
            Self::UploadPhoto => "upload_photo",
            Self::RecordVideo => "record_video",
            Self::UploadVideo => "upload_video",
            Self::RecordVoice => "record_voice",
            Self::UploadDocument => "upload_document",
            Self::FindLocation => "find_location",
        }
    }
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recipient of a notification: an id or a handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Target {
    Id(i64),
    Handle(String),
}

impl From<i64> for Target {
    fn from(value: i64) -> Self {
        Self::Id(value)
    }
}

impl From<&str> for Target {
    fn from(value: &str) -> Self {
        Self::Handle(value.to_string())
    }
}

impl From<String> for Target {
    fn from(value: String) -> Self {
        Self::Handle(value)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => id.fmt(f),
            Self::Handle(handle) => f.write_str(handle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gallery_splits_at_ten() {
        let media = Media::gallery((0..23).map(|i| format!("https://img/{i}.png")));
        let groups = media.groups();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].len(), 10);
        assert_eq!(groups[1].len(), 10);
        assert_eq!(groups[2].len(), 3);
        assert_eq!(groups[2][0].source, "https://img/20.png");
    }

    #[test]
    fn test_handle_text_compare() {
        let handle = MessageHandle::new(1, 2, Some("hi".into()));
        assert!(handle.has_text("hi"));
        assert!(!handle.has_text("hey"));
        assert!(handle.with_text("hey").has_text("hey"));
    }
}
