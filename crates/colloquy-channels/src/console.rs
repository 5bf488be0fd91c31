//! ConsoleTransport - renders outgoing messages as plain text lines.

use std::collections::HashSet;
use std::io::Write;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::RwLock;

use colloquy_core::{
    ChatId, Media, MessageHandle, MessageStyle, Presence, Target, Transport, TransportError,
};

use crate::directory::{HandleDirectory, InMemoryHandleDirectory};

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Transport that prints every message to a writer (stdout by default).
///
/// Message ids are local counters; a message is live until deleted, so
/// edits and deletes of unknown ids fail like they would remotely.
pub struct ConsoleTransport {
    out: SharedWriter,
    directory: Arc<dyn HandleDirectory>,
    live: RwLock<HashSet<(ChatId, i64)>>,
    next_id: AtomicI64,
}

impl ConsoleTransport {
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
            directory: Arc::new(InMemoryHandleDirectory::new()),
            live: RwLock::new(HashSet::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn with_directory(mut self, directory: Arc<dyn HandleDirectory>) -> Self {
        self.directory = directory;
        self
    }

    pub fn directory(&self) -> &Arc<dyn HandleDirectory> {
        &self.directory
    }

    fn emit(&self, lines: &[String]) -> Result<(), TransportError> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| TransportError::Network("console writer poisoned".to_string()))?;
        for line in lines {
            writeln!(out, "{line}").map_err(|err| TransportError::Network(err.to_string()))?;
        }
        out.flush()
            .map_err(|err| TransportError::Network(err.to_string()))
    }

    async fn resolve(&self, target: &Target) -> Result<ChatId, TransportError> {
        match target {
            Target::Id(id) => Ok(*id),
            Target::Handle(handle) => self
                .directory
                .chat_id(handle)
                .await
                .ok_or_else(|| TransportError::NotFound(handle.clone())),
        }
    }

    async fn ensure_live(&self, message: &MessageHandle) -> Result<(), TransportError> {
        if self
            .live
            .read()
            .await
            .contains(&(message.chat_id, message.message_id))
        {
            Ok(())
        } else {
            Err(TransportError::NotFound(format!(
                "message {} in chat {}",
                message.message_id, message.chat_id
            )))
        }
    }

    async fn open(&self, chat_id: ChatId) -> i64 {
        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.live.write().await.insert((chat_id, message_id));
        message_id
    }
}

/// Lines for one text message: a header line, the body, then one line per
/// keyboard row with the callback data to type after `!`.
pub fn render_text(label: &str, text: &str, style: &MessageStyle) -> Vec<String> {
    let mut lines = vec![label.to_string()];
    lines.extend(text.lines().map(|line| format!("  {line}")));
    for row in &style.keyboard {
        let buttons: Vec<String> = row
            .iter()
            .map(|button| format!("[{}] !{}", button.text, button.id))
            .collect();
        lines.push(format!("  {}", buttons.join("  ")));
    }
    lines
}

#[async_trait]
impl Transport for ConsoleTransport {
    async fn send_text(
        &self,
        target: &Target,
        text: &str,
        style: &MessageStyle,
    ) -> Result<MessageHandle, TransportError> {
        let chat_id = self.resolve(target).await?;
        let message_id = self.open(chat_id).await;
        self.emit(&render_text(&format!("bot #{message_id}:"), text, style))?;
        Ok(MessageHandle::new(chat_id, message_id, Some(text.to_string())))
    }

    async fn edit_text(
        &self,
        message: &MessageHandle,
        text: &str,
        style: &MessageStyle,
    ) -> Result<MessageHandle, TransportError> {
        self.ensure_live(message).await?;
        self.emit(&render_text(
            &format!("bot #{} (edited):", message.message_id),
            text,
            style,
        ))?;
        Ok(message.with_text(text))
    }

    async fn send_media(
        &self,
        chat_id: ChatId,
        media: &Media,
        _style: &MessageStyle,
    ) -> Result<Vec<MessageHandle>, TransportError> {
        let groups = media.groups();
        let Some(group) = groups.first() else {
            return Ok(Vec::new());
        };
        let mut handles = Vec::with_capacity(group.len());
        let mut lines = Vec::with_capacity(group.len());
        for item in group {
            let message_id = self.open(chat_id).await;
            let caption = item
                .caption
                .as_deref()
                .map(|c| format!(" {c}"))
                .unwrap_or_default();
            lines.push(format!("bot #{message_id}: <picture {}>{caption}", item.source));
            handles.push(MessageHandle::new(chat_id, message_id, item.caption.clone()));
        }
        self.emit(&lines)?;
        Ok(handles)
    }

    async fn set_presence(&self, _chat_id: ChatId, kind: Presence) -> Result<(), TransportError> {
        self.emit(&[format!("bot is {kind}...")])
    }

    async fn delete_message(&self, message: &MessageHandle) -> Result<bool, TransportError> {
        let removed = self
            .live
            .write()
            .await
            .remove(&(message.chat_id, message.message_id));
        if removed {
            self.emit(&[format!("bot #{} (deleted)", message.message_id)])?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_core::KeyboardButton;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Buffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn transport() -> (Buffer, ConsoleTransport) {
        let buffer = Buffer::default();
        (buffer.clone(), ConsoleTransport::with_writer(Box::new(buffer)))
    }

    #[test]
    fn test_render_text_lists_buttons_with_their_data() {
        let style = MessageStyle::plain().with_keyboard(vec![vec![
            KeyboardButton {
                id: "0".to_string(),
                text: "red".to_string(),
            },
            KeyboardButton {
                id: "1".to_string(),
                text: "blue".to_string(),
            },
        ]]);
        let lines = render_text("bot #1:", "Pick one\nquickly", &style);
        assert_eq!(
            lines,
            vec!["bot #1:", "  Pick one", "  quickly", "  [red] !0  [blue] !1"]
        );
    }

    #[tokio::test]
    async fn test_edit_and_delete_need_a_live_message() {
        let (buffer, transport) = transport();
        let sent = transport
            .send_text(&Target::Id(3), "hello", &MessageStyle::plain())
            .await
            .unwrap();
        let edited = transport
            .edit_text(&sent, "hello again", &MessageStyle::plain())
            .await
            .unwrap();
        assert!(edited.has_text("hello again"));

        assert!(transport.delete_message(&sent).await.unwrap());
        assert!(!transport.delete_message(&sent).await.unwrap());
        let err = transport
            .edit_text(&sent, "too late", &MessageStyle::plain())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotFound(_)));

        let printed = buffer.contents();
        assert!(printed.contains("bot #1:\n  hello\n"));
        assert!(printed.contains("bot #1 (edited):\n  hello again\n"));
        assert_eq!(printed.matches("(deleted)").count(), 1);
    }

    #[tokio::test]
    async fn test_handles_resolve_through_directory() {
        let (_buffer, transport) = transport();
        let err = transport
            .send_text(&Target::from("@ops"), "ping", &MessageStyle::plain())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotFound(_)));

        transport.directory().bind("ops", 42).await;
        let sent = transport
            .send_text(&Target::from("@ops"), "ping", &MessageStyle::plain())
            .await
            .unwrap();
        assert_eq!(sent.chat_id, 42);
    }
}
