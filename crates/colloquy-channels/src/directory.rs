use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use colloquy_core::ChatId;

/// Resolves `@handle` notification targets to chat ids.
#[async_trait]
pub trait HandleDirectory: Send + Sync {
    async fn chat_id(&self, handle: &str) -> Option<ChatId>;
    async fn bind(&self, handle: &str, chat_id: ChatId);
}

#[derive(Default)]
pub struct InMemoryHandleDirectory {
    bindings: RwLock<HashMap<String, ChatId>>,
}

impl InMemoryHandleDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HandleDirectory for InMemoryHandleDirectory {
    async fn chat_id(&self, handle: &str) -> Option<ChatId> {
        let bindings = self.bindings.read().await;
        bindings.get(handle.trim_start_matches('@')).copied()
    }

    async fn bind(&self, handle: &str, chat_id: ChatId) {
        let mut bindings = self.bindings.write().await;
        bindings.insert(handle.trim_start_matches('@').to_string(), chat_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handles_match_with_or_without_at() {
        let directory = InMemoryHandleDirectory::new();
        directory.bind("@alice", 5).await;
        assert_eq!(directory.chat_id("alice").await, Some(5));
        assert_eq!(directory.chat_id("@alice").await, Some(5));
        assert_eq!(directory.chat_id("@bob").await, None);
    }
}
