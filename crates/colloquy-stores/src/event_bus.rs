//! EventBus - diagnostic event fan-out.
//!
//! Gate denials, slot lifecycle changes, command calls and timeouts are all
//! published here. Nobody has to listen.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::broadcast;

use colloquy_core::BotEvent;

use crate::StoreError;

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: BotEvent) -> Result<(), StoreError>;

    /// Every event published from now on.
    fn subscribe(&self) -> broadcast::Receiver<BotEvent>;
}

/// Bus over a tokio broadcast channel. Slow subscribers lose the oldest
/// events once `capacity` is exceeded.
pub struct BroadcastEventBus {
    sender: broadcast::Sender<BotEvent>,
    published: AtomicU64,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            published: AtomicU64::new(0),
        }
    }

    /// Events published since creation, listened to or not.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Only events whose dotted name starts with `topic`
    /// (`"command"` matches `command.call` and `command.cancel`).
    pub fn subscribe_topic(&self, topic: impl Into<String>) -> TopicReceiver {
        TopicReceiver {
            topic: topic.into(),
            inner: self.sender.subscribe(),
        }
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    async fn publish(&self, event: BotEvent) -> Result<(), StoreError> {
        self.published.fetch_add(1, Ordering::Relaxed);
        if self.sender.send(event).is_err() {
            tracing::trace!("diagnostic event dropped, no subscribers");
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.sender.subscribe()
    }
}

/// Receiver that skips events outside one topic.
pub struct TopicReceiver {
    topic: String,
    inner: broadcast::Receiver<BotEvent>,
}

impl TopicReceiver {
    /// Next matching event; `None` once the bus is gone. Lagging skips
    /// the lost events instead of failing.
    pub async fn recv(&mut self) -> Option<BotEvent> {
        loop {
            match self.inner.recv().await {
                Ok(event) if in_topic(&event.name, &self.topic) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!(topic = %self.topic, missed, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

fn in_topic(name: &str, topic: &str) -> bool {
    match name.strip_prefix(topic) {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}
