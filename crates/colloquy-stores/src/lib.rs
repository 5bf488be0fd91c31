//! # Colloquy Stores
//!
//! In-memory store implementations for the colloquy runtime.
//!
//! This crate provides:
//! - SessionStateStore (per-caller slots, once records, counters)
//! - In-process EventBus for diagnostic events
//! - RecordingTransport for tests and demos

mod error;
mod event_bus;
mod session_store;
mod transport;

pub use error::StoreError;
pub use event_bus::{BroadcastEventBus, EventBus, TopicReceiver};
pub use session_store::{SessionStateStore, SlotSettings};
pub use transport::{Outgoing, RecordingTransport};

// Re-export core types for convenience
pub use colloquy_core::{BotEvent, EventKind, OnceRule, SessionKey};
