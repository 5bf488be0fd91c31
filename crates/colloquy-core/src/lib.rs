//! # Colloquy Core
//!
//! Core data model for the colloquy conversation engine.
//!
//! This crate contains:
//! - Session keys, callers and inbound events
//! - Outgoing message handles, styles, media and presence kinds
//! - The suspension vocabulary handlers yield (`Request` / `Resume`)
//! - Menu layouts and pagination math
//! - The `Transport` seam and the error taxonomy
//!
//! This crate does NOT care about:
//! - How handlers are scheduled
//! - Who delivers messages on the wire
//! - Where per-caller state lives

pub mod error;
pub mod event;
pub mod i18n;
pub mod menu;
pub mod message;
pub mod once;
pub mod request;
pub mod session;
pub mod transport;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::ConversationError;
    pub use crate::event::{BotEvent, EventKind};
    pub use crate::i18n::TranslationTable;
    pub use crate::menu::{
        Button, ButtonReaction, Menu, MenuBuilder, MenuControl, MenuSignal, MenuStatus,
    };
    pub use crate::message::{
        KeyboardButton, Media, MediaItem, MessageHandle, MessageStyle, ParseMode, Presence,
        Target,
    };
    pub use crate::once::{OnceMark, OnceRecord, OnceRule};
    pub use crate::request::{
        InputRequest, MenuRequest, MenuSource, NotifyRequest, PresenceRequest, Request,
        RequestKind, Resume, SendRequest,
    };
    pub use crate::session::{Caller, ChatId, InboundEvent, InboundKind, SessionKey};
    pub use crate::transport::{Transport, TransportError};
}

pub use error::ConversationError;
pub use event::{BotEvent, EventKind};
pub use i18n::{TranslationError, TranslationTable};
pub use menu::{Button, ButtonReaction, Menu, MenuBuilder, MenuControl, MenuSignal, MenuStatus};
pub use message::{
    KeyboardButton, Media, MediaItem, MessageHandle, MessageStyle, ParseMode, Presence, Target,
};
pub use once::{OnceMark, OnceRecord, OnceRule};
pub use request::{
    InputRequest, MenuRequest, MenuSource, NotifyRequest, OnSent, PresenceRequest, Request,
    RequestKind, Resume, SendRequest,
};
pub use session::{Caller, ChatId, InboundEvent, InboundKind, SessionKey};
pub use transport::{Transport, TransportError};
