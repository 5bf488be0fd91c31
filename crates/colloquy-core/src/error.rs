//! Conversation error taxonomy.
//!
//! `Superseded` is deliberately absent: a pre-empted wait resumes with
//! [`Resume::Superseded`](crate::request::Resume::Superseded), not an error.

use thiserror::Error;

use crate::transport::TransportError;

/// Errors delivered at a suspension point or raised by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversationError {
    /// No reply or selection within the configured window
    #[error("Timeout")]
    Timeout,

    /// A conditional wait's predicate rejected the event
    #[error("Condition is not met")]
    ConditionUnmet,

    /// A second unconditioned wait was requested for a waiting session
    #[error("The user is already waited")]
    AlreadyWaiting,

    /// A wait was force-failed with an explicit reason
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Menu error: {0}")]
    Menu(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The scheduler driving this conversation went away
    #[error("Conversation closed")]
    Closed,
}

impl ConversationError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}
