//! # Colloquy Runtime
//!
//! Conversation orchestration for colloquy bots.
//!
//! This crate contains:
//! - WaitingRegistry (one pending wait per caller)
//! - ExecutionGate (authorization and once-semantics)
//! - Scheduler (drives handlers as coroutines over a suspension channel)
//! - The input-wait protocol and the menu engine with paginated options
//! - Router (trigger table and inbound pipeline) and bootstrap
//!
//! This crate does NOT care about:
//! - How messages travel on the wire (see `Transport`)
//! - Persisting conversations across restarts

pub mod bootstrap;
pub mod context;
pub mod conversation;
pub mod execution;
pub mod gate;
pub mod hooks;
mod input;
pub mod menu;
pub mod notify;
pub mod options;
pub mod router;
pub mod scheduler;
pub mod settings;
pub mod trigger;
pub mod waiting;

pub use bootstrap::{build_translations, BootstrapError, BotApp};
pub use context::{EngineBuilder, EngineContext};
pub use conversation::{Conversation, Invocation, Suspension};
pub use execution::{Execution, ExecutionSlot, ExecutionState, ExecutionTable};
pub use gate::ExecutionGate;
pub use hooks::{BotHook, HookContext, HookRegistry};
pub use menu::MenuRouter;
pub use notify::{NotifyFailure, NotifyReport};
pub use options::{InlineOptions, MenuTemplate};
pub use router::{Dispatch, Router};
pub use scheduler::{CommandTicket, RunOutcome, Scheduler};
pub use settings::{MenuDefaults, Settings};
pub use trigger::{
    handler_fn, BlockedContext, BlockedNotice, Handler, HandlerError, HandlerResult, OnlyFor,
    Pattern, Trigger, TriggerKind, TriggerOptions,
};
pub use waiting::{Predicate, WaitOutcome, Waiter, WaitingRegistry};
