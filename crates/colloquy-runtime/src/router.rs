//! Router - the trigger table and the inbound pipeline.
//!
//! Inbound events are handled in this order:
//! 1. button presses go to live menus, then to action triggers
//! 2. command text supersedes a pending wait unless its owner ignores
//!    commands, then runs the command after the caller's older command
//!    has yielded
//! 3. other text resolves the caller's pending wait, or runs the first
//!    matching text trigger

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;

use colloquy_core::{Caller, ChatId, InboundEvent, InboundKind};

use crate::context::EngineContext;
use crate::execution::ExecutionSlot;
use crate::scheduler::{RunOutcome, Scheduler};
use crate::trigger::{Handler, Pattern, Trigger, TriggerKind};

/// What became of one inbound event.
#[derive(Debug)]
pub enum Dispatch {
    /// A trigger started running
    Started(JoinHandle<RunOutcome>),
    /// A pending wait or a live menu took the event
    Consumed,
    /// Nobody was listening
    Ignored,
}

impl Dispatch {
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }

    /// Wait for the started trigger, if any.
    pub async fn finished(self) -> Option<RunOutcome> {
        match self {
            Self::Started(handle) => Some(handle.await.unwrap_or_else(|err| RunOutcome::Failed {
                error: err.to_string(),
                handled: false,
            })),
            Self::Consumed | Self::Ignored => None,
        }
    }
}

pub struct Router {
    scheduler: Scheduler,
    commands: HashMap<String, Trigger>,
    actions: Vec<Trigger>,
    hears: Vec<Trigger>,
    generic: HashMap<String, Trigger>,
}

impl Router {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            scheduler: Scheduler::new(ctx),
            commands: HashMap::new(),
            actions: Vec::new(),
            hears: Vec::new(),
            generic: HashMap::new(),
        }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        self.scheduler.context()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Register a trigger; a command or generic trigger with the same name
    /// is replaced.
    pub fn register(&mut self, trigger: Trigger) -> &mut Self {
        tracing::debug!(kind = %trigger.kind, name = %trigger.name, "trigger registered");
        match trigger.kind {
            TriggerKind::Command => {
                self.commands.insert(trigger.name.clone(), trigger);
            }
            TriggerKind::Action => self.actions.push(trigger),
            TriggerKind::Hears => self.hears.push(trigger),
            TriggerKind::Generic => {
                self.generic.insert(trigger.name.clone(), trigger);
            }
        }
        self
    }

    pub fn command(&mut self, name: impl Into<String>, handler: Arc<dyn Handler>) -> &mut Self {
        self.register(Trigger::command(name, handler))
    }

    pub fn action(&mut self, pattern: Pattern, handler: Arc<dyn Handler>) -> &mut Self {
        self.register(Trigger::action(pattern, handler))
    }

    pub fn hears(&mut self, pattern: Pattern, handler: Arc<dyn Handler>) -> &mut Self {
        self.register(Trigger::hears(pattern, handler))
    }

    pub fn generic(&mut self, name: impl Into<String>, handler: Arc<dyn Handler>) -> &mut Self {
        self.register(Trigger::generic(name, handler))
    }

    /// Names of the registered commands, sorted.
    pub fn command_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run a generic trigger by name.
    pub async fn run_generic(&self, name: &str, caller: Caller, chat_id: ChatId) -> Option<RunOutcome> {
        let trigger = self.generic.get(name)?;
        Some(self.scheduler.run_generic(trigger, caller, chat_id).await)
    }

    pub async fn dispatch(&self, event: InboundEvent) -> Dispatch {
        let ctx = self.context();
        let key = event.session();
        let marker = ctx.settings().command_marker.clone();

        if let InboundKind::ButtonPress { data, message } = &event.kind {
            if ctx.menus().route(key, data, message.as_ref()).await {
                return Dispatch::Consumed;
            }
            let Some(trigger) = self
                .actions
                .iter()
                .find(|t| t.pattern.as_ref().is_some_and(|p| p.is_match(data)))
            else {
                tracing::debug!(session = %key, data = %data, "button press ignored");
                return Dispatch::Ignored;
            };
            let scheduler = self.scheduler.clone();
            let trigger = trigger.clone();
            return Dispatch::Started(tokio::spawn(async move {
                scheduler.run_action(&trigger, &event).await
            }));
        }

        if event.is_command(&marker) {
            if ctx.waiting().is_waiting(key).await {
                let owner_ignores = ctx
                    .executions()
                    .input_owner(key)
                    .await
                    .is_some_and(|owner| owner.ignore_commands);
                if owner_ignores {
                    ctx.waiting().resolve(key, event).await;
                    return Dispatch::Consumed;
                }
            }

            let command = event
                .command_name(&marker)
                .and_then(|name| self.commands.get(name));
            if let Some(trigger) = command {
                // queued before spawning so commands start in arrival order
                let ticket = self.scheduler.enqueue_command(key).await;
                let scheduler = self.scheduler.clone();
                let trigger = trigger.clone();
                return Dispatch::Started(tokio::spawn(async move {
                    scheduler.run_queued_command(ticket, &trigger, &event).await
                }));
            }
            ctx.waiting().cancel(key).await;
            return self.spawn_text_trigger(event, |_| true).unwrap_or(Dispatch::Ignored);
        }

        if ctx.waiting().is_waiting(key).await {
            let command_owns_wait = ctx
                .executions()
                .input_owner(key)
                .await
                .is_some_and(|owner| owner.slot == ExecutionSlot::Command);
            let resolved = ctx.waiting().resolve(key, event.clone()).await;
            if command_owns_wait {
                if let Some(started) =
                    self.spawn_text_trigger(event, |t| t.options.execute_during_command)
                {
                    return started;
                }
            }
            return if resolved {
                Dispatch::Consumed
            } else {
                Dispatch::Ignored
            };
        }

        self.spawn_text_trigger(event, |_| true)
            .unwrap_or(Dispatch::Ignored)
    }

    fn spawn_text_trigger<F>(&self, event: InboundEvent, eligible: F) -> Option<Dispatch>
    where
        F: Fn(&Trigger) -> bool,
    {
        let text = event.text()?;
        let (trigger, captures) = self.hears.iter().filter(|t| eligible(t)).find_map(|t| {
            let captures = t.pattern.as_ref()?.captures(text)?;
            Some((t.clone(), captures))
        })?;
        let scheduler = self.scheduler.clone();
        Some(Dispatch::Started(tokio::spawn(async move {
            scheduler
                .run_text_trigger(&trigger, &event, Some(captures))
                .await
        })))
    }
}
