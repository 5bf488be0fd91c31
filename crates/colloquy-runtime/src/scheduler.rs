//! Scheduler - drives a handler as a coroutine.
//!
//! The handler runs in its own task and yields [`Request`]s over a channel.
//! The scheduler performs each request, feeds the [`Resume`] back and keeps
//! going until the handler completes, fails, is pre-empted or times out.
//!
//! Execution states: `Idle -> Running -> {Suspended, Completed, Failed}`,
//! `Suspended -> Running` on resumption.
//!
//! Commands of one caller are queued in arrival order. A newer command asks
//! the running one to yield; the older handler gets `Superseded` at its
//! current suspension and the newer one starts once it has yielded.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;

use colloquy_core::{
    BotEvent, Caller, ChatId, ConversationError, InboundEvent, Media, MessageStyle, Request,
    RequestKind, Resume, SendRequest, SessionKey, Target,
};

use crate::context::EngineContext;
use crate::conversation::{Conversation, Invocation, Suspension};
use crate::execution::{Execution, ExecutionSlot, ExecutionState};
use crate::hooks::HookContext;
use crate::input::ask_for_input;
use crate::menu::show_menu;
use crate::notify;
use crate::trigger::{HandlerError, HandlerResult, Trigger};

/// How one invocation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The handler returned; `None` when it produced no value
    Completed(Option<Value>),
    /// The gate or a text-trigger rule refused to start it
    Denied,
    /// The conversation timeout elapsed
    TimedOut,
    /// A command took over
    Preempted,
    /// The handler failed; `handled` tells whether a hook or a reply took it
    Failed { error: String, handled: bool },
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Completed(value) => value.as_ref(),
            _ => None,
        }
    }

    fn execution_state(&self) -> ExecutionState {
        if self.is_completed() {
            ExecutionState::Completed
        } else {
            ExecutionState::Failed
        }
    }
}

enum Step {
    Done(Result<HandlerResult, JoinError>),
    Suspended(Option<Suspension>),
    Preempted,
}

/// Pre-emption signal of one run and the hand-off to the command after it.
/// Runs outside the command queue get an inert turn.
#[derive(Default)]
struct Turn {
    preempted: Option<oneshot::Receiver<()>>,
    hand_off: Option<oneshot::Sender<()>>,
}

impl Turn {
    /// Whether a newer command already asked this run to yield.
    fn is_preempted(&mut self) -> bool {
        let Some(rx) = self.preempted.as_mut() else {
            return false;
        };
        match rx.try_recv() {
            Ok(()) => {
                self.preempted = None;
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Closed) => {
                self.preempted = None;
                false
            }
        }
    }

    /// Resolves once a newer command asks this run to yield.
    async fn preempted(&mut self) {
        let Some(rx) = self.preempted.as_mut() else {
            return std::future::pending().await;
        };
        let fired = rx.await.is_ok();
        self.preempted = None;
        if !fired {
            std::future::pending::<()>().await;
        }
    }

    /// Let the next command start.
    fn hand_off(&mut self) {
        self.hand_off.take();
    }
}

/// A command's place in its caller's command order.
pub struct CommandTicket {
    key: SessionKey,
    generation: u64,
    predecessor: Option<oneshot::Receiver<()>>,
    turn: Turn,
}

impl CommandTicket {
    pub fn session(&self) -> SessionKey {
        self.key
    }
}

struct QueuedCommand {
    generation: u64,
    preempt: oneshot::Sender<()>,
    handed_off: oneshot::Receiver<()>,
}

/// Entry points for every trigger class.
#[derive(Clone)]
pub struct Scheduler {
    ctx: Arc<EngineContext>,
    queue: Arc<Mutex<HashMap<SessionKey, QueuedCommand>>>,
    generations: Arc<AtomicU64>,
}

impl Scheduler {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            queue: Arc::new(Mutex::new(HashMap::new())),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    /// Run a command. A command replaces the caller's running command and
    /// supersedes any pending wait.
    pub async fn run_command(&self, trigger: &Trigger, event: &InboundEvent) -> RunOutcome {
        let ticket = self.enqueue_command(event.session()).await;
        self.run_queued_command(ticket, trigger, event).await
    }

    /// Take the next place in the caller's command order and ask the command
    /// ahead of it to yield. Call this in arrival order.
    pub async fn enqueue_command(&self, key: SessionKey) -> CommandTicket {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let (preempt, preempted) = oneshot::channel();
        let (hand_off, handed_off) = oneshot::channel();
        let previous = self.queue.lock().await.insert(
            key,
            QueuedCommand {
                generation,
                preempt,
                handed_off,
            },
        );
        let predecessor = previous.map(|previous| {
            let _ = previous.preempt.send(());
            previous.handed_off
        });
        // replies arriving from here on belong to the newer command
        self.ctx.waiting().cancel(key).await;

        if let Some(running) = self.ctx.executions().current(key, ExecutionSlot::Command).await {
            tracing::debug!(session = %key, previous = %running.trigger, "command replaced");
            self.ctx
                .publish(BotEvent::internal_json(
                    "command.cancel",
                    &json!({ "session": key.as_i64(), "command": running.trigger }),
                ))
                .await;
        }

        CommandTicket {
            key,
            generation,
            predecessor,
            turn: Turn {
                preempted: Some(preempted),
                hand_off: Some(hand_off),
            },
        }
    }

    /// Run a command once the command ahead of it has yielded. A command
    /// overtaken while it queued does not start and reports `Preempted`.
    pub async fn run_queued_command(
        &self,
        mut ticket: CommandTicket,
        trigger: &Trigger,
        event: &InboundEvent,
    ) -> RunOutcome {
        if let Some(predecessor) = ticket.predecessor.take() {
            // settles on hand-off or once the older run is gone
            let _ = predecessor.await;
        }
        let outcome = if ticket.turn.is_preempted() {
            tracing::debug!(session = %ticket.key, command = %trigger.name, "command overtaken before it started");
            RunOutcome::Preempted
        } else {
            self.start_command(&mut ticket.turn, trigger, event).await
        };
        self.dequeue(ticket).await;
        outcome
    }

    async fn dequeue(&self, ticket: CommandTicket) {
        let mut queue = self.queue.lock().await;
        if queue
            .get(&ticket.key)
            .is_some_and(|queued| queued.generation == ticket.generation)
        {
            queue.remove(&ticket.key);
        }
    }

    async fn start_command(
        &self,
        turn: &mut Turn,
        trigger: &Trigger,
        event: &InboundEvent,
    ) -> RunOutcome {
        let ctx = &self.ctx;
        let key = event.session();
        if !ctx.gate().admit(ctx, trigger, &event.caller, event.chat_id).await {
            return RunOutcome::Denied;
        }
        ctx.waiting().cancel(key).await;

        for (slot, value) in &trigger.options.reset_states {
            ctx.store().reset(key, slot, value.clone()).await;
        }

        let execution = Execution::new(
            ExecutionSlot::Command,
            &trigger.name,
            trigger.options.ignore_commands,
        );
        let id = execution.id;
        if let Some(displaced) = ctx.executions().begin(key, execution).await {
            // the displaced run already yielded; its late updates carry a stale id
            tracing::debug!(session = %key, displaced = %displaced.trigger, state = ?displaced.state, "command slot taken over");
        }
        self.announce(trigger, "command.call", event).await;

        let mut invocation = self.invocation(trigger, event);
        invocation.execution = Some((ExecutionSlot::Command, id));
        let outcome = self.drive(trigger, invocation, turn).await;
        ctx.executions()
            .finish(key, ExecutionSlot::Command, id, outcome.execution_state())
            .await;
        outcome
    }

    /// Run an action. Actions own no execution slot; they see the command
    /// running for the caller, if any.
    pub async fn run_action(&self, trigger: &Trigger, event: &InboundEvent) -> RunOutcome {
        let ctx = &self.ctx;
        if !ctx.gate().admit(ctx, trigger, &event.caller, event.chat_id).await {
            return RunOutcome::Denied;
        }
        self.announce(trigger, "action.call", event).await;

        let mut invocation = self.invocation(trigger, event);
        invocation.active_command = ctx
            .executions()
            .current(event.session(), ExecutionSlot::Command)
            .await
            .map(|execution| execution.trigger);
        self.drive(trigger, invocation, &mut Turn::default()).await
    }

    /// Run a text trigger with the capture groups of its pattern.
    pub async fn run_text_trigger(
        &self,
        trigger: &Trigger,
        event: &InboundEvent,
        captures: Option<Vec<Option<String>>>,
    ) -> RunOutcome {
        let ctx = &self.ctx;
        let key = event.session();
        let options = &trigger.options;

        if event.is_command(&ctx.settings().command_marker) && !options.ignore_commands {
            if let Some(current) = ctx.executions().current(key, ExecutionSlot::Hears).await {
                if current.trigger == trigger.name && current.awaiting_input {
                    ctx.waiting().cancel(key).await;
                }
            }
            return RunOutcome::Denied;
        }
        if ctx.executions().command_awaits_input(key).await && !options.execute_during_command {
            tracing::debug!(session = %key, trigger = %trigger.name, "command is asking for input");
            return RunOutcome::Denied;
        }
        if ctx.executions().is_running(key, ExecutionSlot::Hears).await && !options.others_may_hear {
            tracing::debug!(session = %key, trigger = %trigger.name, "another text trigger is running");
            return RunOutcome::Denied;
        }
        let counter = trigger.once_key();
        if let Some(limit) = options.execute_count {
            if ctx.store().counter(key, &counter).await >= limit {
                tracing::debug!(session = %key, trigger = %trigger.name, limit, "execute count reached");
                return RunOutcome::Denied;
            }
        }

        if !ctx.gate().admit(ctx, trigger, &event.caller, event.chat_id).await {
            return RunOutcome::Denied;
        }
        if options.execute_count.is_some() {
            ctx.store().increment(key, &counter).await;
        }
        ctx.store().set_last_match(key, captures.clone()).await;

        let execution = Execution::new(ExecutionSlot::Hears, &trigger.name, options.ignore_commands);
        let id = execution.id;
        ctx.executions().begin(key, execution).await;
        self.announce(trigger, "hears.call", event).await;

        let mut invocation = self.invocation(trigger, event);
        invocation.captures = captures;
        invocation.execution = Some((ExecutionSlot::Hears, id));
        let outcome = self.drive(trigger, invocation, &mut Turn::default()).await;
        ctx.executions()
            .finish(key, ExecutionSlot::Hears, id, outcome.execution_state())
            .await;
        if !options.keep_match_results {
            ctx.store().set_last_match(key, None).await;
        }
        outcome
    }

    /// Run a trigger outside the gate, e.g. from application code.
    pub async fn run_generic(&self, trigger: &Trigger, caller: Caller, chat_id: ChatId) -> RunOutcome {
        let invocation = Invocation::new(trigger.kind, &trigger.name, caller, chat_id);
        self.drive(trigger, invocation, &mut Turn::default()).await
    }

    fn invocation(&self, trigger: &Trigger, event: &InboundEvent) -> Invocation {
        let mut invocation =
            Invocation::new(trigger.kind, &trigger.name, event.caller.clone(), event.chat_id);
        invocation.text = event.text().map(str::to_string);
        invocation.button_data = event.button_data().map(str::to_string);
        invocation
    }

    async fn announce(&self, trigger: &Trigger, name: &str, event: &InboundEvent) {
        if !trigger.options.emits_event {
            return;
        }
        self.ctx
            .publish(BotEvent::internal_json(
                name,
                &json!({
                    "session": event.session().as_i64(),
                    "chat": event.chat_id,
                    "trigger": trigger.name,
                }),
            ))
            .await;
    }

    /// Resumption loop.
    async fn drive(&self, trigger: &Trigger, invocation: Invocation, turn: &mut Turn) -> RunOutcome {
        let ctx = self.ctx.clone();
        let invocation = Arc::new(invocation);
        let (requests, mut rx) = mpsc::channel::<Suspension>(1);
        let conversation = Conversation::new(ctx.clone(), invocation.clone(), requests);
        let handler = trigger.handler.clone();
        let mut task: JoinHandle<HandlerResult> =
            tokio::spawn(async move { handler.handle(conversation).await });

        tracing::debug!(session = %invocation.session(), trigger = %invocation.name, kind = %invocation.kind, "handler started");

        let timeout = trigger.options.timeout;
        let mut last: Option<Resume> = None;
        let mut superseded = false;
        let mut drained = false;

        loop {
            let deadline = timeout.map(|t| Instant::now() + t);
            let step = within(deadline, async {
                tokio::select! {
                    joined = &mut task => Step::Done(joined),
                    suspension = rx.recv(), if !drained => Step::Suspended(suspension),
                    _ = turn.preempted() => Step::Preempted,
                }
            })
            .await;

            let suspension = match step {
                None => {
                    self.timed_out(trigger, &invocation, false).await;
                    return RunOutcome::TimedOut;
                }
                Some(Step::Done(joined)) => {
                    return self.complete(&invocation, joined, last, superseded).await;
                }
                Some(Step::Suspended(None)) => {
                    drained = true;
                    continue;
                }
                Some(Step::Preempted) => {
                    tracing::debug!(session = %invocation.session(), trigger = %invocation.name, "newer command took over");
                    superseded = true;
                    turn.hand_off();
                    continue;
                }
                Some(Step::Suspended(Some(suspension))) => suspension,
            };

            let Suspension { request, reply } = suspension;
            if superseded {
                // the handler was told to wind down; nothing more is performed
                let _ = reply.send(Err(ConversationError::Closed));
                continue;
            }

            let kind = request.kind();
            tracing::debug!(session = %invocation.session(), request = kind.as_str(), "handler suspended");
            self.set_state(&invocation, ExecutionState::Suspended).await;
            let performing = within(deadline, perform(&ctx, &invocation, request));
            let performed = if matches!(kind, RequestKind::Input | RequestKind::Menu) {
                tokio::select! {
                    biased;
                    _ = turn.preempted() => {
                        tracing::debug!(session = %invocation.session(), request = kind.as_str(), "suspension superseded by a newer command");
                        turn.hand_off();
                        Some(Ok(Resume::Superseded))
                    }
                    performed = performing => performed,
                }
            } else {
                performing.await
            };
            let result = match performed {
                Some(result) => result,
                None => {
                    let _ = reply.send(Err(ConversationError::Timeout));
                    self.timed_out(trigger, &invocation, true).await;
                    return RunOutcome::TimedOut;
                }
            };
            self.set_state(&invocation, ExecutionState::Running).await;

            match &result {
                Ok(resume)
                    if resume.is_command(&ctx.settings().command_marker)
                        && !trigger.options.ignore_commands =>
                {
                    tracing::debug!(session = %invocation.session(), "command pre-empted the conversation");
                    task.abort();
                    return RunOutcome::Preempted;
                }
                Ok(Resume::Superseded) => superseded = true,
                Err(err) if err.is_timeout() => self.timeout_notice(trigger, &invocation).await,
                _ => {}
            }

            if let Ok(resume) = &result {
                last = Some(resume.clone());
            }
            let _ = reply.send(result);
        }
    }

    async fn complete(
        &self,
        invocation: &Invocation,
        joined: Result<HandlerResult, JoinError>,
        last: Option<Resume>,
        superseded: bool,
    ) -> RunOutcome {
        let session = invocation.session();
        let result = match joined {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(error = %err, session = %session, trigger = %invocation.name, "handler task failed");
                return self.report(invocation, err.to_string()).await;
            }
        };

        match result {
            Ok(value) => {
                tracing::debug!(session = %session, trigger = %invocation.name, "handler completed");
                RunOutcome::Completed(value.or_else(|| last.and_then(Resume::into_value)))
            }
            Err(HandlerError::Reply(message)) => {
                let text = self.ctx.translate(&message, &invocation.caller);
                self.ctx
                    .notice(&invocation.caller, invocation.chat_id, &text)
                    .await;
                RunOutcome::Failed {
                    error: message,
                    handled: true,
                }
            }
            Err(HandlerError::Conversation(ConversationError::Timeout)) => RunOutcome::TimedOut,
            Err(HandlerError::Conversation(ConversationError::Closed)) if superseded => {
                RunOutcome::Preempted
            }
            Err(err) => self.report(invocation, err.to_string()).await,
        }
    }

    /// Route an escaped error to the hooks, logging it when none takes it.
    async fn report(&self, invocation: &Invocation, error: String) -> RunOutcome {
        let hook_ctx = HookContext {
            kind: invocation.kind,
            trigger: invocation.name.clone(),
            caller: invocation.caller.clone(),
            chat_id: invocation.chat_id,
        };
        let handled = self.ctx.hooks().on_error(&hook_ctx, &error).await;
        if !handled {
            tracing::error!(error = %error, session = %invocation.session(), trigger = %invocation.name, "handler failed");
        }
        RunOutcome::Failed { error, handled }
    }

    /// The conversation timeout elapsed. The handler is not killed; its
    /// pending suspension gets the error and later ones find the channel
    /// closed.
    async fn timed_out(&self, trigger: &Trigger, invocation: &Invocation, suspended: bool) {
        let key = invocation.session();
        tracing::info!(session = %key, trigger = %invocation.name, suspended, "conversation timed out");
        if let Some((slot, id)) = invocation.execution {
            let owns_wait = self
                .ctx
                .executions()
                .current(key, slot)
                .await
                .is_some_and(|e| e.id == id && e.awaiting_input);
            if owns_wait {
                self.ctx.waiting().reject(key, ConversationError::Timeout).await;
            }
        }
        self.timeout_notice(trigger, invocation).await;
    }

    async fn timeout_notice(&self, trigger: &Trigger, invocation: &Invocation) {
        let message = trigger
            .options
            .timeout_message
            .as_deref()
            .unwrap_or(&self.ctx.settings().timeout_message);
        if !message.is_empty() {
            let text = self.ctx.translate(message, &invocation.caller);
            self.ctx
                .notice(&invocation.caller, invocation.chat_id, &text)
                .await;
        }
        self.ctx
            .publish(BotEvent::internal_json(
                "handler.timeout",
                &json!({
                    "session": invocation.session().as_i64(),
                    "trigger": invocation.name,
                }),
            ))
            .await;
    }

    async fn set_state(&self, invocation: &Invocation, state: ExecutionState) {
        if let Some((slot, id)) = invocation.execution {
            self.ctx
                .executions()
                .set_state(invocation.session(), slot, id, state)
                .await;
        }
    }
}

/// Run `fut` until `deadline`; `None` once it passed.
async fn within<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}

/// Perform one request and produce the value the handler resumes with.
async fn perform(
    ctx: &Arc<EngineContext>,
    invocation: &Invocation,
    request: Request,
) -> Result<Resume, ConversationError> {
    match request {
        Request::Text(text) => {
            let handle = ctx
                .transport()
                .send_text(&Target::Id(invocation.chat_id), &text, &MessageStyle::plain())
                .await?;
            ctx.remember_sent(invocation.session(), handle).await;
            Ok(Resume::Empty)
        }
        Request::Input(input) => ask_for_input(ctx, invocation, input).await,
        Request::Send(send) => send_message(ctx, invocation, send).await,
        Request::Notify(request) => {
            let report = notify::deliver(ctx, invocation, &request).await;
            tracing::debug!(
                delivered = report.delivered.len(),
                failed = report.failed.len(),
                "notification sent"
            );
            Ok(Resume::Empty)
        }
        Request::Presence(presence) => {
            if let Err(err) = ctx
                .transport()
                .set_presence(invocation.chat_id, presence.kind)
                .await
            {
                tracing::warn!(error = %err, presence = presence.kind.as_str(), "presence not set");
            }
            if presence.wait {
                tokio::time::sleep(ctx.settings().presence_grace).await;
            }
            Ok(Resume::Empty)
        }
        Request::Menu(menu) => show_menu(ctx.clone(), invocation, menu).await,
        Request::FetchLast => Ok(Resume::LastMessage(ctx.last_sent(invocation.session()).await)),
    }
}

async fn send_message(
    ctx: &EngineContext,
    invocation: &Invocation,
    request: SendRequest,
) -> Result<Resume, ConversationError> {
    let transport = ctx.transport();
    let key = invocation.session();
    let mut sent = None;

    if let Some(media) = &request.media {
        for group in media.groups() {
            let gallery = Media::Gallery { items: group };
            let handles = transport
                .send_media(invocation.chat_id, &gallery, &request.style)
                .await?;
            if let Some(handle) = handles.into_iter().last() {
                sent = Some(handle);
            }
        }
    }

    if let Some(text) = &request.text {
        let handle = match &request.edit {
            Some(message) if ctx.is_unchanged(message, text).await => {
                tracing::debug!(session = %key, message = message.message_id, "edit skipped, text unchanged");
                return Ok(Resume::Unchanged);
            }
            Some(message) => transport.edit_text(message, text, &request.style).await?,
            None => {
                transport
                    .send_text(&Target::Id(invocation.chat_id), text, &request.style)
                    .await?
            }
        };
        sent = Some(handle);
    }

    match sent {
        Some(handle) => {
            ctx.remember_sent(key, handle.clone()).await;
            Ok(Resume::Sent(handle))
        }
        None if request.text.is_none() && request.media.is_none() => Err(
            ConversationError::InvalidRequest("send request without text or media".to_string()),
        ),
        None => Ok(Resume::Empty),
    }
}
