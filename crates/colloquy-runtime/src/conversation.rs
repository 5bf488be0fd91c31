//! Conversation - the handler's side of the suspension channel.
//!
//! Every `await` on a request parks the handler until the scheduler has
//! performed it and fed back a [`Resume`].

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use colloquy_core::{
    Caller, ChatId, ConversationError, InputRequest, MenuRequest, MessageHandle, NotifyRequest,
    PresenceRequest, Request, Resume, SendRequest, SessionKey,
};

use crate::context::EngineContext;
use crate::execution::ExecutionSlot;
use crate::options::InlineOptions;
use crate::trigger::TriggerKind;

/// A request in flight, answered exactly once.
#[derive(Debug)]
pub struct Suspension {
    pub request: Request,
    pub reply: oneshot::Sender<Result<Resume, ConversationError>>,
}

/// What started this conversation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub kind: TriggerKind,
    pub name: String,
    pub caller: Caller,
    pub chat_id: ChatId,
    /// Inbound text that fired the trigger
    pub text: Option<String>,
    /// Button data that fired an action
    pub button_data: Option<String>,
    /// Text-trigger capture groups
    pub captures: Option<Vec<Option<String>>>,
    /// Command running for this caller when an action fired
    pub active_command: Option<String>,
    /// Execution record backing this conversation
    pub execution: Option<(ExecutionSlot, Uuid)>,
}

impl Invocation {
    pub fn new(kind: TriggerKind, name: impl Into<String>, caller: Caller, chat_id: ChatId) -> Self {
        Self {
            kind,
            name: name.into(),
            caller,
            chat_id,
            text: None,
            button_data: None,
            captures: None,
            active_command: None,
            execution: None,
        }
    }

    pub fn session(&self) -> SessionKey {
        self.caller.id
    }
}

/// Handle passed to a handler for one run.
pub struct Conversation {
    ctx: Arc<EngineContext>,
    invocation: Arc<Invocation>,
    requests: mpsc::Sender<Suspension>,
}

impl Conversation {
    pub(crate) fn new(
        ctx: Arc<EngineContext>,
        invocation: Arc<Invocation>,
        requests: mpsc::Sender<Suspension>,
    ) -> Self {
        Self {
            ctx,
            invocation,
            requests,
        }
    }

    /// Suspend with `request` until the scheduler resumes us.
    pub async fn suspend(&self, request: impl Into<Request>) -> Result<Resume, ConversationError> {
        let (reply, rx) = oneshot::channel();
        let suspension = Suspension {
            request: request.into(),
            reply,
        };
        self.requests
            .send(suspension)
            .await
            .map_err(|_| ConversationError::Closed)?;
        rx.await.unwrap_or(Err(ConversationError::Closed))
    }

    /// Send plain text.
    pub async fn reply(&self, text: impl Into<String>) -> Result<(), ConversationError> {
        self.suspend(Request::Text(text.into())).await.map(|_| ())
    }

    /// Prompt and wait for a reply.
    pub async fn ask(&self, input: InputRequest) -> Result<Resume, ConversationError> {
        self.suspend(input).await
    }

    /// Prompt and return the reply text; `None` when superseded, exhausted
    /// or answered without text.
    pub async fn ask_text(&self, prompt: impl Into<String>) -> Result<Option<String>, ConversationError> {
        let resume = self.ask(InputRequest::new(prompt)).await?;
        Ok(resume.as_text().map(str::to_string))
    }

    pub async fn send(&self, request: SendRequest) -> Result<Resume, ConversationError> {
        self.suspend(request).await
    }

    pub async fn menu(&self, request: MenuRequest) -> Result<Resume, ConversationError> {
        self.suspend(request).await
    }

    /// Paginated options seeded with the configured menu defaults; show
    /// them with [`InlineOptions::into_request`] and [`menu`](Self::menu).
    pub fn options<I>(&self, items: I) -> InlineOptions
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        InlineOptions::with_defaults(items, &self.ctx.settings().menu)
    }

    pub async fn presence(&self, request: PresenceRequest) -> Result<(), ConversationError> {
        self.suspend(request).await.map(|_| ())
    }

    pub async fn notify(&self, request: NotifyRequest) -> Result<(), ConversationError> {
        self.suspend(request).await.map(|_| ())
    }

    pub async fn last_message(&self) -> Result<Option<MessageHandle>, ConversationError> {
        match self.suspend(Request::FetchLast).await? {
            Resume::LastMessage(handle) => Ok(handle),
            other => Ok(other.message().cloned()),
        }
    }

    /// Supersede the caller's pending wait, if any.
    pub async fn cancel_input(&self) -> bool {
        self.ctx.waiting().cancel(self.session()).await
    }

    pub async fn state(&self, slot: &str) -> Option<Value> {
        self.ctx.store().get(self.session(), slot).await
    }

    pub async fn state_as<T: DeserializeOwned>(&self, slot: &str) -> Option<T> {
        self.ctx.store().get_as(self.session(), slot).await
    }

    pub async fn set_state(&self, slot: &str, value: impl Into<Value>) {
        self.ctx.store().set(self.session(), slot, value).await;
    }

    pub fn translate(&self, key: &str) -> String {
        self.ctx.translate(key, &self.invocation.caller)
    }

    pub fn caller(&self) -> &Caller {
        &self.invocation.caller
    }

    pub fn session(&self) -> SessionKey {
        self.invocation.caller.id
    }

    pub fn chat_id(&self) -> ChatId {
        self.invocation.chat_id
    }

    pub fn trigger_kind(&self) -> TriggerKind {
        self.invocation.kind
    }

    pub fn trigger_name(&self) -> &str {
        &self.invocation.name
    }

    pub fn text(&self) -> Option<&str> {
        self.invocation.text.as_deref()
    }

    pub fn button_data(&self) -> Option<&str> {
        self.invocation.button_data.as_deref()
    }

    pub fn active_command(&self) -> Option<&str> {
        self.invocation.active_command.as_deref()
    }

    /// Capture groups of the text trigger, index 0 being the whole match.
    pub fn captures(&self) -> Option<&[Option<String>]> {
        self.invocation.captures.as_deref()
    }

    pub fn capture(&self, index: usize) -> Option<&str> {
        self.captures()?.get(index)?.as_deref()
    }

    /// Command arguments after the command word.
    pub fn arguments(&self) -> Option<&str> {
        if self.invocation.kind != TriggerKind::Command {
            return None;
        }
        let text = self.text()?;
        let (_, rest) = text.split_once(char::is_whitespace)?;
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest)
        }
    }
}
