//! Triggers - registered handlers and their option bags.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use colloquy_core::{Caller, ConversationError, OnceRule};

use crate::conversation::Conversation;

/// Error escaping a handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler chose to fail with a message for the remote party
    #[error("{0}")]
    Reply(String),
    /// A suspension point failed and the handler propagated it
    #[error(transparent)]
    Conversation(#[from] ConversationError),
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn reply(message: impl Into<String>) -> Self {
        Self::Reply(message.into())
    }
}

/// Final value of a handler; `None` falls back to the last resumption value.
pub type HandlerResult = Result<Option<Value>, HandlerError>;

/// Handler trait - the body of a trigger.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, conversation: Conversation) -> HandlerResult;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(Conversation) -> BoxFuture<'static, HandlerResult> + Send + Sync,
{
    async fn handle(&self, conversation: Conversation) -> HandlerResult {
        (self.0)(conversation).await
    }
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Conversation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler(move |conversation| f(conversation).boxed()))
}

/// Trigger class, as reported to hooks and templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    Command,
    Action,
    Hears,
    Generic,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Action => "action",
            Self::Hears => "hears",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text or callback-data pattern. Plain strings match exactly.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    /// Exact match of `text`.
    pub fn exact(text: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            source: text.to_string(),
            regex: Regex::new(&format!("^{}$", regex::escape(text)))?,
        })
    }

    pub fn regex(regex: Regex) -> Self {
        Self {
            source: regex.as_str().to_string(),
            regex,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// Capture groups, index 0 being the whole match.
    pub fn captures(&self, text: &str) -> Option<Vec<Option<String>>> {
        self.regex.captures(text).map(|caps| {
            caps.iter()
                .map(|m| m.map(|m| m.as_str().to_string()))
                .collect()
        })
    }
}

/// Caller authorization filter.
#[derive(Clone)]
pub enum OnlyFor {
    Id(i64),
    /// Handle, leading `@` ignored
    Handle(String),
    Any(Vec<OnlyFor>),
    Predicate(Arc<dyn Fn(i64, Option<&str>) -> bool + Send + Sync>),
}

impl OnlyFor {
    pub fn handle(handle: &str) -> Self {
        Self::Handle(handle.trim_start_matches('@').to_string())
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(i64, Option<&str>) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    pub fn allows(&self, caller: &Caller) -> bool {
        match self {
            Self::Id(id) => caller.id == *id,
            Self::Handle(handle) => caller.bare_handle() == Some(handle.trim_start_matches('@')),
            Self::Any(filters) => filters.iter().any(|f| f.allows(caller)),
            Self::Predicate(f) => f(caller.id.as_i64(), caller.bare_handle()),
        }
    }
}

impl fmt::Debug for OnlyFor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => f.debug_tuple("Id").field(id).finish(),
            Self::Handle(handle) => f.debug_tuple("Handle").field(handle).finish(),
            Self::Any(filters) => f.debug_tuple("Any").field(filters).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Who was denied, for computed blocked notices.
#[derive(Debug, Clone)]
pub struct BlockedContext<'a> {
    pub kind: TriggerKind,
    pub name: &'a str,
    pub caller_id: i64,
    pub handle: Option<&'a str>,
}

/// Notice sent when once-semantics deny a trigger.
#[derive(Clone)]
pub enum BlockedNotice {
    Text(String),
    Computed(Arc<dyn Fn(&BlockedContext<'_>) -> Option<String> + Send + Sync>),
}

impl BlockedNotice {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&BlockedContext<'_>) -> Option<String> + Send + Sync + 'static,
    {
        Self::Computed(Arc::new(f))
    }

    pub fn render(&self, ctx: &BlockedContext<'_>) -> Option<String> {
        match self {
            Self::Text(text) => Some(text.clone()),
            Self::Computed(f) => f(ctx),
        }
    }
}

impl fmt::Debug for BlockedNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Per-trigger options.
#[derive(Debug, Clone)]
pub struct TriggerOptions {
    /// Inactivity limit of the whole conversation
    pub timeout: Option<Duration>,
    pub timeout_message: Option<String>,
    pub once_for_bot: Option<OnceRule>,
    pub once_for_user: Option<OnceRule>,
    /// Overrides the configured blocked notice
    pub blocked: Option<BlockedNotice>,
    pub only_for: Option<OnlyFor>,
    /// State slots reset when the trigger fires, optionally to a given value
    pub reset_states: Vec<(String, Option<Value>)>,
    pub emits_event: bool,
    /// Text triggers: total firings allowed per caller
    pub execute_count: Option<u32>,
    /// Text triggers: fire while a command awaits input
    pub execute_during_command: bool,
    /// Text triggers: fire while another text trigger is mid-conversation
    pub others_may_hear: bool,
    /// Text triggers: keep captures readable after completion
    pub keep_match_results: bool,
    /// Command text neither pre-empts nor is refused by this trigger
    pub ignore_commands: bool,
}

impl Default for TriggerOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            timeout_message: None,
            once_for_bot: None,
            once_for_user: None,
            blocked: None,
            only_for: None,
            reset_states: Vec::new(),
            emits_event: true,
            execute_count: None,
            execute_during_command: false,
            others_may_hear: false,
            keep_match_results: false,
            ignore_commands: false,
        }
    }
}

impl TriggerOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout_message(mut self, text: impl Into<String>) -> Self {
        self.timeout_message = Some(text.into());
        self
    }

    pub fn once_for_bot(mut self, rule: OnceRule) -> Self {
        self.once_for_bot = Some(rule);
        self
    }

    pub fn once_for_user(mut self, rule: OnceRule) -> Self {
        self.once_for_user = Some(rule);
        self
    }

    pub fn blocked(mut self, notice: BlockedNotice) -> Self {
        self.blocked = Some(notice);
        self
    }

    pub fn only_for(mut self, filter: OnlyFor) -> Self {
        self.only_for = Some(filter);
        self
    }

    pub fn reset_state(mut self, slot: impl Into<String>, value: Option<Value>) -> Self {
        self.reset_states.push((slot.into(), value));
        self
    }

    pub fn silent(mut self) -> Self {
        self.emits_event = false;
        self
    }

    pub fn execute_count(mut self, count: u32) -> Self {
        self.execute_count = Some(count);
        self
    }

    pub fn execute_during_command(mut self) -> Self {
        self.execute_during_command = true;
        self
    }

    pub fn others_may_hear(mut self) -> Self {
        self.others_may_hear = true;
        self
    }

    pub fn keep_match_results(mut self) -> Self {
        self.keep_match_results = true;
        self
    }

    pub fn ignore_commands(mut self) -> Self {
        self.ignore_commands = true;
        self
    }
}

/// A registered trigger.
#[derive(Clone)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub name: String,
    /// Text pattern (hears) or callback-data pattern (actions)
    pub pattern: Option<Pattern>,
    pub options: TriggerOptions,
    pub handler: Arc<dyn Handler>,
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("pattern", &self.pattern.as_ref().map(Pattern::source))
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Trigger {
    pub fn command(name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self {
            kind: TriggerKind::Command,
            name: name.into(),
            pattern: None,
            options: TriggerOptions::default(),
            handler,
        }
    }

    pub fn action(pattern: Pattern, handler: Arc<dyn Handler>) -> Self {
        Self {
            kind: TriggerKind::Action,
            name: pattern.source().to_string(),
            pattern: Some(pattern),
            options: TriggerOptions::default(),
            handler,
        }
    }

    pub fn hears(pattern: Pattern, handler: Arc<dyn Handler>) -> Self {
        Self {
            kind: TriggerKind::Hears,
            name: pattern.source().to_string(),
            pattern: Some(pattern),
            options: TriggerOptions::default(),
            handler,
        }
    }

    pub fn generic(name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self {
            kind: TriggerKind::Generic,
            name: name.into(),
            pattern: None,
            options: TriggerOptions::default(),
            handler,
        }
    }

    pub fn with_options(mut self, options: TriggerOptions) -> Self {
        self.options = options;
        self
    }

    /// Key of this trigger in once-records.
    pub fn once_key(&self) -> String {
        format!("{}:{}", self.kind, self.name)
    }
}
