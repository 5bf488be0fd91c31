use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use colloquy_core::{Caller, ChatId};

use crate::trigger::TriggerKind;

/// Where a hook was invoked from.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub kind: TriggerKind,
    pub trigger: String,
    pub caller: Caller,
    pub chat_id: ChatId,
}

/// Hosting-instance extension point.
#[async_trait]
pub trait BotHook: Send + Sync {
    /// An error escaped a handler.
    async fn on_error(&self, _ctx: &HookContext, _error: &str) -> Result<(), String> {
        Ok(())
    }

    /// `only_for` denied a caller.
    async fn on_unauthorized(&self, _ctx: &HookContext) -> Result<(), String> {
        Ok(())
    }

    /// Whether this hook takes handler errors. Errors nobody takes are
    /// surfaced to the invoker instead.
    fn handles_errors(&self) -> bool {
        true
    }
}

/// Registry for bot hooks.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<Vec<Arc<dyn BotHook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
        }
    }

    pub async fn register(&self, hook: Arc<dyn BotHook>) {
        self.hooks.write().await.push(hook);
    }

    async fn snapshot(&self) -> Vec<Arc<dyn BotHook>> {
        self.hooks.read().await.clone()
    }

    pub async fn has_error_hooks(&self) -> bool {
        self.hooks.read().await.iter().any(|h| h.handles_errors())
    }

    /// Returns whether any hook took the error.
    pub async fn on_error(&self, ctx: &HookContext, error: &str) -> bool {
        let mut handled = false;
        for hook in self.snapshot().await {
            if !hook.handles_errors() {
                continue;
            }
            handled = true;
            if let Err(err) = hook.on_error(ctx, error).await {
                tracing::warn!(error = %err, trigger = %ctx.trigger, "bot hook on_error failed");
            }
        }
        handled
    }

    pub async fn on_unauthorized(&self, ctx: &HookContext) {
        for hook in self.snapshot().await {
            if let Err(err) = hook.on_unauthorized(ctx).await {
                tracing::warn!(error = %err, trigger = %ctx.trigger, "bot hook on_unauthorized failed");
            }
        }
    }
}
