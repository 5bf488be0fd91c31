//! ExecutionGate - decides whether a trigger may fire for a caller.
//!
//! Checks run in order: caller authorization, bot-wide once-semantics,
//! per-caller once-semantics. A denial is a `false` return plus an optional
//! notice to the caller, never an error.

use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::Instant;

use colloquy_core::{BotEvent, Caller, ChatId, OnceRecord};

use crate::context::EngineContext;
use crate::hooks::HookContext;
use crate::trigger::{BlockedContext, Trigger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Bot,
    User,
}

impl Scope {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Bot => "bot",
            Self::User => "user",
        }
    }
}

/// Bot-wide half of the once-semantics plus the admission pipeline.
#[derive(Debug, Default)]
pub struct ExecutionGate {
    bot_once: Mutex<OnceRecord>,
}

impl ExecutionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `trigger` for `caller`, recording once-admissions on success.
    pub async fn admit(
        &self,
        ctx: &EngineContext,
        trigger: &Trigger,
        caller: &Caller,
        chat_id: ChatId,
    ) -> bool {
        if let Some(filter) = &trigger.options.only_for {
            if !filter.allows(caller) {
                self.unauthorized(ctx, trigger, caller, chat_id).await;
                return false;
            }
        }

        let key = trigger.once_key();
        if let Some(rule) = trigger.options.once_for_bot {
            let admitted = self.bot_once.lock().await.admit(&key, rule, Instant::now());
            if !admitted {
                self.blocked(ctx, trigger, caller, chat_id, Scope::Bot).await;
                return false;
            }
        }

        if let Some(rule) = trigger.options.once_for_user {
            if !ctx.store().admit_once(caller.id, &key, rule).await {
                self.blocked(ctx, trigger, caller, chat_id, Scope::User).await;
                return false;
            }
        }

        true
    }

    /// Forget every bot-wide admission.
    pub async fn clear(&self) {
        self.bot_once.lock().await.clear();
    }

    async fn unauthorized(
        &self,
        ctx: &EngineContext,
        trigger: &Trigger,
        caller: &Caller,
        chat_id: ChatId,
    ) {
        tracing::info!(
            session = %caller.id,
            kind = %trigger.kind,
            trigger = %trigger.name,
            "caller not authorized"
        );
        let hook_ctx = HookContext {
            kind: trigger.kind,
            trigger: trigger.name.clone(),
            caller: caller.clone(),
            chat_id,
        };
        ctx.hooks().on_unauthorized(&hook_ctx).await;
        ctx.publish(BotEvent::internal_json(
            "permission.unauthorized",
            &json!({
                "kind": trigger.kind.as_str(),
                "trigger": trigger.name,
                "id": caller.id,
                "username": caller.bare_handle(),
            }),
        ))
        .await;

        if let Some(text) = &ctx.settings().unauthorized_message {
            let text = ctx.translate(text, caller);
            ctx.notice(caller, chat_id, &text).await;
        }
    }

    async fn blocked(
        &self,
        ctx: &EngineContext,
        trigger: &Trigger,
        caller: &Caller,
        chat_id: ChatId,
        scope: Scope,
    ) {
        tracing::info!(
            session = %caller.id,
            kind = %trigger.kind,
            trigger = %trigger.name,
            scope = scope.as_str(),
            "trigger denied by once rule"
        );
        ctx.publish(BotEvent::internal_json(
            "permission.denied",
            &json!({
                "kind": trigger.kind.as_str(),
                "trigger": trigger.name,
                "id": caller.id,
                "scope": scope.as_str(),
            }),
        ))
        .await;

        let notice = match &trigger.options.blocked {
            Some(notice) => {
                let blocked_ctx = BlockedContext {
                    kind: trigger.kind,
                    name: &trigger.name,
                    caller_id: caller.id.as_i64(),
                    handle: caller.bare_handle(),
                };
                notice.render(&blocked_ctx)
            }
            None => ctx.settings().blocked_message.clone(),
        };
        if let Some(text) = notice {
            let text = ctx.translate(&text, caller);
            ctx.notice(caller, chat_id, &text).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use colloquy_core::OnceRule;
    use colloquy_stores::{BroadcastEventBus, EventBus, RecordingTransport};

    use crate::settings::Settings;
    use crate::trigger::{handler_fn, BlockedNotice, OnlyFor, TriggerOptions};

    fn trigger(options: TriggerOptions) -> Trigger {
        Trigger::command("daily", handler_fn(|_conversation| async { Ok(None) }))
            .with_options(options)
    }

    #[tokio::test(start_paused = true)]
    async fn test_bot_once_window_reopens_after_interval() {
        let transport = Arc::new(RecordingTransport::new());
        let ctx = EngineContext::builder(transport.clone()).build();
        let trigger = trigger(
            TriggerOptions::default()
                .once_for_bot(OnceRule::Every(Duration::from_secs(60)))
                .blocked(BlockedNotice::text("Slow down")),
        );
        let gate = ExecutionGate::new();
        let alice = Caller::new(1);
        let bob = Caller::new(2);

        assert!(gate.admit(&ctx, &trigger, &alice, 1).await);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!gate.admit(&ctx, &trigger, &bob, 2).await);
        assert_eq!(transport.texts().await, vec!["Slow down"]);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(gate.admit(&ctx, &trigger, &bob, 2).await);

        // the window restarted at the last admission
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!gate.admit(&ctx, &trigger, &alice, 1).await);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(gate.admit(&ctx, &trigger, &alice, 1).await);
    }

    #[tokio::test]
    async fn test_user_once_is_scoped_per_caller() {
        let transport = Arc::new(RecordingTransport::new());
        let ctx = EngineContext::builder(transport.clone()).build();
        let trigger = trigger(TriggerOptions::default().once_for_user(OnceRule::Ever));
        let gate = ExecutionGate::new();

        assert!(gate.admit(&ctx, &trigger, &Caller::new(1), 1).await);
        assert!(!gate.admit(&ctx, &trigger, &Caller::new(1), 1).await);
        assert!(gate.admit(&ctx, &trigger, &Caller::new(2), 2).await);
        // no configured blocked text means a silent denial
        assert!(transport.texts().await.is_empty());
    }

    #[tokio::test]
    async fn test_unauthorized_caller_is_denied_before_once_records() {
        let transport = Arc::new(RecordingTransport::new());
        let bus = Arc::new(BroadcastEventBus::new(16));
        let mut events = bus.subscribe();
        let mut settings = Settings::default();
        settings.unauthorized_message = Some("Not for you".to_string());
        let ctx = EngineContext::builder(transport.clone())
            .settings(settings)
            .event_bus(bus)
            .build();
        let trigger = trigger(
            TriggerOptions::default()
                .only_for(OnlyFor::handle("@admin"))
                .once_for_bot(OnceRule::Ever),
        );
        let gate = ExecutionGate::new();

        assert!(!gate.admit(&ctx, &trigger, &Caller::new(5), 5).await);
        assert_eq!(events.recv().await.unwrap().name, "permission.unauthorized");
        assert_eq!(transport.texts().await, vec!["Not for you"]);

        let admin = Caller::new(6).with_handle("admin");
        assert!(gate.admit(&ctx, &trigger, &admin, 6).await);
    }
}
