//! Menu engine - shows a menu, routes button presses to it and settles the
//! suspension that opened it.
//!
//! Each shown menu runs in its own task. A menu that resolved while staying
//! open (non-blocking builders) keeps handling presses until it closes.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, RwLock};
use uuid::Uuid;

use colloquy_core::{
    ButtonReaction, Caller, ChatId, ConversationError, MenuControl, MenuRequest, MenuSignal,
    MenuSource, MessageHandle, MessageStyle, Resume, SessionKey, Target,
};

use crate::context::EngineContext;
use crate::conversation::Invocation;

type Settlement = Result<Resume, ConversationError>;

struct LiveMenu {
    id: Uuid,
    message: Option<MessageHandle>,
    buttons: Vec<String>,
    presses: mpsc::UnboundedSender<String>,
}

/// Live menus per session, newest last.
#[derive(Clone, Default)]
pub struct MenuRouter {
    live: Arc<RwLock<HashMap<SessionKey, Vec<LiveMenu>>>>,
}

impl MenuRouter {
    pub fn new() -> Self {
        Self::default()
    }

    async fn register(&self, key: SessionKey, id: Uuid, presses: mpsc::UnboundedSender<String>) {
        self.live.write().await.entry(key).or_default().push(LiveMenu {
            id,
            message: None,
            buttons: Vec::new(),
            presses,
        });
    }

    async fn update(
        &self,
        key: SessionKey,
        id: Uuid,
        message: Option<MessageHandle>,
        buttons: Option<Vec<String>>,
    ) {
        let mut live = self.live.write().await;
        if let Some(menu) = live
            .get_mut(&key)
            .and_then(|menus| menus.iter_mut().find(|m| m.id == id))
        {
            if message.is_some() {
                menu.message = message;
            }
            if let Some(buttons) = buttons {
                menu.buttons = buttons;
            }
        }
    }

    async fn unregister(&self, key: SessionKey, id: Uuid) {
        let mut live = self.live.write().await;
        if let Some(menus) = live.get_mut(&key) {
            menus.retain(|m| m.id != id);
            if menus.is_empty() {
                live.remove(&key);
            }
        }
    }

    /// Hand a button press to the menu owning `data`.
    ///
    /// The pressed message picks the menu when known; otherwise the newest
    /// menu with such a button wins.
    pub async fn route(&self, key: SessionKey, data: &str, message: Option<&MessageHandle>) -> bool {
        let live = self.live.read().await;
        let Some(menus) = live.get(&key) else {
            return false;
        };
        let owner = menus.iter().rev().find(|menu| {
            let same_message = match (message, &menu.message) {
                (Some(pressed), Some(shown)) => {
                    pressed.chat_id == shown.chat_id && pressed.message_id == shown.message_id
                }
                _ => true,
            };
            same_message && menu.buttons.iter().any(|b| b == data)
        });
        match owner {
            Some(menu) => menu.presses.send(data.to_string()).is_ok(),
            None => false,
        }
    }

    pub async fn live_count(&self, key: SessionKey) -> usize {
        self.live.read().await.get(&key).map(Vec::len).unwrap_or(0)
    }
}

struct MenuRun {
    ctx: Arc<EngineContext>,
    caller: Caller,
    chat_id: ChatId,
    id: Uuid,
    source: MenuSource,
    style: MessageStyle,
    close_on_timeout: bool,
    timeout_message: Option<String>,
    control: MenuControl,
    message: Option<MessageHandle>,
    result: Option<oneshot::Sender<Settlement>>,
}

/// Show a menu and wait until it settles.
pub(crate) async fn show_menu(
    ctx: Arc<EngineContext>,
    invocation: &Invocation,
    request: MenuRequest,
) -> Settlement {
    let (result_tx, result_rx) = oneshot::channel();
    let (control, signals) = MenuControl::channel();
    let (press_tx, presses) = mpsc::unbounded_channel();
    let id = Uuid::new_v4();
    ctx.menus().register(invocation.session(), id, press_tx).await;

    let close_on_timeout = request
        .close_on_timeout
        .unwrap_or(ctx.settings().menu.close_on_timeout);
    let run = MenuRun {
        ctx,
        caller: invocation.caller.clone(),
        chat_id: invocation.chat_id,
        id,
        source: request.source,
        style: request.style,
        close_on_timeout,
        timeout_message: request.timeout_message,
        control,
        message: None,
        result: Some(result_tx),
    };
    tokio::spawn(run.run(signals, presses));

    result_rx.await.unwrap_or(Err(ConversationError::Closed))
}

async fn result_gone(result: &mut Option<oneshot::Sender<Settlement>>) {
    match result {
        Some(tx) => tx.closed().await,
        None => std::future::pending().await,
    }
}

impl MenuRun {
    fn key(&self) -> SessionKey {
        self.caller.id
    }

    async fn run(
        mut self,
        mut signals: mpsc::UnboundedReceiver<MenuSignal>,
        mut presses: mpsc::UnboundedReceiver<String>,
    ) {
        if let Err(err) = self.render().await {
            tracing::warn!(error = %err, session = %self.key(), "menu could not be shown");
            self.deliver(Err(err));
            self.finish().await;
            return;
        }

        loop {
            let keep_going = tokio::select! {
                Some(signal) = signals.recv() => self.on_signal(signal).await,
                Some(button) = presses.recv() => self.on_press(&button, &mut signals).await,
                _ = result_gone(&mut self.result) => {
                    // the suspension was abandoned, usually by a conversation timeout
                    if self.close_on_timeout {
                        self.close(self.timeout_text()).await;
                    }
                    false
                }
                else => false,
            };
            if !keep_going {
                break;
            }
        }
        self.finish().await;
    }

    /// Render the current menu and show it, editing in place once shown.
    async fn render(&mut self) -> Result<(), ConversationError> {
        let menu = match &self.source {
            MenuSource::Layout(menu) => Some(menu.clone()),
            MenuSource::Builder(builder) => builder.build(&self.control).await?,
        };
        let Some(menu) = menu else {
            return Ok(());
        };

        let buttons = menu.visible().map(|b| b.id.clone()).collect();
        self.ctx
            .menus()
            .update(self.key(), self.id, None, Some(buttons))
            .await;

        let style = self.style.clone().with_keyboard(menu.keyboard());
        let transport = self.ctx.transport();
        let handle = match &self.message {
            Some(message) => transport.edit_text(message, &menu.text, &style).await?,
            None => {
                transport
                    .send_text(&Target::Id(self.chat_id), &menu.text, &style)
                    .await?
            }
        };
        self.ctx.remember_sent(self.key(), handle.clone()).await;
        self.ctx
            .menus()
            .update(self.key(), self.id, Some(handle.clone()), None)
            .await;
        self.message = Some(handle);
        Ok(())
    }

    async fn on_signal(&mut self, signal: MenuSignal) -> bool {
        match signal {
            MenuSignal::Resolve(value) => {
                self.deliver(Ok(value.map(Resume::Selected).unwrap_or(Resume::Dismissed)));
                true
            }
            MenuSignal::Reject(err) if err.is_timeout() && self.close_on_timeout => {
                tracing::debug!(session = %self.key(), "menu timed out");
                self.close(self.timeout_text()).await;
                self.deliver(Ok(Resume::Dismissed));
                false
            }
            MenuSignal::Reject(err) => {
                self.deliver(Err(err));
                false
            }
        }
    }

    async fn on_press(
        &mut self,
        button: &str,
        signals: &mut mpsc::UnboundedReceiver<MenuSignal>,
    ) -> bool {
        let builder = match &self.source {
            MenuSource::Layout(menu) => {
                let Some(pressed) = menu.find(button) else {
                    return true;
                };
                let value = pressed
                    .value
                    .clone()
                    .unwrap_or_else(|| Value::String(pressed.id.clone()));
                self.close(None).await;
                self.deliver(Ok(Resume::Selected(value)));
                return false;
            }
            MenuSource::Builder(builder) => builder.clone(),
        };

        let reaction = builder.on_press(button, &self.control).await;
        let keep_open = match reaction {
            ButtonReaction::Keep => true,
            ButtonReaction::Update => match self.render().await {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(error = %err, session = %self.key(), "menu update failed");
                    self.deliver(Err(err));
                    false
                }
            },
            ButtonReaction::Close => {
                self.close(None).await;
                false
            }
            ButtonReaction::CloseWith(text) => {
                self.close(Some(text)).await;
                false
            }
        };

        // the message is settled before the handler hears about the press
        while let Ok(signal) = signals.try_recv() {
            if !self.on_signal(signal).await {
                return false;
            }
        }
        if !keep_open {
            self.deliver(Ok(Resume::Dismissed));
        }
        keep_open
    }

    fn timeout_text(&self) -> Option<String> {
        self.timeout_message
            .as_deref()
            .map(|text| self.ctx.translate(text, &self.caller))
    }

    /// Replace the menu with `text`, or delete it.
    async fn close(&mut self, text: Option<String>) {
        let Some(message) = self.message.take() else {
            return;
        };
        let transport = self.ctx.transport();
        let result = match text {
            Some(text) => match transport
                .edit_text(&message, &text, &self.style.without_keyboard())
                .await
            {
                Ok(handle) => {
                    self.ctx.record_text(&handle).await;
                    Ok(())
                }
                Err(err) => Err(err),
            },
            None => {
                self.ctx.forget_message(&message).await;
                transport.delete_message(&message).await.map(|_| ())
            }
        };
        if let Err(err) = result {
            tracing::warn!(error = %err, session = %self.key(), "menu close failed");
        }
    }

    /// Settle the suspension; later settlements are dropped.
    fn deliver(&mut self, settlement: Settlement) {
        if let Some(tx) = self.result.take() {
            let _ = tx.send(settlement);
        }
    }

    async fn finish(&mut self) {
        self.ctx.menus().unregister(self.key(), self.id).await;
        if let MenuSource::Builder(builder) = &self.source {
            builder.teardown().await;
        }
        self.deliver(Ok(Resume::Dismissed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use colloquy_core::{Button, Menu};
    use colloquy_stores::{Outgoing, RecordingTransport};

    use crate::trigger::TriggerKind;

    fn setup() -> (Arc<RecordingTransport>, Arc<EngineContext>, Invocation) {
        let transport = Arc::new(RecordingTransport::new());
        let ctx = EngineContext::builder(transport.clone()).build();
        let invocation = Invocation::new(TriggerKind::Command, "pick", Caller::new(4), 4);
        (transport, ctx, invocation)
    }

    async fn press_when_live(ctx: &EngineContext, data: &str) {
        while !ctx.menus().route(SessionKey(4), data, None).await {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_layout_press_resolves_with_value_and_deletes() {
        let (transport, ctx, invocation) = setup();
        let menu = Menu::new("Size?")
            .button(Button::new("s", "Small").with_value(Value::from(1)))
            .button(Button::new("l", "Large"));

        let task = {
            let ctx = ctx.clone();
            tokio::spawn(async move { show_menu(ctx, &invocation, MenuRequest::layout(menu)).await })
        };
        press_when_live(&ctx, "l").await;

        assert_eq!(
            task.await.unwrap().unwrap(),
            Resume::Selected(Value::from("l"))
        );
        assert!(matches!(transport.last().await, Some(Outgoing::Delete { .. })));
        assert_eq!(ctx.menus().live_count(SessionKey(4)).await, 0);
    }

    #[tokio::test]
    async fn test_press_for_unknown_button_is_not_routed() {
        let (_transport, ctx, _invocation) = setup();
        assert!(!ctx.menus().route(SessionKey(4), "nope", None).await);
    }

    #[tokio::test]
    async fn test_abandoned_suspension_tears_menu_down() {
        let (transport, ctx, invocation) = setup();
        let menu = Menu::new("Size?").button(Button::new("s", "Small"));
        let shown = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let request = MenuRequest::layout(menu);
                let _ = tokio::time::timeout(
                    Duration::from_millis(50),
                    show_menu(ctx, &invocation, request),
                )
                .await;
            })
        };
        shown.await.unwrap();
        assert!(transport.wait_for(2, Duration::from_secs(1)).await);
        assert!(matches!(transport.last().await, Some(Outgoing::Delete { .. })));
    }
}
