//! EngineContext - the process-scoped structures shared by every session.
//!
//! One context is built per bot instance and handed to the router, the
//! scheduler and every conversation; several instances coexist in tests.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use colloquy_core::{
    BotEvent, Caller, ChatId, MessageHandle, MessageStyle, SessionKey, Target, TranslationTable,
    Transport,
};
use colloquy_stores::{BroadcastEventBus, EventBus, SessionStateStore};

use crate::execution::ExecutionTable;
use crate::gate::ExecutionGate;
use crate::hooks::HookRegistry;
use crate::menu::MenuRouter;
use crate::settings::Settings;
use crate::waiting::WaitingRegistry;

pub struct EngineContext {
    transport: Arc<dyn Transport>,
    waiting: WaitingRegistry,
    store: Arc<SessionStateStore>,
    event_bus: Arc<dyn EventBus>,
    translations: Arc<TranslationTable>,
    hooks: Arc<HookRegistry>,
    executions: ExecutionTable,
    menus: MenuRouter,
    gate: ExecutionGate,
    settings: Settings,
    last_sent: RwLock<HashMap<SessionKey, MessageHandle>>,
    /// Current text of every message we sent or edited
    known_texts: RwLock<HashMap<(ChatId, i64), String>>,
}

/// Builder for [`EngineContext`].
pub struct EngineBuilder {
    transport: Arc<dyn Transport>,
    settings: Settings,
    event_bus: Option<Arc<dyn EventBus>>,
    translations: TranslationTable,
    hooks: Option<Arc<HookRegistry>>,
}

impl EngineBuilder {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn event_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn translations(mut self, translations: TranslationTable) -> Self {
        self.translations = translations;
        self
    }

    pub fn hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn build(self) -> Arc<EngineContext> {
        let event_bus = self
            .event_bus
            .unwrap_or_else(|| Arc::new(BroadcastEventBus::default()));
        let store = SessionStateStore::new().with_event_bus(event_bus.clone());
        Arc::new(EngineContext {
            transport: self.transport,
            waiting: WaitingRegistry::new(),
            store: Arc::new(store),
            event_bus,
            translations: Arc::new(self.translations),
            hooks: self.hooks.unwrap_or_default(),
            executions: ExecutionTable::new(),
            menus: MenuRouter::new(),
            gate: ExecutionGate::new(),
            settings: self.settings,
            last_sent: RwLock::new(HashMap::new()),
            known_texts: RwLock::new(HashMap::new()),
        })
    }
}

impl EngineContext {
    pub fn builder(transport: Arc<dyn Transport>) -> EngineBuilder {
        EngineBuilder {
            transport,
            settings: Settings::default(),
            event_bus: None,
            translations: TranslationTable::new(),
            hooks: None,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn waiting(&self) -> &WaitingRegistry {
        &self.waiting
    }

    pub fn store(&self) -> &Arc<SessionStateStore> {
        &self.store
    }

    pub fn event_bus(&self) -> &Arc<dyn EventBus> {
        &self.event_bus
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    pub fn executions(&self) -> &ExecutionTable {
        &self.executions
    }

    pub fn menus(&self) -> &MenuRouter {
        &self.menus
    }

    pub fn gate(&self) -> &ExecutionGate {
        &self.gate
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Translate `key` into the caller's language.
    pub fn translate(&self, key: &str, caller: &Caller) -> String {
        self.translations
            .translate(key, caller.language_or(&self.settings.default_language))
    }

    pub async fn publish(&self, event: BotEvent) {
        let name = event.name.clone();
        if let Err(err) = self.event_bus.publish(event).await {
            tracing::warn!(error = %err, event = %name, "event publish failed");
        }
    }

    /// Send an engine notice; failures are logged, not escalated.
    pub async fn notice(&self, caller: &Caller, chat_id: ChatId, text: &str) {
        let result = self
            .transport
            .send_text(&Target::Id(chat_id), text, &MessageStyle::plain())
            .await;
        match result {
            Ok(handle) => self.remember_sent(caller.id, handle).await,
            Err(err) => {
                tracing::warn!(error = %err, session = %caller.id, "engine notice not delivered")
            }
        }
    }

    pub async fn remember_sent(&self, key: SessionKey, handle: MessageHandle) {
        self.record_text(&handle).await;
        self.last_sent.write().await.insert(key, handle);
    }

    pub async fn record_text(&self, handle: &MessageHandle) {
        if let Some(text) = &handle.text {
            self.known_texts
                .write()
                .await
                .insert((handle.chat_id, handle.message_id), text.clone());
        }
    }

    /// Whether `message` already shows `text`. Falls back to the text the
    /// handle carries when we never saw the message.
    pub async fn is_unchanged(&self, message: &MessageHandle, text: &str) -> bool {
        match self
            .known_texts
            .read()
            .await
            .get(&(message.chat_id, message.message_id))
        {
            Some(known) => known == text,
            None => message.has_text(text),
        }
    }

    pub async fn forget_message(&self, message: &MessageHandle) {
        self.known_texts
            .write()
            .await
            .remove(&(message.chat_id, message.message_id));
    }

    pub async fn last_sent(&self, key: SessionKey) -> Option<MessageHandle> {
        self.last_sent.read().await.get(&key).cloned()
    }
}
