//! SessionStateStore - per-caller mutable slots.
//!
//! Slots are declared once with [`SlotSettings`] and materialise per caller
//! on first access. Lifecycle rules (read-count expiry, timeout expiry,
//! timer resets) are evaluated lazily on `get`/`set`; nothing runs in the
//! background. The store also keeps each caller's once-record, trigger
//! counters and last text-trigger captures.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::Instant;

use colloquy_core::{BotEvent, OnceRecord, OnceRule, SessionKey};

use crate::{EventBus, StoreError};

/// Declaration of one state slot.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotSettings {
    pub default: Value,
    /// Reads until the slot expires and resets
    pub usage_count: Option<u32>,
    /// Expiry after this long; the timer arms on first access
    pub timeout: Option<Duration>,
    /// Value after any expiry, unless a more specific one is set
    pub defaults_to: Option<Value>,
    pub default_when_expires: Option<Value>,
    pub default_when_timeouts: Option<Value>,
    /// Only the first lifecycle reset takes effect
    pub reset_once: bool,
    pub reading_resets_timer: bool,
    pub writing_resets_timer: bool,
    pub emits_event: bool,
}

impl Default for SlotSettings {
    fn default() -> Self {
        Self {
            default: Value::Null,
            usage_count: None,
            timeout: None,
            defaults_to: None,
            default_when_expires: None,
            default_when_timeouts: None,
            reset_once: false,
            reading_resets_timer: false,
            writing_resets_timer: false,
            emits_event: true,
        }
    }
}

impl SlotSettings {
    pub fn with_default(default: impl Into<Value>) -> Self {
        Self {
            default: default.into(),
            ..Self::default()
        }
    }

    pub fn usage_count(mut self, reads: u32) -> Self {
        self.usage_count = Some(reads);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn defaults_to(mut self, value: impl Into<Value>) -> Self {
        self.defaults_to = Some(value.into());
        self
    }

    pub fn default_when_expires(mut self, value: impl Into<Value>) -> Self {
        self.default_when_expires = Some(value.into());
        self
    }

    pub fn default_when_timeouts(mut self, value: impl Into<Value>) -> Self {
        self.default_when_timeouts = Some(value.into());
        self
    }

    pub fn reset_once(mut self) -> Self {
        self.reset_once = true;
        self
    }

    pub fn reading_resets_timer(mut self) -> Self {
        self.reading_resets_timer = true;
        self
    }

    pub fn writing_resets_timer(mut self) -> Self {
        self.writing_resets_timer = true;
        self
    }

    pub fn silent(mut self) -> Self {
        self.emits_event = false;
        self
    }

    fn validate(&self, name: &str) -> Result<(), StoreError> {
        if self.usage_count == Some(0) {
            return Err(StoreError::InvalidSlot(
                name.to_string(),
                "usage_count must be positive".to_string(),
            ));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(StoreError::InvalidSlot(
                name.to_string(),
                "timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn value_after_expiry(&self) -> Value {
        self.default_when_expires
            .as_ref()
            .or(self.defaults_to.as_ref())
            .unwrap_or(&self.default)
            .clone()
    }

    fn value_after_timeout(&self) -> Value {
        self.default_when_timeouts
            .as_ref()
            .or(self.defaults_to.as_ref())
            .unwrap_or(&self.default)
            .clone()
    }
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    reads_left: Option<u32>,
    deadline: Option<Instant>,
    armed: bool,
    reset_spent: bool,
}

impl Slot {
    fn fresh(settings: &SlotSettings, value: Value) -> Self {
        Self {
            value,
            reads_left: settings.usage_count,
            deadline: None,
            armed: false,
            reset_spent: false,
        }
    }

    /// Restore lifecycle counters; `false` once a reset-once slot is spent.
    fn reset_lifecycle(&mut self, settings: &SlotSettings) -> bool {
        if settings.reset_once && self.reset_spent {
            return false;
        }
        self.reset_spent = true;
        self.reads_left = settings.usage_count;
        self.deadline = None;
        self.armed = false;
        true
    }

    fn expire_timeout(&mut self, settings: &SlotSettings, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                if self.reset_lifecycle(settings) {
                    self.value = settings.value_after_timeout();
                }
                true
            }
            _ => false,
        }
    }

    fn arm_if_needed(&mut self, settings: &SlotSettings, now: Instant) -> bool {
        match settings.timeout {
            Some(timeout) if !self.armed => {
                self.armed = true;
                self.deadline = Some(now + timeout);
                true
            }
            _ => false,
        }
    }

    fn restart_timer(&mut self, settings: &SlotSettings, now: Instant) -> bool {
        match (settings.timeout, self.deadline) {
            (Some(timeout), Some(_)) => {
                self.deadline = Some(now + timeout);
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    slots: HashMap<String, Slot>,
    once: OnceRecord,
    counters: HashMap<String, u32>,
    last_match: Option<Vec<Option<String>>>,
}

/// Per-instance store of per-caller state.
pub struct SessionStateStore {
    definitions: RwLock<HashMap<String, SlotSettings>>,
    sessions: RwLock<HashMap<SessionKey, SessionState>>,
    event_bus: Option<Arc<dyn EventBus>>,
}

impl Default for SessionStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateStore {
    pub fn new() -> Self {
        Self {
            definitions: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Declare (or redeclare) a slot for all callers.
    pub async fn define(
        &self,
        name: impl Into<String>,
        settings: SlotSettings,
    ) -> Result<(), StoreError> {
        let name = name.into();
        settings.validate(&name)?;
        self.definitions.write().await.insert(name, settings);
        Ok(())
    }

    async fn settings_for(&self, name: &str) -> Option<SlotSettings> {
        self.definitions.read().await.get(name).cloned()
    }

    /// Read a slot. Undeclared slots that were never written read as `None`.
    pub async fn get(&self, key: SessionKey, name: &str) -> Option<Value> {
        let declared = self.settings_for(name).await;
        let now = Instant::now();
        let mut events = Vec::new();

        let value = {
            let mut sessions = self.sessions.write().await;
            let (session, settings) = match &declared {
                Some(settings) => (sessions.entry(key).or_default(), settings.clone()),
                None => match sessions.get_mut(&key) {
                    Some(session) if session.slots.contains_key(name) => {
                        (session, SlotSettings::default())
                    }
                    _ => return None,
                },
            };
            let slot = session
                .slots
                .entry(name.to_string())
                .or_insert_with(|| Slot::fresh(&settings, settings.default.clone()));

            if slot.expire_timeout(&settings, now) {
                events.push("prop.timeout");
            }

            let value = slot.value.clone();

            if let Some(left) = slot.reads_left {
                let left = left.saturating_sub(1);
                slot.reads_left = Some(left);
                if left == 0 {
                    if slot.reset_lifecycle(&settings) {
                        slot.value = settings.value_after_expiry();
                    } else {
                        slot.reads_left = None;
                    }
                    events.push("prop.expired");
                }
            }

            if settings.reading_resets_timer && slot.restart_timer(&settings, now) {
                events.push("prop.timerreset");
            }
            if slot.arm_if_needed(&settings, now) {
                events.push("prop.timerreset");
            }

            if !settings.emits_event {
                events.clear();
            }
            value
        };

        self.emit_all(name, events).await;
        Some(value)
    }

    /// Read a slot and deserialize it.
    pub async fn get_as<T: DeserializeOwned>(&self, key: SessionKey, name: &str) -> Option<T> {
        let value = self.get(key, name).await?;
        serde_json::from_value(value).ok()
    }

    pub async fn set(&self, key: SessionKey, name: &str, value: impl Into<Value>) {
        let settings = self.settings_for(name).await.unwrap_or_default();
        let value = value.into();
        let now = Instant::now();
        let mut events = Vec::new();

        {
            let mut sessions = self.sessions.write().await;
            let session = sessions.entry(key).or_default();
            match session.slots.get_mut(name) {
                Some(slot) => {
                    if slot.expire_timeout(&settings, now) {
                        events.push("prop.timeout");
                    }
                    slot.value = value;
                    if settings.writing_resets_timer && slot.restart_timer(&settings, now) {
                        events.push("prop.timerreset");
                    }
                    if slot.arm_if_needed(&settings, now) {
                        events.push("prop.timerreset");
                    }
                }
                None => {
                    let mut slot = Slot::fresh(&settings, value);
                    if slot.arm_if_needed(&settings, now) {
                        events.push("prop.timerreset");
                    }
                    session.slots.insert(name.to_string(), slot);
                }
            }
            if !settings.emits_event {
                events.clear();
            }
        }

        self.emit_all(name, events).await;
    }

    /// Put a slot back to `value` (or its declared default) and restore its
    /// lifecycle counters. A declared slot the caller never touched starts
    /// fresh at `value`; undeclared slots that were never written are ignored.
    pub async fn reset(&self, key: SessionKey, name: &str, value: Option<Value>) -> bool {
        let declared = self.settings_for(name).await;
        let mut sessions = self.sessions.write().await;

        if let Some(settings) = &declared {
            let session = sessions.entry(key).or_default();
            if !session.slots.contains_key(name) {
                let value = value.unwrap_or_else(|| settings.default.clone());
                session
                    .slots
                    .insert(name.to_string(), Slot::fresh(settings, value));
                return true;
            }
        }

        let Some(slot) = sessions
            .get_mut(&key)
            .and_then(|session| session.slots.get_mut(name))
        else {
            return false;
        };
        let settings = declared.unwrap_or_default();
        slot.value = value.unwrap_or_else(|| settings.default.clone());
        slot.reset_lifecycle(&settings);
        true
    }

    /// Admit a per-caller once-limited trigger.
    pub async fn admit_once(&self, key: SessionKey, name: &str, rule: OnceRule) -> bool {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        sessions.entry(key).or_default().once.admit(name, rule, now)
    }

    /// Bump a per-caller counter and return the new count.
    pub async fn increment(&self, key: SessionKey, counter: &str) -> u32 {
        let mut sessions = self.sessions.write().await;
        let count = sessions
            .entry(key)
            .or_default()
            .counters
            .entry(counter.to_string())
            .or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub async fn counter(&self, key: SessionKey, counter: &str) -> u32 {
        let sessions = self.sessions.read().await;
        sessions
            .get(&key)
            .and_then(|s| s.counters.get(counter).copied())
            .unwrap_or(0)
    }

    pub async fn set_last_match(&self, key: SessionKey, captures: Option<Vec<Option<String>>>) {
        let mut sessions = self.sessions.write().await;
        sessions.entry(key).or_default().last_match = captures;
    }

    pub async fn last_match(&self, key: SessionKey) -> Option<Vec<Option<String>>> {
        let sessions = self.sessions.read().await;
        sessions.get(&key).and_then(|s| s.last_match.clone())
    }

    /// Drop everything held for `key`, once-records included.
    pub async fn reset_session(&self, key: SessionKey) -> bool {
        self.sessions.write().await.remove(&key).is_some()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn emit_all(&self, slot: &str, events: Vec<&'static str>) {
        let Some(bus) = &self.event_bus else {
            return;
        };
        for name in events {
            if let Err(err) = bus
                .publish(BotEvent::internal(name, Some(slot.to_string())))
                .await
            {
                tracing::warn!(error = %err, event = name, slot, "failed to publish slot event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BroadcastEventBus;
    use serde_json::json;

    fn key() -> SessionKey {
        SessionKey::new(42)
    }

    #[test]
    fn test_undeclared_slot_reads_none_until_written() {
        tokio_test::block_on(async {
            let store = SessionStateStore::new();
            assert_eq!(store.get(key(), "name").await, None);
            assert_eq!(store.session_count().await, 0);

            store.set(key(), "name", "alice").await;
            assert_eq!(store.get(key(), "name").await, Some(json!("alice")));
            assert_eq!(
                store.get_as::<String>(key(), "name").await.as_deref(),
                Some("alice")
            );
        });
    }

    #[test]
    fn test_reset_seeds_declared_slot_for_new_caller() {
        tokio_test::block_on(async {
            let store = SessionStateStore::new();
            store
                .define("cart", SlotSettings::with_default(json!([])))
                .await
                .unwrap();

            assert!(store.reset(key(), "cart", Some(json!(["seed"]))).await);
            assert_eq!(store.get(key(), "cart").await, Some(json!(["seed"])));

            let other = SessionKey::new(7);
            assert!(store.reset(other, "cart", None).await);
            assert_eq!(store.get(other, "cart").await, Some(json!([])));

            assert!(!store.reset(key(), "unknown", Some(json!(1))).await);
            assert_eq!(store.get(key(), "unknown").await, None);
        });
    }

    #[test]
    fn test_slots_are_per_caller() {
        tokio_test::block_on(async {
            let store = SessionStateStore::new();
            store
                .define("score", SlotSettings::with_default(0))
                .await
                .unwrap();
            store.set(key(), "score", 10).await;
            assert_eq!(store.get(key(), "score").await, Some(json!(10)));
            assert_eq!(store.get(SessionKey::new(7), "score").await, Some(json!(0)));
        });
    }

    #[test]
    fn test_usage_count_expires_after_reads() {
        tokio_test::block_on(async {
            let bus = Arc::new(BroadcastEventBus::new(16));
            let mut rx = bus.subscribe();
            let store = SessionStateStore::new().with_event_bus(bus);
            store
                .define(
                    "token",
                    SlotSettings::with_default("none")
                        .usage_count(2)
                        .defaults_to("spent"),
                )
                .await
                .unwrap();

            store.set(key(), "token", "abc").await;
            assert_eq!(store.get(key(), "token").await, Some(json!("abc")));
            // The expiring read still observes the old value.
            assert_eq!(store.get(key(), "token").await, Some(json!("abc")));
            assert_eq!(store.get(key(), "token").await, Some(json!("spent")));

            let event = rx.recv().await.unwrap();
            assert_eq!(event.name, "prop.expired");
            assert_eq!(event.data.as_deref(), Some("token"));
        });
    }

    #[test]
    fn test_reset_once_only_applies_first_reset() {
        tokio_test::block_on(async {
            let store = SessionStateStore::new();
            store
                .define(
                    "hint",
                    SlotSettings::with_default(true)
                        .usage_count(1)
                        .default_when_expires(false)
                        .reset_once()
                        .silent(),
                )
                .await
                .unwrap();

            assert_eq!(store.get(key(), "hint").await, Some(json!(true)));
            assert_eq!(store.get(key(), "hint").await, Some(json!(false)));
            store.set(key(), "hint", true).await;
            // Second expiry is spent: the value stays.
            assert_eq!(store.get(key(), "hint").await, Some(json!(true)));
            assert_eq!(store.get(key(), "hint").await, Some(json!(true)));
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_applies_lazily_on_access() {
        let store = SessionStateStore::new();
        store
            .define(
                "draft",
                SlotSettings::with_default("")
                    .timeout(Duration::from_secs(10))
                    .default_when_timeouts("expired"),
            )
            .await
            .unwrap();

        store.set(key(), "draft", "hello").await;
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(store.get(key(), "draft").await, Some(json!("hello")));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.get(key(), "draft").await, Some(json!("expired")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reading_resets_timer() {
        let store = SessionStateStore::new();
        store
            .define(
                "cart",
                SlotSettings::with_default(0)
                    .timeout(Duration::from_secs(10))
                    .reading_resets_timer(),
            )
            .await
            .unwrap();

        store.set(key(), "cart", 3).await;
        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(8)).await;
            assert_eq!(store.get(key(), "cart").await, Some(json!(3)));
        }
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.get(key(), "cart").await, Some(json!(0)));
    }

    #[test]
    fn test_reset_restores_default_or_override() {
        tokio_test::block_on(async {
            let store = SessionStateStore::new();
            store
                .define("step", SlotSettings::with_default(0))
                .await
                .unwrap();
            assert!(!store.reset(key(), "step", None).await);

            store.set(key(), "step", 4).await;
            assert!(store.reset(key(), "step", None).await);
            assert_eq!(store.get(key(), "step").await, Some(json!(0)));

            assert!(store.reset(key(), "step", Some(json!(9))).await);
            assert_eq!(store.get(key(), "step").await, Some(json!(9)));
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_once_record_cleared_only_by_session_reset() {
        let store = SessionStateStore::new();
        assert!(store.admit_once(key(), "start", OnceRule::Ever).await);
        assert!(!store.admit_once(key(), "start", OnceRule::Ever).await);
        assert!(store.admit_once(SessionKey::new(1), "start", OnceRule::Ever).await);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(!store.admit_once(key(), "start", OnceRule::Ever).await);

        assert!(store.reset_session(key()).await);
        assert!(store.admit_once(key(), "start", OnceRule::Ever).await);
    }

    #[test]
    fn test_counters_and_captures() {
        tokio_test::block_on(async {
            let store = SessionStateStore::new();
            assert_eq!(store.counter(key(), "hears:hi").await, 0);
            assert_eq!(store.increment(key(), "hears:hi").await, 1);
            assert_eq!(store.increment(key(), "hears:hi").await, 2);

            store
                .set_last_match(key(), Some(vec![Some("hi bob".into()), Some("bob".into())]))
                .await;
            let captures = store.last_match(key()).await.unwrap();
            assert_eq!(captures[1].as_deref(), Some("bob"));
        });
    }

    #[test]
    fn test_invalid_slot_settings_rejected() {
        tokio_test::block_on(async {
            let store = SessionStateStore::new();
            let err = store
                .define("x", SlotSettings::default().usage_count(0))
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::InvalidSlot(name, _) if name == "x"));
        });
    }
}
