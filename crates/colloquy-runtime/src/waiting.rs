//! WaitingRegistry - correlates inbound events with suspended handlers.
//!
//! At most one [`PendingWait`] exists per session key. A pending wait is
//! settled exactly once: by a matching event, a timeout, a rejection or a
//! supersession. Events arriving while nobody waits are dropped.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use colloquy_core::{ConversationError, InboundEvent, SessionKey};

/// Predicate over inbound events attached to a wait.
pub type Predicate = Arc<dyn Fn(&InboundEvent) -> bool + Send + Sync>;

/// How a wait settled successfully.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    Event(InboundEvent),
    /// Pre-empted by a newer wait or a command
    Superseded,
}

impl WaitOutcome {
    pub fn is_superseded(&self) -> bool {
        matches!(self, Self::Superseded)
    }

    pub fn into_event(self) -> Option<InboundEvent> {
        match self {
            Self::Event(event) => Some(event),
            Self::Superseded => None,
        }
    }
}

type Settlement = Result<WaitOutcome, ConversationError>;

enum Condition {
    None,
    /// All predicates must hold, otherwise the wait is rejected
    RejectUnless(Vec<Predicate>),
    /// Events are ignored until the predicate holds
    Until(Predicate),
}

struct PendingWait {
    generation: u64,
    waiters: Vec<oneshot::Sender<Settlement>>,
    condition: Condition,
    timer: Option<JoinHandle<()>>,
}

impl PendingWait {
    /// Every waiter went away without the wait being settled.
    fn is_orphaned(&self) -> bool {
        self.waiters.iter().all(|tx| tx.is_closed())
    }

    /// Settle every waiter; `false` when none was still listening.
    fn settle(self, settlement: Settlement) -> bool {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        let mut delivered = false;
        for tx in self.waiters {
            delivered |= tx.send(settlement.clone()).is_ok();
        }
        delivered
    }
}

/// Future of one wait.
pub struct Waiter {
    rx: oneshot::Receiver<Settlement>,
    refused: Option<ConversationError>,
}

impl Waiter {
    fn new(rx: oneshot::Receiver<Settlement>) -> Self {
        Self { rx, refused: None }
    }

    fn failed(error: ConversationError) -> Self {
        let (_, rx) = oneshot::channel();
        Self {
            rx,
            refused: Some(error),
        }
    }

    /// Why the wait was never registered, if it was refused.
    pub fn refusal(&self) -> Option<&ConversationError> {
        self.refused.as_ref()
    }
}

impl Future for Waiter {
    type Output = Settlement;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(error) = self.refused.take() {
            return Poll::Ready(Err(error));
        }
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(ConversationError::Closed)))
    }
}

/// Process-scoped table of pending waits, cheap to clone.
#[derive(Clone, Default)]
pub struct WaitingRegistry {
    pending: Arc<Mutex<HashMap<SessionKey, PendingWait>>>,
    generations: Arc<AtomicU64>,
}

impl WaitingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the next event of `key`.
    ///
    /// Fails with `AlreadyWaiting` when a wait exists and `append` is false.
    /// Appending joins the existing wait, which keeps its timer.
    pub async fn wait(&self, key: SessionKey, append: bool, timeout: Option<Duration>) -> Waiter {
        let mut pending = self.pending.lock().await;
        Self::drop_orphan(&mut pending, key);
        if let Some(existing) = pending.get_mut(&key) {
            if !append || matches!(existing.condition, Condition::Until(_)) {
                return Waiter::failed(ConversationError::AlreadyWaiting);
            }
            let (tx, rx) = oneshot::channel();
            existing.waiters.push(tx);
            return Waiter::new(rx);
        }
        self.install(&mut pending, key, Condition::None, timeout)
    }

    /// Supersede any pending wait of `key`, then wait afresh.
    pub async fn replace(&self, key: SessionKey, timeout: Option<Duration>) -> Waiter {
        let mut pending = self.pending.lock().await;
        if let Some(previous) = pending.remove(&key) {
            previous.settle(Ok(WaitOutcome::Superseded));
            tracing::debug!(session = %key, "pending wait superseded");
        }
        self.install(&mut pending, key, Condition::None, timeout)
    }

    /// Offer an event to the pending wait of `key`.
    ///
    /// Returns `false` when nobody was waiting, when a wait-until condition
    /// ignored the event, or when a reject-unless condition rejected it.
    pub async fn resolve(&self, key: SessionKey, event: InboundEvent) -> bool {
        let mut pending = self.pending.lock().await;
        Self::drop_orphan(&mut pending, key);
        let accepted = match pending.get(&key).map(|w| &w.condition) {
            None => return false,
            Some(Condition::None) => true,
            Some(Condition::RejectUnless(predicates)) => predicates.iter().all(|p| p(&event)),
            Some(Condition::Until(predicate)) => {
                if !predicate(&event) {
                    return false;
                }
                true
            }
        };

        match pending.remove(&key) {
            Some(wait) if accepted => wait.settle(Ok(WaitOutcome::Event(event))),
            Some(wait) => {
                wait.settle(Err(ConversationError::ConditionUnmet));
                false
            }
            None => false,
        }
    }

    /// Force-fail the pending wait of `key`.
    pub async fn reject(&self, key: SessionKey, error: ConversationError) -> bool {
        let removed = self.pending.lock().await.remove(&key);
        match removed {
            Some(wait) => {
                wait.settle(Err(error));
                true
            }
            None => false,
        }
    }

    /// Settle the pending wait of `key` with `Superseded`.
    pub async fn cancel(&self, key: SessionKey) -> bool {
        let removed = self.pending.lock().await.remove(&key);
        match removed {
            Some(wait) => {
                wait.settle(Ok(WaitOutcome::Superseded));
                true
            }
            None => false,
        }
    }

    /// Attach a predicate to the wait of `key`, creating the wait if needed.
    ///
    /// Reject-unless predicates compose by AND and may join a plain wait.
    /// A wait-until predicate needs the key to be free.
    pub async fn add_condition(
        &self,
        key: SessionKey,
        predicate: Predicate,
        reject_on_mismatch: bool,
    ) -> Waiter {
        let mut pending = self.pending.lock().await;
        Self::drop_orphan(&mut pending, key);

        if let Some(existing) = pending.get_mut(&key) {
            if !reject_on_mismatch {
                return Waiter::failed(ConversationError::AlreadyWaiting);
            }
            match &mut existing.condition {
                Condition::Until(_) => return Waiter::failed(ConversationError::AlreadyWaiting),
                Condition::RejectUnless(predicates) => predicates.push(predicate),
                Condition::None => existing.condition = Condition::RejectUnless(vec![predicate]),
            }
            let (tx, rx) = oneshot::channel();
            existing.waiters.push(tx);
            return Waiter::new(rx);
        }

        let condition = if reject_on_mismatch {
            Condition::RejectUnless(vec![predicate])
        } else {
            Condition::Until(predicate)
        };
        self.install(&mut pending, key, condition, None)
    }

    pub async fn is_waiting(&self, key: SessionKey) -> bool {
        let mut pending = self.pending.lock().await;
        Self::drop_orphan(&mut pending, key);
        pending.contains_key(&key)
    }

    /// Forget a wait whose suspended side was dropped, e.g. by a
    /// conversation-level timeout.
    fn drop_orphan(pending: &mut HashMap<SessionKey, PendingWait>, key: SessionKey) {
        if pending.get(&key).is_some_and(PendingWait::is_orphaned) {
            if let Some(wait) = pending.remove(&key) {
                wait.settle(Err(ConversationError::Closed));
                tracing::debug!(session = %key, "orphaned wait dropped");
            }
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    fn install(
        &self,
        pending: &mut HashMap<SessionKey, PendingWait>,
        key: SessionKey,
        condition: Condition,
        timeout: Option<Duration>,
    ) -> Waiter {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let timer = timeout
            .filter(|t| !t.is_zero())
            .map(|t| self.spawn_timer(key, generation, t));
        pending.insert(
            key,
            PendingWait {
                generation,
                waiters: vec![tx],
                condition,
                timer,
            },
        );
        Waiter::new(rx)
    }

    fn spawn_timer(&self, key: SessionKey, generation: u64, timeout: Duration) -> JoinHandle<()> {
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let mut pending = pending.lock().await;
            // A newer wait for the same key owns its own timer.
            if pending.get(&key).map(|w| w.generation) != Some(generation) {
                return;
            }
            if let Some(mut wait) = pending.remove(&key) {
                wait.timer = None;
                wait.settle(Err(ConversationError::Timeout));
                tracing::debug!(session = %key, ?timeout, "pending wait timed out");
            }
        })
    }
}
