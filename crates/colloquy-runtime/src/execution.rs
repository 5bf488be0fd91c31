//! Execution records - which trigger runs for which caller, and in what state.
//!
//! Each session has at most one command execution and one text-trigger
//! execution. Actions and generic handlers are not tracked.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use colloquy_core::SessionKey;

/// Execution slot of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionSlot {
    Command,
    Hears,
}

/// Execution state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Idle,
    Running,
    /// Parked at a suspension point
    Suspended,
    Completed,
    Failed,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One tracked execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub slot: ExecutionSlot,
    pub trigger: String,
    pub state: ExecutionState,
    /// Parked on an input wait right now
    pub awaiting_input: bool,
    pub ignore_commands: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Execution {
    pub fn new(slot: ExecutionSlot, trigger: impl Into<String>, ignore_commands: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            slot,
            trigger: trigger.into(),
            state: ExecutionState::Idle,
            awaiting_input: false,
            ignore_commands,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn set_state(&mut self, state: ExecutionState) {
        self.state = state;
        if state.is_terminal() {
            self.ended_at = Some(Utc::now());
            self.awaiting_input = false;
        }
    }

    pub fn is_live(&self) -> bool {
        !self.state.is_terminal()
    }
}

/// Session-keyed execution table, cheap to clone.
#[derive(Clone, Default)]
pub struct ExecutionTable {
    inner: Arc<RwLock<HashMap<(SessionKey, ExecutionSlot), Execution>>>,
}

impl ExecutionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a running execution, returning the one it displaced.
    pub async fn begin(&self, key: SessionKey, mut execution: Execution) -> Option<Execution> {
        execution.set_state(ExecutionState::Running);
        self.inner
            .write()
            .await
            .insert((key, execution.slot), execution)
    }

    /// Update the state of execution `id`; stale ids are ignored.
    pub async fn set_state(
        &self,
        key: SessionKey,
        slot: ExecutionSlot,
        id: Uuid,
        state: ExecutionState,
    ) -> bool {
        let mut inner = self.inner.write().await;
        match inner.get_mut(&(key, slot)) {
            Some(execution) if execution.id == id => {
                execution.set_state(state);
                true
            }
            _ => false,
        }
    }

    pub async fn set_awaiting_input(
        &self,
        key: SessionKey,
        slot: ExecutionSlot,
        id: Uuid,
        awaiting: bool,
    ) -> bool {
        let mut inner = self.inner.write().await;
        match inner.get_mut(&(key, slot)) {
            Some(execution) if execution.id == id && execution.is_live() => {
                execution.awaiting_input = awaiting;
                true
            }
            _ => false,
        }
    }

    /// Close execution `id` and stop tracking it.
    pub async fn finish(
        &self,
        key: SessionKey,
        slot: ExecutionSlot,
        id: Uuid,
        state: ExecutionState,
    ) -> Option<Execution> {
        let mut inner = self.inner.write().await;
        if inner.get(&(key, slot)).map(|e| e.id) != Some(id) {
            return None;
        }
        inner.remove(&(key, slot)).map(|mut execution| {
            execution.set_state(state);
            execution
        })
    }

    pub async fn current(&self, key: SessionKey, slot: ExecutionSlot) -> Option<Execution> {
        self.inner
            .read()
            .await
            .get(&(key, slot))
            .filter(|e| e.is_live())
            .cloned()
    }

    pub async fn is_running(&self, key: SessionKey, slot: ExecutionSlot) -> bool {
        self.current(key, slot).await.is_some()
    }

    /// Whether the caller's command is parked on an input wait.
    pub async fn command_awaits_input(&self, key: SessionKey) -> bool {
        self.current(key, ExecutionSlot::Command)
            .await
            .map(|e| e.awaiting_input)
            .unwrap_or(false)
    }

    /// Execution currently parked on an input wait, commands first.
    pub async fn input_owner(&self, key: SessionKey) -> Option<Execution> {
        let inner = self.inner.read().await;
        [ExecutionSlot::Command, ExecutionSlot::Hears]
            .into_iter()
            .filter_map(|slot| inner.get(&(key, slot)))
            .find(|e| e.is_live() && e.awaiting_input)
            .cloned()
    }

    pub async fn live_count(&self) -> usize {
        self.inner
            .read()
            .await
            .values()
            .filter(|e| e.is_live())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_state_stamps_end() {
        let mut execution = Execution::new(ExecutionSlot::Command, "start", false);
        execution.set_state(ExecutionState::Suspended);
        assert!(execution.ended_at.is_none());
        execution.set_state(ExecutionState::Completed);
        assert!(execution.ended_at.is_some());
        assert!(!execution.is_live());
    }

    #[test]
    fn test_begin_displaces_previous_and_finish_checks_id() {
        tokio_test::block_on(async {
            let table = ExecutionTable::new();
            let key = SessionKey(1);
            let first = Execution::new(ExecutionSlot::Command, "a", false);
            let first_id = first.id;
            assert!(table.begin(key, first).await.is_none());

            let second = Execution::new(ExecutionSlot::Command, "b", false);
            let second_id = second.id;
            let displaced = table.begin(key, second).await.unwrap();
            assert_eq!(displaced.id, first_id);

            assert!(table
                .finish(key, ExecutionSlot::Command, first_id, ExecutionState::Completed)
                .await
                .is_none());
            assert!(table.is_running(key, ExecutionSlot::Command).await);

            let done = table
                .finish(key, ExecutionSlot::Command, second_id, ExecutionState::Failed)
                .await
                .unwrap();
            assert_eq!(done.state, ExecutionState::Failed);
            assert_eq!(table.live_count().await, 0);
        });
    }

    #[test]
    fn test_input_owner_prefers_command() {
        tokio_test::block_on(async {
            let table = ExecutionTable::new();
            let key = SessionKey(2);
            let command = Execution::new(ExecutionSlot::Command, "order", true);
            let hears = Execution::new(ExecutionSlot::Hears, "hi", false);
            let (command_id, hears_id) = (command.id, hears.id);
            table.begin(key, command).await;
            table.begin(key, hears).await;

            assert!(table.input_owner(key).await.is_none());
            table
                .set_awaiting_input(key, ExecutionSlot::Hears, hears_id, true)
                .await;
            assert_eq!(table.input_owner(key).await.unwrap().trigger, "hi");

            table
                .set_awaiting_input(key, ExecutionSlot::Command, command_id, true)
                .await;
            let owner = table.input_owner(key).await.unwrap();
            assert_eq!(owner.trigger, "order");
            assert!(owner.ignore_commands);
            assert!(table.command_awaits_input(key).await);
        });
    }
}
