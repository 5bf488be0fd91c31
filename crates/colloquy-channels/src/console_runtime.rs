use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};

use colloquy_core::{Caller, ChatId, InboundEvent, SessionKey};
use colloquy_runtime::{
    BootstrapError, Dispatch, EngineContext, ExecutionSlot, ExecutionState, Router, RunOutcome,
};

const TURN_SETTLE_TIMEOUT: Duration = Duration::from_secs(8);
const SETTLE_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),
    #[error("console io failed: {0}")]
    Io(#[from] std::io::Error),
}

/// One console line, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Text(String),
    /// `!data` simulates pressing the button carrying `data`
    Press(String),
    /// Blank lines and `#` comments
    Skip,
}

pub fn parse_line(line: &str) -> ConsoleInput {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return ConsoleInput::Skip;
    }
    match line.strip_prefix('!') {
        Some(data) if !data.is_empty() => ConsoleInput::Press(data.to_string()),
        _ => ConsoleInput::Text(line.to_string()),
    }
}

/// A single console user talking to a router.
pub struct ConsoleRuntime {
    router: Arc<Router>,
    caller: Caller,
    chat_id: ChatId,
    running: Mutex<Vec<JoinHandle<RunOutcome>>>,
}

impl ConsoleRuntime {
    pub fn new(router: Router, caller: Caller) -> Self {
        Self {
            router: Arc::new(router),
            chat_id: caller.id.as_i64(),
            caller,
            running: Mutex::new(Vec::new()),
        }
    }

    pub fn caller(&self) -> &Caller {
        &self.caller
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        self.router.context()
    }

    /// Dispatch one input and wait for the turn to settle.
    pub async fn submit(&self, input: ConsoleInput) -> Vec<RunOutcome> {
        let event = match input {
            ConsoleInput::Text(text) => InboundEvent::message(self.caller.clone(), self.chat_id, text),
            ConsoleInput::Press(data) => {
                InboundEvent::button_press(self.caller.clone(), self.chat_id, data)
            }
            ConsoleInput::Skip => return Vec::new(),
        };
        match self.router.dispatch(event).await {
            Dispatch::Started(handle) => self.running.lock().await.push(handle),
            Dispatch::Consumed => {}
            Dispatch::Ignored => tracing::debug!(caller = %self.caller.id, "input ignored"),
        }
        self.settle().await
    }

    /// Collect finished runs until nothing runs or every live handler is
    /// parked waiting for the user.
    pub async fn settle(&self) -> Vec<RunOutcome> {
        let deadline = Instant::now() + TURN_SETTLE_TIMEOUT;
        let mut outcomes = Vec::new();
        loop {
            let finished = {
                let mut running = self.running.lock().await;
                let (done, pending): (Vec<_>, Vec<_>) =
                    running.drain(..).partition(|handle| handle.is_finished());
                *running = pending;
                done
            };
            for handle in finished {
                let outcome = handle.await.unwrap_or_else(|err| RunOutcome::Failed {
                    error: err.to_string(),
                    handled: false,
                });
                outcomes.push(outcome);
            }

            if self.running.lock().await.is_empty() || self.is_parked().await {
                return outcomes;
            }
            if Instant::now() >= deadline {
                tracing::warn!(caller = %self.caller.id, "turn did not settle in time");
                return outcomes;
            }
            sleep(SETTLE_POLL).await;
        }
    }

    async fn is_parked(&self) -> bool {
        let ctx = self.context();
        let key = SessionKey(self.chat_id);
        for slot in [ExecutionSlot::Command, ExecutionSlot::Hears] {
            if let Some(execution) = ctx.executions().current(key, slot).await {
                if execution.state == ExecutionState::Running {
                    return false;
                }
            }
        }
        ctx.waiting().is_waiting(key).await || ctx.menus().live_count(key).await > 0
    }
}

/// Feed `reader` line by line into the runtime until end of input.
///
/// With `echo` set each line is printed before it is dispatched, which
/// keeps scripted transcripts readable.
pub async fn run_console<R>(
    runtime: &ConsoleRuntime,
    reader: R,
    echo: bool,
) -> Result<Vec<RunOutcome>, ChannelError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut outcomes = Vec::new();
    while let Some(line) = lines.next_line().await? {
        let input = parse_line(&line);
        if input == ConsoleInput::Skip {
            continue;
        }
        if echo {
            println!("> {}", line.trim());
        }
        for outcome in runtime.submit(input).await {
            report(&outcome);
            outcomes.push(outcome);
        }
    }
    for outcome in runtime.settle().await {
        report(&outcome);
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

fn report(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Failed {
            error,
            handled: false,
        } => eprintln!("Error: {error}"),
        other => tracing::debug!(outcome = ?other, "run finished"),
    }
}
