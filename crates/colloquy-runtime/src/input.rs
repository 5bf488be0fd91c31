//! Input-wait protocol: prompt, wait, validate, retry.
//!
//! The wait is registered before the prompt goes out so that a reply racing
//! the prompt's delivery still finds it.

use colloquy_core::{ConversationError, InputRequest, MessageHandle, Resume, Target};

use crate::context::EngineContext;
use crate::conversation::Invocation;
use crate::waiting::{WaitOutcome, Waiter};

/// Run one input exchange for the invoking caller.
///
/// Resolves to the reply text, `Superseded`, `Empty` for a text-less reply
/// when no pattern is set, or `NoMatch` once every attempt failed.
pub(crate) async fn ask_for_input(
    ctx: &EngineContext,
    invocation: &Invocation,
    input: InputRequest,
) -> Result<Resume, ConversationError> {
    let key = invocation.session();
    let match_error = input
        .match_error
        .clone()
        .unwrap_or_else(|| ctx.settings().match_error.clone());
    let attempts = input.attempts();

    for attempt in 0..attempts {
        let waiter = register(ctx, invocation, &input).await;
        if let Some(err) = waiter.refusal() {
            tracing::debug!(error = %err, session = %key, "input wait refused, prompt not sent");
            return Err(err.clone());
        }

        if attempt == 0 || input.keep_asking {
            if let Err(err) = send_prompt(ctx, invocation, &input, attempt == 0).await {
                ctx.waiting().reject(key, err.clone()).await;
                return Err(err);
            }
        }

        set_awaiting(ctx, invocation, true).await;
        let outcome = waiter.await;
        set_awaiting(ctx, invocation, false).await;

        let event = match outcome? {
            WaitOutcome::Superseded => return Ok(Resume::Superseded),
            WaitOutcome::Event(event) => event,
        };

        match event.text() {
            Some(text) if input.accepts(text) => return Ok(Resume::Text(text.to_string())),
            None if input.pattern.is_none() => return Ok(Resume::Empty),
            _ => {}
        }

        tracing::debug!(session = %key, attempt, "input did not match");
        let retries_left = attempt + 1 < attempts;
        if retries_left && !match_error.is_empty() {
            let text = ctx.translate(&match_error, &invocation.caller);
            if let Err(err) = ctx
                .transport()
                .send_text(&Target::Id(invocation.chat_id), &text, &input.match_error_style)
                .await
            {
                tracing::warn!(error = %err, session = %key, "match error not delivered");
            }
        }
    }

    Ok(Resume::NoMatch)
}

async fn register(ctx: &EngineContext, invocation: &Invocation, input: &InputRequest) -> Waiter {
    let key = invocation.session();
    if input.cancel_previous {
        ctx.waiting().replace(key, input.timeout).await
    } else {
        ctx.waiting().wait(key, false, input.timeout).await
    }
}

async fn send_prompt(
    ctx: &EngineContext,
    invocation: &Invocation,
    input: &InputRequest,
    first: bool,
) -> Result<MessageHandle, ConversationError> {
    let transport = ctx.transport();
    let handle = match (&input.edit, first) {
        (Some(message), true) => transport.edit_text(message, &input.prompt, &input.style).await?,
        _ => {
            transport
                .send_text(&Target::Id(invocation.chat_id), &input.prompt, &input.style)
                .await?
        }
    };
    ctx.remember_sent(invocation.session(), handle.clone()).await;
    if let Some(on_sent) = &input.on_sent {
        on_sent(&handle);
    }
    Ok(handle)
}

async fn set_awaiting(ctx: &EngineContext, invocation: &Invocation, awaiting: bool) {
    if let Some((slot, id)) = invocation.execution {
        ctx.executions()
            .set_awaiting_input(invocation.session(), slot, id, awaiting)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use colloquy_core::{Caller, InboundEvent, SessionKey};
    use colloquy_stores::RecordingTransport;

    use crate::trigger::TriggerKind;

    fn setup() -> (Arc<RecordingTransport>, Arc<EngineContext>, Arc<Invocation>) {
        let transport = Arc::new(RecordingTransport::new());
        let ctx = EngineContext::builder(transport.clone()).build();
        let invocation = Arc::new(Invocation::new(
            TriggerKind::Command,
            "age",
            Caller::new(9),
            9,
        ));
        (transport, ctx, invocation)
    }

    async fn reply_when_waiting(ctx: &EngineContext, text: &str) {
        let key = SessionKey(9);
        while !ctx.waiting().is_waiting(key).await {
            tokio::task::yield_now().await;
        }
        let event = InboundEvent::message(Caller::new(9), 9, text);
        assert!(ctx.waiting().resolve(key, event).await);
    }

    #[tokio::test]
    async fn test_exhausted_retries_resume_no_match() {
        let (transport, ctx, invocation) = setup();
        let input = InputRequest::new("Age?").pattern(r"^\d+$").unwrap().retries(2);

        let task = {
            let ctx = ctx.clone();
            let invocation = invocation.clone();
            tokio::spawn(async move { ask_for_input(&ctx, &invocation, input).await })
        };
        for reply in ["abc", "def", "ghi"] {
            reply_when_waiting(&ctx, reply).await;
        }

        assert_eq!(task.await.unwrap().unwrap(), Resume::NoMatch);
        assert_eq!(
            transport.texts().await,
            vec!["Age?", "Invalid Input", "Invalid Input"]
        );
    }

    #[tokio::test]
    async fn test_third_reply_matching_is_returned() {
        let (_transport, ctx, invocation) = setup();
        let input = InputRequest::new("Age?").pattern(r"^\d+$").unwrap().retries(2);

        let task = {
            let ctx = ctx.clone();
            let invocation = invocation.clone();
            tokio::spawn(async move { ask_for_input(&ctx, &invocation, input).await })
        };
        for reply in ["abc", "def", "42"] {
            reply_when_waiting(&ctx, reply).await;
        }

        assert_eq!(task.await.unwrap().unwrap(), Resume::Text("42".to_string()));
    }

    #[tokio::test]
    async fn test_keep_asking_reprompts_and_calls_on_sent() {
        let (transport, ctx, invocation) = setup();
        let sent = Arc::new(AtomicUsize::new(0));
        let counter = sent.clone();
        let input = InputRequest::new("Color?")
            .pattern("^(red|blue)$")
            .unwrap()
            .retries(1)
            .match_error("")
            .keep_asking()
            .on_sent(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        let task = {
            let ctx = ctx.clone();
            let invocation = invocation.clone();
            tokio::spawn(async move { ask_for_input(&ctx, &invocation, input).await })
        };
        reply_when_waiting(&ctx, "green").await;
        reply_when_waiting(&ctx, "blue").await;

        assert_eq!(task.await.unwrap().unwrap(), Resume::Text("blue".to_string()));
        assert_eq!(transport.texts().await, vec!["Color?", "Color?"]);
        assert_eq!(sent.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_superseded_wait_returns_sentinel() {
        let (_transport, ctx, invocation) = setup();
        let task = {
            let ctx = ctx.clone();
            let invocation = invocation.clone();
            tokio::spawn(async move {
                ask_for_input(&ctx, &invocation, InputRequest::new("Name?")).await
            })
        };
        while !ctx.waiting().is_waiting(SessionKey(9)).await {
            tokio::task::yield_now().await;
        }
        assert!(ctx.waiting().cancel(SessionKey(9)).await);
        assert_eq!(task.await.unwrap().unwrap(), Resume::Superseded);
    }

    #[tokio::test]
    async fn test_refused_wait_sends_no_prompt() {
        let (transport, ctx, invocation) = setup();
        let _held = ctx.waiting().wait(SessionKey(9), false, None).await;

        let result = ask_for_input(&ctx, &invocation, InputRequest::new("Name?")).await;

        assert_eq!(result, Err(ConversationError::AlreadyWaiting));
        assert_eq!(transport.count().await, 0);
        assert!(ctx.waiting().is_waiting(SessionKey(9)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_is_an_error() {
        let (_transport, ctx, invocation) = setup();
        let input = InputRequest::new("Quick!").timeout(Duration::from_secs(5));
        let result = ask_for_input(&ctx, &invocation, input).await;
        assert_eq!(result, Err(ConversationError::Timeout));
        assert!(!ctx.waiting().is_waiting(SessionKey(9)).await);
    }
}
