use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use colloquy_core::{Caller, InboundEvent, InputRequest, Resume, SessionKey};
use colloquy_runtime::{
    handler_fn, Dispatch, EngineContext, HandlerError, RunOutcome, Router, Trigger,
    TriggerOptions,
};
use colloquy_stores::{Outgoing, RecordingTransport, SlotSettings};

const USER: i64 = 77;

fn setup() -> (Arc<RecordingTransport>, Router) {
    let transport = Arc::new(RecordingTransport::new());
    let ctx = EngineContext::builder(transport.clone()).build();
    (transport, Router::new(ctx))
}

fn text(body: &str) -> InboundEvent {
    InboundEvent::message(Caller::new(USER), USER, body)
}

async fn send_when_waiting(router: &Router, body: &str) -> Dispatch {
    while !router.context().waiting().is_waiting(SessionKey(USER)).await {
        tokio::task::yield_now().await;
    }
    router.dispatch(text(body)).await
}

async fn press_when_shown(router: &Router, data: &str) {
    loop {
        let press = InboundEvent::button_press(Caller::new(USER), USER, data);
        if matches!(router.dispatch(press).await, Dispatch::Consumed) {
            return;
        }
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_input_retries_until_reply_matches() {
    let (transport, mut router) = setup();
    router.command(
        "age",
        handler_fn(|conversation| async move {
            let input = InputRequest::new("Age?")
                .pattern(r"^\d+$")
                .map_err(anyhow::Error::from)?
                .retries(2);
            Ok(conversation.ask(input).await?.into_value())
        }),
    );

    let run = router.dispatch(text("/age")).await;
    for reply in ["old", "very old", "30"] {
        assert!(matches!(send_when_waiting(&router, reply).await, Dispatch::Consumed));
    }

    assert_eq!(
        run.finished().await,
        Some(RunOutcome::Completed(Some(Value::from("30"))))
    );
    assert_eq!(
        transport.texts().await,
        vec!["Age?", "Invalid Input", "Invalid Input"]
    );
}

#[tokio::test]
async fn test_command_preempts_pending_input() {
    let (transport, mut router) = setup();
    router
        .command(
            "form",
            handler_fn(|conversation| async move {
                let resume = conversation.ask(InputRequest::new("Name?")).await?;
                if resume.is_superseded() {
                    return Ok(Some(json!("abandoned")));
                }
                conversation.reply("Thanks").await?;
                Ok(None)
            }),
        )
        .command(
            "help",
            handler_fn(|conversation| async move {
                conversation.reply("Help").await?;
                Ok(None)
            }),
        );
    let mut events = router.context().event_bus().subscribe();

    let form = router.dispatch(text("/form")).await;
    while !router
        .context()
        .executions()
        .command_awaits_input(SessionKey(USER))
        .await
    {
        tokio::task::yield_now().await;
    }
    let help = router.dispatch(text("/help")).await;

    assert_eq!(
        form.finished().await,
        Some(RunOutcome::Completed(Some(json!("abandoned"))))
    );
    assert!(help.finished().await.is_some_and(|o| o.is_completed()));
    assert_eq!(transport.texts().await, vec!["Name?", "Help"]);

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.name);
    }
    assert!(names.contains(&"command.cancel".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_menu_page_timeout_deletes_menu_and_resumes_empty() {
    let (transport, mut router) = setup();
    router.command(
        "pick",
        handler_fn(|conversation| async move {
            let request = conversation
                .options(["red", "green", "blue"])
                .page_timeout(Duration::from_secs(30))
                .close_on_timeout(true)
                .into_request()?;
            let resume = conversation.menu(request).await?;
            if resume == Resume::Dismissed {
                conversation.reply("Nothing picked").await?;
            }
            Ok(resume.into_value())
        }),
    );

    let outcome = router.dispatch(text("/pick")).await.finished().await;

    assert_eq!(outcome, Some(RunOutcome::Completed(None)));
    let outgoing = transport.outgoing().await;
    assert!(matches!(outgoing[0], Outgoing::Text { .. }));
    assert!(matches!(outgoing[1], Outgoing::Delete { .. }));
    assert_eq!(outgoing[2].text(), Some("Nothing picked"));
}

#[tokio::test]
async fn test_menu_selection_routes_through_dispatch() {
    let (transport, mut router) = setup();
    router.command(
        "pick",
        handler_fn(|conversation| async move {
            let request = conversation.options(["red", "green", "blue"]).into_request()?;
            Ok(conversation.menu(request).await?.into_value())
        }),
    );

    let run = router.dispatch(text("/pick")).await;
    press_when_shown(&router, "2").await;

    assert_eq!(
        run.finished().await,
        Some(RunOutcome::Completed(Some(Value::from("blue"))))
    );
    assert!(matches!(transport.last().await, Some(Outgoing::Delete { .. })));
}

#[tokio::test]
async fn test_command_resets_declared_state() {
    let (_transport, mut router) = setup();
    router.context()
        .store()
        .define("cart", SlotSettings::with_default(json!([])))
        .await
        .unwrap();
    router
        .command(
            "add",
            handler_fn(|conversation| async move {
                conversation.set_state("cart", json!(["apple"])).await;
                Ok(conversation.state("cart").await)
            }),
        )
        .register(
            Trigger::command(
                "start",
                handler_fn(|conversation| async move { Ok(conversation.state("cart").await) }),
            )
            .with_options(TriggerOptions::default().reset_state("cart", None)),
        );

    let added = router.dispatch(text("/add")).await.finished().await;
    assert_eq!(added, Some(RunOutcome::Completed(Some(json!(["apple"])))));
    let started = router.dispatch(text("/start")).await.finished().await;
    assert_eq!(started, Some(RunOutcome::Completed(Some(json!([])))));
}

#[tokio::test(start_paused = true)]
async fn test_input_timeout_reaches_handler_and_caller() {
    let (transport, mut router) = setup();
    router.command(
        "quiz",
        handler_fn(|conversation| async move {
            let input = InputRequest::new("2 + 2?").timeout(Duration::from_secs(10));
            match conversation.ask(input).await {
                Err(err) if err.is_timeout() => Ok(Some(json!("too slow"))),
                Err(err) => Err(HandlerError::from(err)),
                Ok(resume) => Ok(resume.into_value()),
            }
        }),
    );

    let outcome = router.dispatch(text("/quiz")).await.finished().await;

    assert_eq!(outcome, Some(RunOutcome::Completed(Some(json!("too slow")))));
    assert_eq!(transport.texts().await, vec!["2 + 2?", "Timed out"]);
    assert!(!router.context().waiting().is_waiting(SessionKey(USER)).await);
}

#[tokio::test]
async fn test_back_to_back_commands_newest_wins() {
    let (transport, mut router) = setup();
    for (name, prompt) in [("one", "One?"), ("two", "Two?")] {
        router.command(
            name,
            handler_fn(move |conversation| async move {
                let resume = conversation.ask(InputRequest::new(prompt)).await?;
                if resume.is_superseded() {
                    return Ok(Some(json!("abandoned")));
                }
                Ok(resume.into_value())
            }),
        );
    }

    let first = router.dispatch(text("/one")).await;
    let second = router.dispatch(text("/two")).await;
    assert!(matches!(send_when_waiting(&router, "answer").await, Dispatch::Consumed));

    assert_eq!(
        second.finished().await,
        Some(RunOutcome::Completed(Some(Value::from("answer"))))
    );
    let first = first.finished().await;
    assert!(matches!(
        first,
        Some(RunOutcome::Preempted) | Some(RunOutcome::Completed(Some(Value::String(_))))
    ));
    assert_ne!(first, Some(RunOutcome::Completed(Some(Value::from("answer")))));
    assert_eq!(transport.texts().await.last().map(String::as_str), Some("Two?"));
}

#[tokio::test]
async fn test_reset_state_seeds_value_for_new_caller() {
    let (_transport, mut router) = setup();
    router.context()
        .store()
        .define("cart", SlotSettings::with_default(json!([])))
        .await
        .unwrap();
    router.register(
        Trigger::command(
            "start",
            handler_fn(|conversation| async move { Ok(conversation.state("cart").await) }),
        )
        .with_options(TriggerOptions::default().reset_state("cart", Some(json!(["seed"])))),
    );

    let started = router.dispatch(text("/start")).await.finished().await;

    assert_eq!(started, Some(RunOutcome::Completed(Some(json!(["seed"])))));
}

#[tokio::test(start_paused = true)]
async fn test_menu_timeout_is_not_restarted_by_navigation() {
    let (transport, mut router) = setup();
    router.command(
        "pick",
        handler_fn(|conversation| async move {
            let items: Vec<u32> = (0..9).collect();
            let request = conversation
                .options(items)
                .page_size(3)
                .menu_timeout(Duration::from_secs(30))
                .close_on_timeout(true)
                .into_request()?;
            Ok(conversation.menu(request).await?.into_value())
        }),
    );

    let started = tokio::time::Instant::now();
    let run = router.dispatch(text("/pick")).await;
    let next = loop {
        let shown = transport.outgoing().await.into_iter().find_map(|o| match o {
            Outgoing::Text { style, .. } => style
                .keyboard
                .iter()
                .flatten()
                .find(|button| button.text == "➡️")
                .map(|button| button.id.clone()),
            _ => None,
        });
        if let Some(id) = shown {
            break id;
        }
        tokio::task::yield_now().await;
    };
    tokio::time::sleep(Duration::from_secs(20)).await;
    press_when_shown(&router, &next).await;

    assert_eq!(run.finished().await, Some(RunOutcome::Completed(None)));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(30));
    assert!(elapsed < Duration::from_secs(45));
    let outgoing = transport.outgoing().await;
    assert!(matches!(outgoing[1], Outgoing::Edit { .. }));
    assert!(matches!(outgoing.last(), Some(Outgoing::Delete { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_menu_timeout_without_close_fails_the_handler() {
    let (transport, mut router) = setup();
    router.command(
        "pick",
        handler_fn(|conversation| async move {
            let request = conversation
                .options(["red", "green"])
                .menu_timeout(Duration::from_secs(30))
                .close_on_timeout(false)
                .into_request()?;
            Ok(conversation.menu(request).await?.into_value())
        }),
    );

    let outcome = router.dispatch(text("/pick")).await.finished().await;

    assert_eq!(outcome, Some(RunOutcome::TimedOut));
    let outgoing = transport.outgoing().await;
    assert!(outgoing
        .iter()
        .all(|o| !matches!(o, Outgoing::Edit { .. } | Outgoing::Delete { .. })));
    assert_eq!(transport.texts().await.last().map(String::as_str), Some("Timed out"));
}
