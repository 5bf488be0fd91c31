//! The demo bot: a handful of triggers showing off each suspension kind.

use std::time::Duration;

use regex::Regex;
use serde_json::{json, Value};

use colloquy_core::{InputRequest, OnceRule, Presence, PresenceRequest, Resume};
use colloquy_runtime::{
    handler_fn, BotApp, Conversation, HandlerError, HandlerResult, Pattern, Trigger,
    TriggerOptions,
};
use colloquy_stores::SlotSettings;

const BASKET: &str = "basket";

const FRUITS: [&str; 10] = [
    "apple", "banana", "cherry", "date", "elderberry", "fig", "grape", "kiwi", "lemon", "mango",
];

const FORTUNES: [&str; 4] = [
    "A quiet afternoon brings a good idea.",
    "Someone will ask you for advice today.",
    "The long way round is shorter than it looks.",
    "You will finish what you start this week.",
];

pub async fn register(app: &mut BotApp) -> anyhow::Result<()> {
    app.context
        .store()
        .define(BASKET, SlotSettings::with_default(json!([])))
        .await?;
    let marker = app.context.settings().command_marker.clone();

    let router = &mut app.router;
    router
        .register(
            Trigger::command("start", handler_fn(start))
                .with_options(TriggerOptions::default().reset_state(BASKET, None)),
        )
        .command("age", handler_fn(age))
        .command("fruit", handler_fn(fruit))
        .command("basket", handler_fn(basket))
        .register(
            Trigger::command("fortune", handler_fn(fortune)).with_options(
                TriggerOptions::default()
                    .once_for_user(OnceRule::Every(Duration::from_secs(24 * 60 * 60))),
            ),
        )
        .hears(
            Pattern::regex(Regex::new(r"(?i)^(hi|hello)\b")?),
            handler_fn(greet),
        );

    let mut listing: Vec<String> = router
        .command_names()
        .into_iter()
        .map(|name| format!("{marker}{name}"))
        .collect();
    listing.push(format!("{marker}help"));
    let help = format!("Commands:\n{}", listing.join("\n"));
    router.command(
        "help",
        handler_fn(move |conversation| {
            let help = help.clone();
            async move {
                conversation.reply(help).await?;
                Ok(None)
            }
        }),
    );
    Ok(())
}

async fn start(conversation: Conversation) -> HandlerResult {
    conversation.reply(conversation.translate("greeting")).await?;
    Ok(None)
}

async fn greet(conversation: Conversation) -> HandlerResult {
    let word = conversation.capture(1).unwrap_or("hello").to_lowercase();
    conversation.reply(format!("{word} to you too")).await?;
    Ok(None)
}

async fn age(conversation: Conversation) -> HandlerResult {
    let input = InputRequest::new("How old are you?")
        .pattern(r"^\d{1,3}$")
        .map_err(anyhow::Error::from)?
        .retries(3)
        .timeout(Duration::from_secs(60));
    let resume = match conversation.ask(input).await {
        Ok(resume) => resume,
        // the engine already told the user
        Err(err) if err.is_timeout() => return Ok(None),
        Err(err) => return Err(HandlerError::from(err)),
    };
    match resume {
        Resume::Text(years) => {
            conversation
                .reply(format!("{years} is a fine age"))
                .await?;
            Ok(Some(Value::String(years)))
        }
        Resume::NoMatch => Err(HandlerError::reply("Let's skip that for now.")),
        _ => Ok(None),
    }
}

async fn fruit(conversation: Conversation) -> HandlerResult {
    let request = conversation
        .options(FRUITS)
        .menu_timeout(Duration::from_secs(120))
        .into_request()?;
    let Resume::Selected(choice) = conversation.menu(request).await? else {
        conversation.reply("Maybe next time.").await?;
        return Ok(None);
    };

    let mut basket: Vec<Value> = conversation.state_as(BASKET).await.unwrap_or_default();
    basket.push(choice.clone());
    conversation.set_state(BASKET, Value::Array(basket)).await;
    if let Some(name) = choice.as_str() {
        conversation.reply(format!("Added {name} to your basket")).await?;
    }
    Ok(Some(choice))
}

async fn basket(conversation: Conversation) -> HandlerResult {
    let basket: Vec<String> = conversation.state_as(BASKET).await.unwrap_or_default();
    let text = if basket.is_empty() {
        "Your basket is empty".to_string()
    } else {
        format!("Your basket: {}", basket.join(", "))
    };
    conversation.reply(text).await?;
    Ok(None)
}

async fn fortune(conversation: Conversation) -> HandlerResult {
    conversation
        .presence(PresenceRequest::new(Presence::Typing).and_wait())
        .await?;
    let pick = conversation.caller().id.as_i64().unsigned_abs() as usize % FORTUNES.len();
    conversation.reply(FORTUNES[pick]).await?;
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use colloquy_core::{Caller, InboundEvent};
    use colloquy_stores::RecordingTransport;

    async fn demo() -> (Arc<RecordingTransport>, BotApp) {
        let transport = Arc::new(RecordingTransport::new());
        let config = concat!(env!("CARGO_MANIFEST_DIR"), "/../../configs/colloquy.yaml");
        let mut app = BotApp::from_config_path(config, transport.clone())
            .await
            .unwrap();
        register(&mut app).await.unwrap();
        (transport, app)
    }

    fn say(text: &str) -> InboundEvent {
        InboundEvent::message(Caller::new(5), 5, text)
    }

    #[tokio::test]
    async fn test_shipped_config_runs_start_help_and_basket() {
        let (transport, app) = demo().await;
        for text in ["/start", "/help", "/basket"] {
            assert!(app.router.dispatch(say(text)).await.finished().await.is_some());
        }

        let texts = transport.texts().await;
        assert_eq!(texts[0], "Hi! Type /help to see what I can do.");
        assert!(texts[1].contains("/fruit"));
        assert!(texts[1].ends_with("/help"));
        assert_eq!(texts[2], "Your basket is empty");
    }

    #[tokio::test]
    async fn test_greeting_matches_case_insensitively() {
        let (transport, app) = demo().await;
        let outcome = app.router.dispatch(say("Hello there")).await.finished().await;
        assert!(outcome.is_some_and(|o| o.is_completed()));
        assert_eq!(transport.texts().await, vec!["hello to you too"]);
    }
}
