//! Third-party notifications rendered from a handlebars template.

use chrono::Utc;
use handlebars::Handlebars;
use serde_json::{json, Map, Value};

use colloquy_core::{BotEvent, MessageHandle, NotifyRequest, Target};

use crate::context::EngineContext;
use crate::conversation::Invocation;

/// A target that could not be notified.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyFailure {
    pub target: Target,
    pub error: String,
}

/// Per-target outcome of one notification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotifyReport {
    pub delivered: Vec<MessageHandle>,
    pub failed: Vec<NotifyFailure>,
}

impl NotifyReport {
    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Template variables: fixed names (with one-letter aliases) plus the
/// request's source fields. Fixed names win on collision.
pub fn template_vars(invocation: &Invocation, source: &Map<String, Value>) -> Value {
    let now = Utc::now();
    let epoch = now.timestamp();
    let date = now.format("%Y-%m-%d %H:%M:%S").to_string();
    let username = invocation.caller.bare_handle();

    let mut vars = source.clone();
    let fixed = json!({
        "id": invocation.caller.id,
        "i": invocation.caller.id,
        "username": username,
        "u": username,
        "epoch": epoch,
        "e": epoch,
        "date": date,
        "d": date,
        "now": date,
        "type": invocation.kind.as_str(),
        "t": invocation.kind.as_str(),
        "name": invocation.name,
        "n": invocation.name,
    });
    if let Value::Object(fixed) = fixed {
        vars.extend(fixed);
    }
    Value::Object(vars)
}

pub fn render(template: &str, vars: &Value) -> Result<String, handlebars::RenderError> {
    let mut registry = Handlebars::new();
    registry.register_escape_fn(handlebars::no_escape);
    registry.render_template(template, vars)
}

/// Render and deliver to every target; failures are collected per target.
pub async fn deliver(
    ctx: &EngineContext,
    invocation: &Invocation,
    request: &NotifyRequest,
) -> NotifyReport {
    let mut report = NotifyReport::default();
    let vars = template_vars(invocation, &request.source);
    let text = match render(&request.template, &vars) {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(error = %err, trigger = %invocation.name, "notification template failed");
            report.failed = request
                .targets
                .iter()
                .map(|target| NotifyFailure {
                    target: target.clone(),
                    error: err.to_string(),
                })
                .collect();
            publish_failures(ctx, invocation, &report).await;
            return report;
        }
    };

    for target in &request.targets {
        match ctx
            .transport()
            .send_text(target, &text, &request.style)
            .await
        {
            Ok(handle) => report.delivered.push(handle),
            Err(err) => {
                tracing::warn!(error = %err, target = ?target, "notification not delivered");
                report.failed.push(NotifyFailure {
                    target: target.clone(),
                    error: err.to_string(),
                });
            }
        }
    }

    publish_failures(ctx, invocation, &report).await;
    report
}

async fn publish_failures(ctx: &EngineContext, invocation: &Invocation, report: &NotifyReport) {
    for failure in &report.failed {
        ctx.publish(BotEvent::internal_json(
            "notify.failed",
            &json!({
                "trigger": invocation.name,
                "target": failure.target,
                "error": failure.error,
            }),
        ))
        .await;
    }
}
