//! The demo bot and its rules.

use std::collections::BTreeMap;

use chatflow::prelude::*;
use chrono::Timelike;
use serde_json::{Value, json};

pub struct DemoBot {
    rules: Ruleset,
}

impl DemoBot {
    pub fn new() -> Self {
        let todo = SessionRule::new("todo", "What should I remember? Say 'done' to finish.", |_, input| {
            let mut items: Vec<Value> = input.last["items"].as_array().cloned().unwrap_or_default();
            if input.content == "done" {
                let list = items
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                return Ok(SessionTurn::Done(Some(Payload::text(format!("Saved: {list}")))));
            }
            items.push(json!(input.content));
            Ok(SessionTurn::Continue {
                payload: Some(Payload::text(format!("Noted ({} so far)", items.len()))),
                values: json!({ "items": items }),
            })
        });
        let todo_prompt = todo.prompt();

        let rules = Ruleset::new()
            .command(CommandRule::new("echo [string]", "repeat the text", |_, args| {
                Ok(args.str(0).map(Payload::text))
            }))
            .command(CommandRule::new("add [number] [number]", "add two numbers", |_, args| {
                let (a, b) = (args.i64(0).unwrap_or_default(), args.i64(1).unwrap_or_default());
                Ok(Some(Payload::text(format!("{a} + {b} = {}", a + b))))
            }))
            .command(CommandRule::new("todo", "start a todo list", move |_, _| {
                Ok(Some(todo_prompt.clone()))
            }))
            .command(CommandRule::new("time", "show the server clock", |ctx, _| {
                let clock = ctx.rules().call_tool(ctx, "clock", &Value::Null)?;
                Ok(Some(Payload::info(
                    "Clock",
                    BTreeMap::from([("now".to_string(), clock)]),
                )))
            }))
            .command(CommandRule::new("whoami", "show who is talking", |ctx, _| {
                Ok(Some(Payload::text(format!("{} on {}", ctx.uid(), ctx.platform()))))
            }))
            .session(todo)
            .action(
                ActionRule::new("confirm", "Share it?")
                    .option("yes", |_| Ok(Some(Payload::text("Shared."))))
                    .option("no", |_| Ok(Some(Payload::text("Kept private.")))),
            )
            .pipeline(
                PipelineRule::new("share", "share [string]", "share a note after confirming")
                    .step(Stage::Message(Payload::text("Preparing your note")))
                    .step(Stage::action("confirm")),
            )
            .condition(ConditionRule::new("text", |_, payload| {
                Ok(Some(Payload::text(format!(
                    "You forwarded: {}",
                    payload.to_message().alt_text()
                ))))
            }))
            .tool(ToolRule::new("clock", "current time", |ctx, _| {
                Ok(json!(ctx.now().to_rfc3339()))
            }))
            .cron(
                CronRule::new("stretch", "0 * * * * *", |ctx| {
                    vec![Payload::text(format!(
                        "{:02}:{:02} - time to stretch, {}",
                        ctx.now().hour(),
                        ctx.now().minute(),
                        ctx.uid()
                    ))]
                })
                .help("a reminder every minute"),
            );

        Self { rules }
    }
}

#[async_trait]
impl Bot for DemoBot {
    fn name(&self) -> &str {
        "demo"
    }

    fn rules(&self) -> &Ruleset {
        &self.rules
    }

    async fn input(&self, _ctx: &Ctx, content: &str) -> BotResult<Option<Payload>> {
        Ok(Some(Payload::text(format!(
            "You said '{content}'. Try 'help', /todo or ~share hello."
        ))))
    }
}
