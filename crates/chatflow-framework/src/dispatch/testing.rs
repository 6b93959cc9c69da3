//! Fixtures shared by the dispatch tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chatflow_core::{Event, Message, MessageEventData, Payload, SelfInfo, TopicType};
use parking_lot::Mutex;
use serde_json::{Value, json};

use super::{DispatchConfig, Engine};
use crate::bot::Bot;
use crate::context::Ctx;
use crate::error::{BotError, BotResult, DispatchError, DispatchResult};
use crate::outbox::{Envelope, Outbox};
use crate::registry::RuleRegistry;
use crate::rule::{
    ActionRule, CommandRule, ConditionRule, FormRule, PipelineRule, Ruleset, SessionRule,
    SessionTurn, Stage,
};
use crate::store::MemoryStore;

pub(crate) const PLATFORM: &str = "fake";

#[derive(Default)]
pub(crate) struct RecordingOutbox {
    pub sent: Mutex<Vec<Envelope>>,
    /// Rejects every envelope while set.
    pub offline: AtomicBool,
}

impl RecordingOutbox {
    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|e| e.payload.to_message().alt_text())
            .collect()
    }

    pub fn last(&self) -> Option<Envelope> {
        self.sent.lock().last().cloned()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

#[async_trait]
impl Outbox for RecordingOutbox {
    async fn send(&self, envelope: Envelope) -> DispatchResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(DispatchError::Delivery {
                platform: envelope.platform().to_string(),
                retcode: 34001,
                message: "platform offline".into(),
            });
        }
        self.sent.lock().push(envelope);
        Ok(())
    }
}

pub(crate) struct TestBot {
    pub name: &'static str,
    pub rules: Ruleset,
    pub ready: bool,
    pub fail_input: bool,
    pub inputs: AtomicUsize,
}

impl TestBot {
    pub fn new(name: &'static str, rules: Ruleset) -> Self {
        Self {
            name,
            rules,
            ready: true,
            fail_input: false,
            inputs: AtomicUsize::new(0),
        }
    }

    pub fn inputs(&self) -> usize {
        self.inputs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Bot for TestBot {
    fn name(&self) -> &str {
        self.name
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn rules(&self) -> &Ruleset {
        &self.rules
    }

    async fn input(&self, _ctx: &Ctx, content: &str) -> BotResult<Option<Payload>> {
        self.inputs.fetch_add(1, Ordering::SeqCst);
        if self.fail_input {
            return Err(BotError::handler("input exploded"));
        }
        Ok(Some(Payload::text(format!("echo: {content}"))))
    }

    async fn group(&self, _ctx: &Ctx, content: &str) -> BotResult<Option<Payload>> {
        Ok(Some(Payload::text(format!("group: {content}"))))
    }
}

/// Rules of the `dev` test bot.
pub(crate) fn dev_rules() -> Ruleset {
    let todo = SessionRule::new("todo", "What to do?", |_ctx, input| {
        if input.content == "done" {
            return Ok(SessionTurn::Done(Some(Payload::text("saved"))));
        }
        Ok(SessionTurn::Continue {
            payload: Some(Payload::text(format!("noted {}", input.content))),
            values: json!({ "last": input.content }),
        })
    });
    let todo_prompt = todo.prompt();

    Ruleset::new()
        .command(CommandRule::new("version", "show version", |_, _| {
            Ok(Some(Payload::text(format!("chatflow {}", env!("CARGO_PKG_VERSION")))))
        }))
        .command(CommandRule::new("foo bar", "first", |_, _| {
            Ok(Some(Payload::text("first")))
        }))
        .command(CommandRule::new("foo [string]", "second", |_, _| {
            Ok(Some(Payload::text("second")))
        }))
        .command(CommandRule::new("nothing", "returns nothing", |_, _| Ok(None)))
        .command(CommandRule::new("todo", "start a todo", move |_, _| {
            Ok(Some(todo_prompt.clone()))
        }))
        .command(CommandRule::new("add [number] [number]", "add numbers", |_, args| {
            let sum = args.i64(0).unwrap_or_default() + args.i64(1).unwrap_or_default();
            Ok(Some(Payload::text(sum.to_string())))
        }))
        .session(todo)
        .action(
            ActionRule::new("confirm_action", "Sure?")
                .option("yes", |_| Ok(Some(Payload::text("confirmed"))))
                .option("no", |_| Ok(None)),
        )
        .action(
            ActionRule::new("publish_action", "Publish?")
                .long_term(true)
                .option("yes", |_| Ok(Some(Payload::text("published")))),
        )
        .form(FormRule::new("profile", "Tell me").field("name"))
        .pipeline(
            PipelineRule::new("share", "share [string]", "share something")
                .step(Stage::action("confirm_action"))
                .step(Stage::action("confirm_action"))
                .step(Stage::action("publish_action")),
        )
        .pipeline(
            PipelineRule::new("survey", "survey", "answer a survey")
                .step(Stage::Message(Payload::text("welcome")))
                .step(Stage::session("todo"))
                .step(Stage::form("profile")),
        )
        .condition(ConditionRule::new("bookmark", |_, payload| {
            let url = match payload {
                Payload::Custom { data, .. } => data["url"].as_str().unwrap_or_default().to_string(),
                _ => String::new(),
            };
            Ok(Some(Payload::text(format!("bookmarked {url}"))))
        }))
        .condition(ConditionRule::new("quiet", |_, _| Ok(None)))
}

pub(crate) struct Harness {
    pub engine: Engine,
    pub outbox: Arc<RecordingOutbox>,
    pub store: Arc<MemoryStore>,
    pub bot: Arc<TestBot>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(TestBot::new("dev", dev_rules()), DispatchConfig::default())
    }

    pub fn with(bot: TestBot, config: DispatchConfig) -> Self {
        let bot = Arc::new(bot);
        let rules = Arc::new(
            RuleRegistry::builder()
                .with(bot.clone())
                .and_then(|b| b.build())
                .expect("test rules are valid"),
        );
        let store = Arc::new(MemoryStore::new());
        let outbox = Arc::new(RecordingOutbox::default());
        let engine = Engine::new(rules, store.clone(), outbox.clone()).with_config(config);
        Self {
            engine,
            outbox,
            store,
            bot,
        }
    }

    pub fn ctx(&self) -> Ctx {
        Ctx::detached(
            SelfInfo::new(PLATFORM, "B1"),
            "u1",
            "t1",
            self.engine.rules().clone(),
        )
    }
}

/// A direct message from `u1` in topic `t1` with a fresh id.
pub(crate) fn message(text: &str) -> MessageEventData {
    MessageEventData {
        self_info: SelfInfo::new(PLATFORM, "B1"),
        message_id: uuid::Uuid::new_v4().to_string(),
        message: Message::text(text),
        alt_message: text.to_string(),
        user_id: "u1".to_string(),
        topic_id: "t1".to_string(),
        topic_type: TopicType::Dm,
        ..Default::default()
    }
}

pub(crate) fn direct(text: &str) -> Event {
    Event::direct(message(text))
}

pub(crate) fn src_url(url: &str) -> Value {
    json!({ "url": url })
}
