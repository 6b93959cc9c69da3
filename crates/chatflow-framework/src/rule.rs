//! Rule definitions.
//!
//! Rules are the declarative units a bot contributes to dispatch. They are
//! collected into a [`Ruleset`] when the bot is constructed and indexed once
//! by the [`RuleRegistry`](crate::RuleRegistry); dispatch never mutates them.
//!
//! All handlers are synchronous closures over a [`Ctx`]. Returning
//! `Ok(None)` means "no payload" and lets dispatch fall through where the
//! precedence rules allow it.
//!
//! ```rust,ignore
//! let rules = Ruleset::new()
//!     .command(CommandRule::new("version", "show version", |_ctx, _args| {
//!         Ok(Some(Payload::text(env!("CARGO_PKG_VERSION"))))
//!     }))
//!     .action(
//!         ActionRule::new("confirm_action", "Are you sure?")
//!             .option("yes", |_ctx| Ok(Some(Payload::text("confirmed"))))
//!             .option("no", |_ctx| Ok(Some(Payload::text("aborted")))),
//!     );
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chatflow_core::Payload;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::Ctx;
use crate::error::BotResult;
use crate::grammar::Args;

// =============================================================================
// Handler Types
// =============================================================================

pub type CommandFn = Arc<dyn Fn(&Ctx, &Args) -> BotResult<Option<Payload>> + Send + Sync>;
pub type SessionFn = Arc<dyn Fn(&Ctx, &SessionInput<'_>) -> BotResult<SessionTurn> + Send + Sync>;
pub type ActionFn = Arc<dyn Fn(&Ctx) -> BotResult<Option<Payload>> + Send + Sync>;
pub type ConditionFn = Arc<dyn Fn(&Ctx, &Payload) -> BotResult<Option<Payload>> + Send + Sync>;
pub type ToolFn = Arc<dyn Fn(&Ctx, &Value) -> BotResult<Value> + Send + Sync>;
pub type CronFn = Arc<dyn Fn(&Ctx) -> Vec<Payload> + Send + Sync>;

/// Rule categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Command,
    Session,
    Action,
    Pipeline,
    Condition,
    Cron,
    Form,
    Tool,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Command => "command",
            RuleKind::Session => "session",
            RuleKind::Action => "action",
            RuleKind::Pipeline => "pipeline",
            RuleKind::Condition => "condition",
            RuleKind::Cron => "cron",
            RuleKind::Form => "form",
            RuleKind::Tool => "tool",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Command
// =============================================================================

/// A `/`-prefixed command matched by grammar.
#[derive(Clone)]
pub struct CommandRule {
    pub define: String,
    pub help: String,
    pub handler: CommandFn,
}

impl CommandRule {
    pub fn new<F>(define: impl Into<String>, help: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Ctx, &Args) -> BotResult<Option<Payload>> + Send + Sync + 'static,
    {
        Self {
            define: define.into(),
            help: help.into(),
            handler: Arc::new(handler),
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// Input of one session turn.
#[derive(Debug, Clone, Copy)]
pub struct SessionInput<'a> {
    /// Values the session was started with.
    pub init: &'a Value,
    /// Values returned by the previous turn.
    pub last: &'a Value,
    /// Plain text of the incoming message.
    pub content: &'a str,
}

/// Result of one session turn.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionTurn {
    /// Keep the session open; `values` become the next turn's `last`.
    Continue {
        payload: Option<Payload>,
        values: Value,
    },
    /// Close the session.
    Done(Option<Payload>),
}

impl SessionTurn {
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            SessionTurn::Continue { payload, .. } | SessionTurn::Done(payload) => payload.as_ref(),
        }
    }
}

/// A multi-turn conversation handler.
#[derive(Clone)]
pub struct SessionRule {
    pub id: String,
    /// Prompt shown when the session starts.
    pub title: String,
    pub handler: SessionFn,
}

impl SessionRule {
    pub fn new<F>(id: impl Into<String>, title: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Ctx, &SessionInput<'_>) -> BotResult<SessionTurn> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            title: title.into(),
            handler: Arc::new(handler),
        }
    }

    /// Payload that asks the engine to start this session.
    pub fn prompt(&self) -> Payload {
        Payload::session(self.id.clone(), self.title.clone())
    }
}

// =============================================================================
// Action
// =============================================================================

/// A button prompt with one handler per option.
#[derive(Clone)]
pub struct ActionRule {
    pub id: String,
    pub title: String,
    /// Long-term actions may be answered repeatedly.
    pub long_term: bool,
    options: Vec<String>,
    handlers: HashMap<String, ActionFn>,
}

impl ActionRule {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            long_term: false,
            options: Vec::new(),
            handlers: HashMap::new(),
        }
    }

    /// Adds an option and its handler.
    pub fn option<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Ctx) -> BotResult<Option<Payload>> + Send + Sync + 'static,
    {
        let name = name.into();
        if !self.handlers.contains_key(&name) {
            self.options.push(name.clone());
        }
        self.handlers.insert(name, Arc::new(handler));
        self
    }

    pub fn long_term(mut self, long_term: bool) -> Self {
        self.long_term = long_term;
        self
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn handler(&self, option: &str) -> Option<&ActionFn> {
        self.handlers.get(option)
    }

    /// The button prompt.
    pub fn prompt(&self) -> Payload {
        Payload::action(self.id.clone(), self.title.clone(), self.options.clone())
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// One stage of a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Runs the first matching command of `bot` with `args` as input.
    Command { bot: String, args: String },
    /// Emits the prompt of an action rule.
    Action { rule_id: String },
    /// Starts a session.
    Session { rule_id: String },
    /// Emits the question of a form rule.
    Form { rule_id: String },
    /// Emits a fixed payload.
    Message(Payload),
}

impl Stage {
    pub fn command(bot: impl Into<String>, args: impl Into<String>) -> Self {
        Stage::Command {
            bot: bot.into(),
            args: args.into(),
        }
    }

    pub fn action(rule_id: impl Into<String>) -> Self {
        Stage::Action {
            rule_id: rule_id.into(),
        }
    }

    pub fn session(rule_id: impl Into<String>) -> Self {
        Stage::Session {
            rule_id: rule_id.into(),
        }
    }

    pub fn form(rule_id: impl Into<String>) -> Self {
        Stage::Form {
            rule_id: rule_id.into(),
        }
    }

    /// Whether the pipeline waits for the user after emitting this stage.
    ///
    /// Action and session stages resume through their callbacks; the other
    /// stages chain straight into the next one.
    pub fn awaits_reply(&self) -> bool {
        matches!(self, Stage::Action { .. } | Stage::Session { .. })
    }
}

/// A multi-stage workflow started with `~<trigger>`.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRule {
    pub id: String,
    pub version: u32,
    pub help: String,
    pub trigger: String,
    pub steps: Vec<Stage>,
}

impl PipelineRule {
    pub fn new(id: impl Into<String>, trigger: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: 1,
            help: help.into(),
            trigger: trigger.into(),
            steps: Vec::new(),
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn step(mut self, stage: Stage) -> Self {
        self.steps.push(stage);
        self
    }
}

// =============================================================================
// Condition, Form, Tool, Cron
// =============================================================================

/// Handles forwarded messages whose payload carries tag `tye`.
#[derive(Clone)]
pub struct ConditionRule {
    pub tye: String,
    pub handler: ConditionFn,
}

impl ConditionRule {
    pub fn new<F>(tye: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Ctx, &Payload) -> BotResult<Option<Payload>> + Send + Sync + 'static,
    {
        Self {
            tye: tye.into(),
            handler: Arc::new(handler),
        }
    }
}

/// A question with a fixed set of fields.
#[derive(Debug, Clone, PartialEq)]
pub struct FormRule {
    pub id: String,
    pub title: String,
    pub fields: Vec<String>,
}

impl FormRule {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, label: impl Into<String>) -> Self {
        self.fields.push(label.into());
        self
    }

    pub fn question(&self) -> Payload {
        Payload::Question {
            title: self.title.clone(),
            options: self.fields.clone(),
        }
    }
}

/// A named function other components may invoke with JSON arguments.
#[derive(Clone)]
pub struct ToolRule {
    pub id: String,
    pub description: String,
    pub handler: ToolFn,
}

impl ToolRule {
    pub fn new<F>(id: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Ctx, &Value) -> BotResult<Value> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            description: description.into(),
            handler: Arc::new(handler),
        }
    }
}

/// Who a scheduled rule runs for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CronScope {
    /// Once per tick; the payloads go to every contact.
    System,
    /// Once per contact, with the contact as the acting user.
    #[default]
    User,
}

/// A scheduled rule.
#[derive(Clone)]
pub struct CronRule {
    pub name: String,
    pub help: String,
    pub scope: CronScope,
    /// Cron expression with a seconds field.
    pub when: String,
    pub action: CronFn,
}

impl CronRule {
    pub fn new<F>(name: impl Into<String>, when: impl Into<String>, action: F) -> Self
    where
        F: Fn(&Ctx) -> Vec<Payload> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            help: String::new(),
            scope: CronScope::User,
            when: when.into(),
            action: Arc::new(action),
        }
    }

    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    pub fn scope(mut self, scope: CronScope) -> Self {
        self.scope = scope;
        self
    }
}

// =============================================================================
// Ruleset
// =============================================================================

/// Every rule contributed by one bot.
#[derive(Clone, Default)]
pub struct Ruleset {
    pub commands: Vec<CommandRule>,
    pub sessions: Vec<SessionRule>,
    pub actions: Vec<ActionRule>,
    pub pipelines: Vec<PipelineRule>,
    pub conditions: Vec<ConditionRule>,
    pub forms: Vec<FormRule>,
    pub tools: Vec<ToolRule>,
    pub crons: Vec<CronRule>,
}

impl Ruleset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command(mut self, rule: CommandRule) -> Self {
        self.commands.push(rule);
        self
    }

    pub fn session(mut self, rule: SessionRule) -> Self {
        self.sessions.push(rule);
        self
    }

    pub fn action(mut self, rule: ActionRule) -> Self {
        self.actions.push(rule);
        self
    }

    pub fn pipeline(mut self, rule: PipelineRule) -> Self {
        self.pipelines.push(rule);
        self
    }

    pub fn condition(mut self, rule: ConditionRule) -> Self {
        self.conditions.push(rule);
        self
    }

    pub fn form(mut self, rule: FormRule) -> Self {
        self.forms.push(rule);
        self
    }

    pub fn tool(mut self, rule: ToolRule) -> Self {
        self.tools.push(rule);
        self
    }

    pub fn cron(mut self, rule: CronRule) -> Self {
        self.crons.push(rule);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
            && self.sessions.is_empty()
            && self.actions.is_empty()
            && self.pipelines.is_empty()
            && self.conditions.is_empty()
            && self.forms.is_empty()
            && self.tools.is_empty()
            && self.crons.is_empty()
    }
}

impl fmt::Debug for Ruleset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ruleset")
            .field("commands", &self.commands.len())
            .field("sessions", &self.sessions.len())
            .field("actions", &self.actions.len())
            .field("pipelines", &self.pipelines.len())
            .field("conditions", &self.conditions.len())
            .field("forms", &self.forms.len())
            .field("tools", &self.tools.len())
            .field("crons", &self.crons.len())
            .finish()
    }
}
