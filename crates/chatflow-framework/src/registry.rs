//! Rule registry.
//!
//! Indexes every bot's rules once at boot so that dispatch resolves a rule
//! by id with a map read instead of scanning all bots.
//!
//! # Uniqueness
//!
//! | Category | Key | Duplicates |
//! |----------|-----|------------|
//! | bot | name | error |
//! | session, action, pipeline, form, tool, cron | id / name | error, across all bots |
//! | command | grammar | allowed; first registered wins |
//! | condition | payload tag | allowed; first ready bot wins |
//!
//! Grammars are compiled and pipeline stages are checked against the other
//! indexes here, so a broken rule fails the boot instead of a request.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chatflow_core::{RegistryError, RegistryResult};
use serde_json::Value;
use tracing::{debug, info};

use crate::bot::BoxedBot;
use crate::context::Ctx;
use crate::error::{BotError, BotResult};
use crate::grammar::Grammar;
use crate::rule::{
    ActionRule, CommandRule, ConditionRule, CronRule, FormRule, PipelineRule, RuleKind,
    SessionRule, Stage, ToolRule,
};

/// A command rule with its compiled grammar.
#[derive(Clone)]
pub struct CompiledCommand {
    pub bot: usize,
    pub rule: CommandRule,
    pub grammar: Grammar,
}

/// A pipeline rule with its compiled trigger.
#[derive(Clone)]
pub struct CompiledPipeline {
    pub bot: usize,
    pub rule: PipelineRule,
    pub trigger: Grammar,
}

/// A rule resolved by [`RuleRegistry::find`].
#[derive(Clone, Copy)]
pub enum RuleRef<'a> {
    Session(&'a SessionRule),
    Action(&'a ActionRule),
    Pipeline(&'a PipelineRule),
    Form(&'a FormRule),
    Tool(&'a ToolRule),
    Cron(&'a CronRule),
}

// =============================================================================
// Builder
// =============================================================================

/// Collects bots during boot.
#[derive(Default)]
pub struct RuleRegistryBuilder {
    bots: Vec<BoxedBot>,
}

impl RuleRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a bot; names must be unique.
    pub fn register(&mut self, bot: BoxedBot) -> RegistryResult<()> {
        if self.bots.iter().any(|b| b.name() == bot.name()) {
            return Err(RegistryError::DuplicateBot(bot.name().to_string()));
        }
        info!(bot = %bot.name(), "Registered bot");
        self.bots.push(bot);
        Ok(())
    }

    pub fn with(mut self, bot: BoxedBot) -> RegistryResult<Self> {
        self.register(bot)?;
        Ok(self)
    }

    /// Builds and validates the indexes.
    pub fn build(self) -> RegistryResult<RuleRegistry> {
        let mut registry = RuleRegistry {
            by_name: self
                .bots
                .iter()
                .enumerate()
                .map(|(i, b)| (b.name().to_string(), i))
                .collect(),
            bots: self.bots,
            ..Default::default()
        };

        for (idx, bot) in registry.bots.iter().enumerate() {
            let rules = bot.rules();
            for rule in &rules.commands {
                let grammar = compile(&rule.define)?;
                registry.commands.push(CompiledCommand {
                    bot: idx,
                    rule: rule.clone(),
                    grammar,
                });
            }
            for rule in &rules.sessions {
                insert_unique(&mut registry.sessions, RuleKind::Session, &rule.id, (idx, rule.clone()))?;
            }
            for rule in &rules.actions {
                insert_unique(&mut registry.actions, RuleKind::Action, &rule.id, (idx, rule.clone()))?;
            }
            for rule in &rules.forms {
                insert_unique(&mut registry.forms, RuleKind::Form, &rule.id, (idx, rule.clone()))?;
            }
            for rule in &rules.tools {
                insert_unique(&mut registry.tools, RuleKind::Tool, &rule.id, (idx, rule.clone()))?;
            }
            for rule in &rules.crons {
                if registry.crons.iter().any(|(_, c)| c.name == rule.name) {
                    return Err(duplicate(RuleKind::Cron, &rule.name));
                }
                registry.crons.push((idx, rule.clone()));
            }
            for rule in &rules.pipelines {
                if registry.pipelines.iter().any(|p| p.rule.id == rule.id) {
                    return Err(duplicate(RuleKind::Pipeline, &rule.id));
                }
                let trigger = compile(&rule.trigger)?;
                registry.pipelines.push(CompiledPipeline {
                    bot: idx,
                    rule: rule.clone(),
                    trigger,
                });
            }
            for rule in &rules.conditions {
                registry
                    .conditions
                    .entry(rule.tye.clone())
                    .or_default()
                    .push((idx, rule.clone()));
            }
        }

        for pipeline in &registry.pipelines {
            registry.check_pipeline(&pipeline.rule)?;
        }

        debug!(
            bots = registry.bots.len(),
            commands = registry.commands.len(),
            pipelines = registry.pipelines.len(),
            "Rule registry built"
        );
        Ok(registry)
    }
}

fn compile(define: &str) -> RegistryResult<Grammar> {
    Grammar::parse(define).map_err(|e| RegistryError::InvalidRule {
        id: define.to_string(),
        reason: e.to_string(),
    })
}

fn duplicate(kind: RuleKind, id: &str) -> RegistryError {
    RegistryError::DuplicateRule {
        kind: kind.to_string(),
        id: id.to_string(),
    }
}

fn insert_unique<T>(
    map: &mut HashMap<String, (usize, T)>,
    kind: RuleKind,
    id: &str,
    value: (usize, T),
) -> RegistryResult<()> {
    if map.contains_key(id) {
        return Err(duplicate(kind, id));
    }
    map.insert(id.to_string(), value);
    Ok(())
}

// =============================================================================
// Registry
// =============================================================================

/// Immutable index of bots and their rules.
#[derive(Default)]
pub struct RuleRegistry {
    bots: Vec<BoxedBot>,
    by_name: HashMap<String, usize>,
    commands: Vec<CompiledCommand>,
    pipelines: Vec<CompiledPipeline>,
    sessions: HashMap<String, (usize, SessionRule)>,
    actions: HashMap<String, (usize, ActionRule)>,
    forms: HashMap<String, (usize, FormRule)>,
    tools: HashMap<String, (usize, ToolRule)>,
    crons: Vec<(usize, CronRule)>,
    conditions: HashMap<String, Vec<(usize, ConditionRule)>>,
}

impl RuleRegistry {
    pub fn builder() -> RuleRegistryBuilder {
        RuleRegistryBuilder::new()
    }

    fn check_pipeline(&self, rule: &PipelineRule) -> RegistryResult<()> {
        let invalid = |reason: String| RegistryError::InvalidRule {
            id: rule.id.clone(),
            reason,
        };
        if rule.steps.is_empty() {
            return Err(invalid("pipeline has no steps".to_string()));
        }
        for stage in &rule.steps {
            let missing = match stage {
                Stage::Command { bot, .. } => (!self.by_name.contains_key(bot)).then(|| format!("bot '{bot}'")),
                Stage::Action { rule_id } => (!self.actions.contains_key(rule_id)).then(|| format!("action '{rule_id}'")),
                Stage::Session { rule_id } => (!self.sessions.contains_key(rule_id)).then(|| format!("session '{rule_id}'")),
                Stage::Form { rule_id } => (!self.forms.contains_key(rule_id)).then(|| format!("form '{rule_id}'")),
                Stage::Message(_) => None,
            };
            if let Some(target) = missing {
                return Err(invalid(format!("stage refers to unknown {target}")));
            }
        }
        Ok(())
    }

    /// All bots in registration order.
    pub fn bots(&self) -> &[BoxedBot] {
        &self.bots
    }

    /// Bots that are ready, in registration order.
    pub fn ready_bots(&self) -> impl Iterator<Item = &BoxedBot> {
        self.bots.iter().filter(|b| b.is_ready())
    }

    pub fn bot(&self, name: &str) -> Option<&BoxedBot> {
        self.by_name.get(name).map(|&i| &self.bots[i])
    }

    pub fn len(&self) -> usize {
        self.bots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bots.is_empty()
    }

    /// Resolves a uniquely identified rule and its owning bot.
    pub fn find(&self, kind: RuleKind, id: &str) -> Option<(&BoxedBot, RuleRef<'_>)> {
        let (bot, rule) = match kind {
            RuleKind::Session => self.sessions.get(id).map(|(b, r)| (*b, RuleRef::Session(r)))?,
            RuleKind::Action => self.actions.get(id).map(|(b, r)| (*b, RuleRef::Action(r)))?,
            RuleKind::Form => self.forms.get(id).map(|(b, r)| (*b, RuleRef::Form(r)))?,
            RuleKind::Tool => self.tools.get(id).map(|(b, r)| (*b, RuleRef::Tool(r)))?,
            RuleKind::Pipeline => self
                .pipelines
                .iter()
                .find(|p| p.rule.id == id)
                .map(|p| (p.bot, RuleRef::Pipeline(&p.rule)))?,
            RuleKind::Cron => self
                .crons
                .iter()
                .find(|(_, c)| c.name == id)
                .map(|(b, c)| (*b, RuleRef::Cron(c)))?,
            RuleKind::Command | RuleKind::Condition => return None,
        };
        Some((&self.bots[bot], rule))
    }

    pub fn session(&self, id: &str) -> Option<(&BoxedBot, &SessionRule)> {
        self.sessions.get(id).map(|(b, r)| (&self.bots[*b], r))
    }

    pub fn action(&self, id: &str) -> Option<(&BoxedBot, &ActionRule)> {
        self.actions.get(id).map(|(b, r)| (&self.bots[*b], r))
    }

    pub fn form(&self, id: &str) -> Option<(&BoxedBot, &FormRule)> {
        self.forms.get(id).map(|(b, r)| (&self.bots[*b], r))
    }

    pub fn pipeline(&self, id: &str) -> Option<(&BoxedBot, &PipelineRule)> {
        self.pipelines
            .iter()
            .find(|p| p.rule.id == id)
            .map(|p| (&self.bots[p.bot], &p.rule))
    }

    /// Commands of every bot in registration order.
    pub fn commands(&self) -> impl Iterator<Item = (&BoxedBot, &CompiledCommand)> {
        self.commands.iter().map(|c| (&self.bots[c.bot], c))
    }

    /// Pipelines of every bot in registration order.
    pub fn pipelines(&self) -> impl Iterator<Item = (&BoxedBot, &CompiledPipeline)> {
        self.pipelines.iter().map(|p| (&self.bots[p.bot], p))
    }

    /// Condition handlers for a payload tag, in registration order.
    pub fn conditions(&self, tye: &str) -> impl Iterator<Item = (&BoxedBot, &ConditionRule)> {
        self.conditions
            .get(tye)
            .into_iter()
            .flatten()
            .map(|(b, r)| (&self.bots[*b], r))
    }

    /// Scheduled rules in registration order.
    pub fn crons(&self) -> impl Iterator<Item = (&BoxedBot, &CronRule)> {
        self.crons.iter().map(|(b, r)| (&self.bots[*b], r))
    }

    /// Help entries for commands: `"[bot] /define" -> help`.
    pub fn command_help(&self) -> BTreeMap<String, Value> {
        self.commands()
            .map(|(bot, c)| {
                (
                    format!("[{}] /{}", bot.name(), c.grammar.define()),
                    Value::String(c.rule.help.clone()),
                )
            })
            .collect()
    }

    /// Help entries for pipelines: `"~trigger" -> help`.
    pub fn pipeline_help(&self) -> BTreeMap<String, Value> {
        self.pipelines()
            .map(|(_, p)| {
                (
                    format!("~{}", p.trigger.define()),
                    Value::String(p.rule.help.clone()),
                )
            })
            .collect()
    }

    /// Invokes a tool rule.
    pub fn call_tool(&self, ctx: &Ctx, id: &str, args: &Value) -> BotResult<Value> {
        let (bot, rule) = self
            .tools
            .get(id)
            .map(|(b, r)| (&self.bots[*b], r))
            .ok_or_else(|| BotError::Unsupported(format!("tool '{id}'")))?;
        (rule.handler)(&ctx.for_bot(bot.name()), args)
    }
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.bots.iter().map(|b| b.name()).collect();
        f.debug_struct("RuleRegistry")
            .field("bots", &names)
            .field("commands", &self.commands.len())
            .field("pipelines", &self.pipelines.len())
            .finish_non_exhaustive()
    }
}

/// Shared registry handle.
pub type SharedRules = Arc<RuleRegistry>;
