//! # Chatflow Framework
//!
//! Bot rules and the engine that dispatches canonical events to them.
//!
//! This layer provides:
//! - Rule model: commands, sessions, actions, pipelines, conditions, forms,
//!   tools and crons ([`Ruleset`])
//! - Command grammar with typed placeholders ([`Grammar`])
//! - Frozen rule registry with global id uniqueness ([`RuleRegistry`])
//! - Persistence seam for sessions, pipelines and stored messages ([`Store`])
//! - The dispatch engine and its rule precedence ([`Engine`])
//! - Outbound envelopes and platform delivery ([`Outbox`])
//!
//! The framework does not own a transport or a scheduler; the runtime wires
//! platform ingestion, the delivery queue and cron ticks around [`Engine`].

pub mod bot;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod grammar;
pub mod outbox;
pub mod registry;
pub mod rule;
pub mod store;

pub use bot::{Bot, BoxedBot};
pub use context::Ctx;
pub use dispatch::{
    DeliveryMode, DispatchConfig, DispatchMetrics, DispatchSnapshot, Engine, Outcome, Step,
};
pub use error::{
    BotError, BotResult, DispatchError, DispatchResult, GrammarError, GrammarResult, StoreError,
    StoreResult,
};
pub use grammar::{Args, Grammar, Placeholder, tokenize};
pub use outbox::{DirectOutbox, Envelope, Outbox, SharedOutbox, deliver};
pub use registry::{RuleRegistry, RuleRegistryBuilder, SharedRules};
pub use rule::{
    ActionRule, CommandRule, ConditionRule, CronFn, CronRule, CronScope, FormRule, PipelineRule,
    RuleKind, Ruleset, SessionInput, SessionRule, SessionTurn, Stage, ToolRule,
};
pub use store::{
    ActionState, Contact, MemoryStore, PipelineRecord, PipelineState, SessionRecord, SessionState,
    SharedStore, Store, StoredContent, StoredMessage,
};
