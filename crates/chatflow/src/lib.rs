//! # Chatflow
//!
//! A multi-platform chatbot engine.
//!
//! ## Overview
//!
//! Platform adapters turn native payloads into canonical events. The
//! dispatch engine routes each event through the rules bots declare and
//! sends replies back through the platform's action, inline or through a
//! bounded delivery queue.
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌──────────────────────────────┐   ┌────────┐   ┌──────────┐
//! │ Platform │──▶│ Adapter │──▶│ Engine                       │──▶│ Outbox │──▶│ Action   │
//! │ payload  │   │         │   │ session ▸ help ▸ action ▸    │   │ direct │   │ (HTTP)   │
//! └──────────┘   └─────────┘   │ command ▸ pipeline ▸ cond ▸  │   │ queue  │   └──────────┘
//!                              │ input / group                │   └────────┘
//!                              └──────────────────────────────┘
//! ```
//!
//! - **Adapters / Actions**: Slack, Discord and Tailchat
//! - **Rules**: commands, sessions, actions, pipelines, conditions, forms,
//!   tools and cron rules, declared per bot in a [`Ruleset`](framework::Ruleset)
//! - **Runtime**: configuration, logging, delivery queue and cron scheduler
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chatflow::prelude::*;
//!
//! struct Hello {
//!     rules: Ruleset,
//! }
//!
//! #[async_trait]
//! impl Bot for Hello {
//!     fn name(&self) -> &str {
//!         "hello"
//!     }
//!
//!     fn rules(&self) -> &Ruleset {
//!         &self.rules
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let rules = Ruleset::new().command(CommandRule::new("hi [string]", "say hi", |_, args| {
//!         Ok(Some(Payload::text(format!("hi {}", args.str(0).unwrap_or("there")))))
//!     }));
//!     let runtime = ChatflowRuntime::builder()
//!         .bot(Arc::new(Hello { rules }))
//!         .build()?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` (default): TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use chatflow_core as core;
pub use chatflow_framework as framework;
pub use chatflow_runtime as runtime;
pub use chatflow_transport as transport;

/// Platform adapters.
pub mod adapters {
    pub use chatflow_adapter_discord as discord;
    pub use chatflow_adapter_slack as slack;
    pub use chatflow_adapter_tailchat as tailchat;
}

/// Commonly used types for writing bots.
///
/// ```rust,ignore
/// use chatflow::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    // Runtime - main entry point
    pub use chatflow_runtime::{ChatflowConfig, ChatflowRuntime, RuntimeBuilder};

    // Bots and rules
    pub use chatflow_framework::{
        ActionRule, Args, Bot, BotError, BotResult, BoxedBot, CommandRule, ConditionRule,
        CronRule, CronScope, Ctx, FormRule, PipelineRule, Ruleset, SessionInput, SessionRule,
        SessionTurn, Stage, ToolRule,
    };

    // Canonical protocol
    pub use chatflow_core::{Event, Message, Payload, Segment, SelfInfo, TopicType};

    pub use async_trait::async_trait;
    pub use chatflow_runtime::prelude::*;
}
