//! The bot contract.
//!
//! A bot is a named bundle of rules plus two free-form handlers: `input`
//! for direct messages no rule claimed and `group` for group messages.
//! Rule-driven behavior (commands, sessions, actions, pipelines,
//! conditions) is declared in the bot's [`Ruleset`] and executed by the
//! dispatch engine; the bot itself only supplies the data.
//!
//! ```rust,ignore
//! struct Echo {
//!     rules: Ruleset,
//! }
//!
//! #[async_trait]
//! impl Bot for Echo {
//!     fn name(&self) -> &str {
//!         "echo"
//!     }
//!
//!     fn rules(&self) -> &Ruleset {
//!         &self.rules
//!     }
//!
//!     async fn input(&self, _ctx: &Ctx, content: &str) -> BotResult<Option<Payload>> {
//!         Ok(Some(Payload::text(content)))
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chatflow_core::Payload;

use crate::context::Ctx;
use crate::error::BotResult;
use crate::rule::Ruleset;

#[async_trait]
pub trait Bot: Send + Sync {
    /// Unique bot name.
    fn name(&self) -> &str;

    /// Whether the bot is initialized and enabled. Dispatch skips bots that
    /// are not ready.
    fn is_ready(&self) -> bool {
        true
    }

    /// Rules contributed by this bot.
    fn rules(&self) -> &Ruleset;

    /// Fallback for direct messages.
    async fn input(&self, _ctx: &Ctx, _content: &str) -> BotResult<Option<Payload>> {
        Ok(None)
    }

    /// Handler for group messages.
    async fn group(&self, _ctx: &Ctx, _content: &str) -> BotResult<Option<Payload>> {
        Ok(None)
    }
}

/// Shared bot handle.
pub type BoxedBot = Arc<dyn Bot>;
