//! The dispatch engine.
//!
//! One [`Engine::handle`] call routes one canonical event through the rule
//! precedence and answers with at most one payload per step.
//!
//! # Precedence
//!
//! | Step | Direct | Group | Claims the event when |
//! |------|:------:|:-----:|-----------------------|
//! | Session | 1 | | a session is `Start` for `(uid, topic)` |
//! | Help | 2 | | text is a help keyword or `~help` |
//! | Action | 3 | | `seq > 0`, an option, and the handler returns a payload |
//! | Command | 4 | | text starts with `/` |
//! | Pipeline | 5 | | text starts with `~` |
//! | Condition | 6 | 1 | `forwarded` resolves and the handler returns a payload |
//! | Input / Group | 7 | 2 | always |
//!
//! Direct turns for one `(uid, topic)` are serialized with per-key locks;
//! pipeline writes are versioned so stale continuations are rejected.
//!
//! ```rust,ignore
//! let engine = Engine::new(rules, Arc::new(MemoryStore::new()), outbox)
//!     .with_config(DispatchConfig::default());
//!
//! let outcome = engine.handle(&event).await?;
//! ```

mod config;
mod engine;
mod lifecycle;
mod metrics;

#[cfg(test)]
mod testing;

pub use config::{DeliveryMode, DispatchConfig};
pub use engine::{Engine, Outcome, Step};
pub use metrics::{DispatchMetrics, DispatchSnapshot};
