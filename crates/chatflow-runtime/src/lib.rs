//! Chatflow Runtime - process wiring for the chatflow engine.
//!
//! This crate provides:
//! - Configuration loading and validation (`ChatflowConfig`, `ConfigLoader`)
//! - Logging setup (`LoggingBuilder`)
//! - The bounded at-least-once delivery queue (`DeliveryQueue`)
//! - The cron scheduler (`CronScheduler`)
//! - Runtime orchestration (`ChatflowRuntime`)
//!
//! # Configuration
//!
//! Settings come from `chatflow.toml` (or `chatflow.yaml` with the
//! `yaml-config` feature) and `CHATFLOW_*` environment variables, with
//! `__` separating nested keys:
//!
//! ```toml
//! [dispatch]
//! delivery = "queued"
//!
//! [queue]
//! capacity = 1000
//! spool_path = "data/spool.json"
//!
//! [[platforms]]
//! id = "workspace"
//! kind = "slack"
//! token = "xoxb-..."
//! ```
//!
//! ```ignore
//! use chatflow_runtime::ChatflowRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = ChatflowRuntime::builder()
//!         .bot(Arc::new(MyBot::new()))
//!         .build()?;
//!
//!     // Run until Ctrl+C
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cron;
pub mod error;
pub mod logging;
pub mod platforms;
pub mod queue;
pub mod runtime;

// Re-exports
pub use config::{ChatflowConfig, ConfigError, ConfigLoader, ConfigResult, PlatformConfig, PlatformKind};
pub use cron::CronScheduler;
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, LoggingGuard, SpanEvents};
pub use queue::{Delivery, DeliveryQueue, DeliverySnapshot, QueueError, QueueResult, Reservation};
pub use runtime::{ChatflowRuntime, RuntimeBuilder};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for bot code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
