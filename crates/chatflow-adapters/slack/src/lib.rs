//! # Chatflow Adapter for Slack
//!
//! Translates Slack Socket Mode envelopes into canonical events and executes
//! canonical requests through the Slack Web API.
//!
//! ```rust,ignore
//! use chatflow_adapter_slack::{SlackAdapter, SlackAction, SlackConfig};
//!
//! let http = Arc::new(ReqwestCaller::new(Duration::from_secs(30))?);
//! let caller = Caller::new(
//!     Arc::new(SlackAdapter::new()),
//!     Arc::new(SlackAction::new(SlackConfig::new(token), http)),
//! );
//! ```

mod action;
mod adapter;
mod config;
pub mod model;

pub use action::SlackAction;
pub use adapter::{SlackAdapter, parse_mrkdwn, render};
pub use config::SlackConfig;

/// Platform identifier.
pub const PLATFORM: &str = "slack";
