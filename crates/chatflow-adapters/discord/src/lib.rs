//! # Chatflow Adapter for Discord
//!
//! Converts gateway dispatch frames (`{op: 0, t, d}`) into canonical events
//! and executes canonical requests against the Discord REST API (v10).
//!
//! | Dispatch | Canonical event |
//! |----------|-----------------|
//! | `READY` | `meta.connect` |
//! | `MESSAGE_CREATE` without `guild_id` | `message.direct` |
//! | `MESSAGE_CREATE` in a guild | `message.group` |
//! | `INTERACTION_CREATE` type 2 | `message.command` |
//! | `INTERACTION_CREATE` type 3, `custom_id = "<seq>:<option>"` | `message.direct` with `seq`/`option` |

mod action;
mod adapter;
mod config;
pub mod model;

pub use action::DiscordAction;
pub use adapter::{DiscordAdapter, parse_content, render};
pub use config::DiscordConfig;

/// Platform identifier.
pub const PLATFORM: &str = "discord";
