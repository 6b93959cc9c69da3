//! # Chatflow Adapter for Tailchat
//!
//! Tailchat delivers inbox notifications to a bot callback URL and accepts
//! messages through its open-platform HTTP API.
//!
//! - Inbound: [`TailchatAdapter`] maps inbox payloads to `message.direct`
//!   (no `groupId`) or `message.group`.
//! - Outbound: [`TailchatAction`] logs in lazily, caches the JWT and posts
//!   messages with the `X-Token` header.

mod action;
mod adapter;
mod config;
pub mod model;

pub use action::TailchatAction;
pub use adapter::TailchatAdapter;
pub use config::TailchatConfig;

/// Platform identifier.
pub const PLATFORM: &str = "tailchat";
