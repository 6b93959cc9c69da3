//! Discord adapter configuration.

use serde::{Deserialize, Serialize};

/// Connection settings for the Discord REST API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    /// Bot token, sent as `Authorization: Bot <token>`.
    pub token: String,
    /// Application id, used for command registration and as the bot's own id.
    pub app_id: String,
    pub api_base: String,
}

impl DiscordConfig {
    pub fn new(token: impl Into<String>, app_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            app_id: app_id.into(),
            ..Default::default()
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            app_id: String::new(),
            api_base: "https://discord.com/api/v10".to_string(),
        }
    }
}
