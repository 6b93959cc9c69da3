//! Slack adapter configuration.

use serde::{Deserialize, Serialize};

/// Connection settings for the Slack Web API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    /// Bot token (`xoxb-...`).
    pub token: String,
    /// Web API base URL.
    pub api_base: String,
}

impl SlackConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Default::default()
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_base: "https://slack.com/api".to_string(),
        }
    }
}
