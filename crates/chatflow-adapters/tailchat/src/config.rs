//! Tailchat adapter configuration.

use serde::{Deserialize, Serialize};

/// Open-platform bot credentials.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TailchatConfig {
    pub app_id: String,
    pub app_secret: String,
    /// Server base URL, e.g. `https://tailchat.example.com`.
    pub api_base: String,
}

impl TailchatConfig {
    pub fn new(
        api_base: impl Into<String>,
        app_id: impl Into<String>,
        app_secret: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            app_secret: app_secret.into(),
            api_base: api_base.into(),
        }
    }
}
