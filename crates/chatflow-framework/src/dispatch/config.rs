use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How outbound payloads leave the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Sent inline by the dispatching task.
    #[default]
    Direct,
    /// Handed to the background delivery queue.
    Queued,
}

/// Dispatch engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Text that cancels an active session.
    pub cancel_keyword: String,
    /// Texts answered with the command help listing.
    pub help_keywords: Vec<String>,
    pub delivery: DeliveryMode,
    /// Bot receiving unclaimed direct and group messages; defaults to the
    /// first ready bot.
    pub input_bot: Option<String>,
    pub session_ttl_secs: Option<u64>,
    pub pipeline_ttl_secs: Option<u64>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            cancel_keyword: "cancel".to_string(),
            help_keywords: vec!["help".to_string(), "h".to_string()],
            delivery: DeliveryMode::Direct,
            input_bot: None,
            session_ttl_secs: None,
            pipeline_ttl_secs: None,
        }
    }
}

impl DispatchConfig {
    pub fn session_ttl(&self) -> Option<Duration> {
        self.session_ttl_secs.map(Duration::from_secs)
    }

    pub fn pipeline_ttl(&self) -> Option<Duration> {
        self.pipeline_ttl_secs.map(Duration::from_secs)
    }

    pub fn is_help(&self, text: &str) -> bool {
        self.help_keywords.iter().any(|k| k.eq_ignore_ascii_case(text))
    }

    pub fn is_cancel(&self, text: &str) -> bool {
        !self.cancel_keyword.is_empty() && self.cancel_keyword.eq_ignore_ascii_case(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DispatchConfig::default();
        assert!(config.is_help("HELP"));
        assert!(config.is_cancel("cancel"));
        assert!(!config.is_cancel("cancel it"));
        assert_eq!(config.session_ttl(), None);
    }

    #[test]
    fn test_partial_deserialize() {
        let config: DispatchConfig =
            serde_json::from_value(serde_json::json!({"delivery": "queued", "session_ttl_secs": 60}))
                .unwrap();
        assert_eq!(config.delivery, DeliveryMode::Queued);
        assert_eq!(config.cancel_keyword, "cancel");
        assert_eq!(config.session_ttl(), Some(Duration::from_secs(60)));
    }
}
