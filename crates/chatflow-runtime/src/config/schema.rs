//! Configuration schema definitions.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chatflow_framework::DispatchConfig;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatflowConfig {
    pub logging: LoggingConfig,
    pub dispatch: DispatchConfig,
    pub queue: QueueConfig,
    /// Platform connections, one entry per platform kind.
    pub platforms: Vec<PlatformConfig>,
    pub cron: CronConfig,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line format of log output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature.
    Json,
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanEventMode {
    #[default]
    None,
    New,
    Close,
    Active,
    Full,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Log file, used when `output = "file"`.
    pub file_path: Option<PathBuf>,
    pub span_events: SpanEventMode,
    pub show_target: bool,
    pub show_thread_ids: bool,
    pub show_file_line: bool,
    /// Extra `EnvFilter` directives such as `chatflow_framework=debug`.
    pub filter_directives: Vec<String>,
    /// Per-module levels, merged into the directives.
    pub filters: BTreeMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            file_path: None,
            span_events: SpanEventMode::None,
            show_target: true,
            show_thread_ids: false,
            show_file_line: false,
            filter_directives: Vec::new(),
            filters: BTreeMap::new(),
        }
    }
}

// =============================================================================
// Delivery Queue
// =============================================================================

/// Retry policy of queue consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,
    /// Failed attempts tolerated before a delivery is dead-lettered.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Whether a delivery that failed `attempts` times may be retried.
    pub fn should_retry(&self, attempts: u32) -> bool {
        self.enabled && attempts <= self.max_retries
    }

    /// Backoff before the next try after `attempts` failures.
    ///
    /// Doubles from `base_delay_ms`, capped at `max_delay_ms`, with up to
    /// 20% random jitter either way.
    pub fn delay(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(31);
        let base = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms) as f64;
        let jitter_range = base * 0.2;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        Duration::from_millis((base + jitter).max(0.0) as u64)
    }
}

/// Delivery queue settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum deliveries held, pending and in flight.
    pub capacity: usize,
    pub consumers: usize,
    /// How long an idle consumer waits before polling for delayed retries.
    pub poll_interval_ms: u64,
    pub retry: RetryConfig,
    /// File that holds undelivered envelopes across restarts.
    pub spool_path: Option<PathBuf>,
    /// Dead letters kept for inspection; the oldest are dropped beyond this.
    pub dead_letter_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            consumers: 4,
            poll_interval_ms: 100,
            retry: RetryConfig::default(),
            spool_path: None,
            dead_letter_capacity: 1000,
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// =============================================================================
// Platforms
// =============================================================================

/// Supported chat platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Slack,
    Discord,
    Tailchat,
}

impl PlatformKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Slack => "slack",
            Self::Discord => "discord",
            Self::Tailchat => "tailchat",
        }
    }
}

impl std::fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One platform connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub id: String,
    pub kind: PlatformKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Bot token (Slack, Discord) or Tailchat app token.
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub app_secret: String,
    /// Overrides the platform's API base URL.
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl PlatformConfig {
    pub fn new(id: impl Into<String>, kind: PlatformKind) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: true,
            token: String::new(),
            app_id: String::new(),
            app_secret: String::new(),
            api_base: None,
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    pub fn with_app(mut self, app_id: impl Into<String>, app_secret: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self.app_secret = app_secret.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_enabled() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

// =============================================================================
// Cron
// =============================================================================

/// Cron scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CronConfig {
    pub enabled: bool,
    pub tick_ms: u64,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_ms: 1000,
        }
    }
}

impl CronConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_is_capped() {
        let retry = RetryConfig {
            base_delay_ms: 1000,
            max_delay_ms: 4000,
            ..Default::default()
        };
        let first = retry.delay(1).as_millis();
        assert!((800..=1200).contains(&first), "{first}");
        let late = retry.delay(30).as_millis();
        assert!((3200..=4800).contains(&late), "{late}");
    }

    #[test]
    fn test_should_retry() {
        let retry = RetryConfig::default();
        assert!(retry.should_retry(1));
        assert!(retry.should_retry(3));
        assert!(!retry.should_retry(4));

        let disabled = RetryConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(!disabled.should_retry(1));
    }

    #[test]
    fn test_platform_config_defaults() {
        let cfg: PlatformConfig =
            serde_json::from_str(r#"{"id": "main", "kind": "slack", "token": "xoxb"}"#).unwrap();
        assert!(cfg.enabled);
        assert_eq!(cfg.timeout_secs, 30);
        assert_eq!(cfg.kind.as_str(), "slack");
    }
}
