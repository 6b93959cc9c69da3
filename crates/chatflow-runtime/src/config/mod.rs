//! Configuration for the chatflow runtime.
//!
//! Settings are layered with figment: built-in defaults, then an optional
//! TOML or YAML file, then `CHATFLOW_*` environment variables. The loaded
//! [`ChatflowConfig`] is checked by [`validate_config`] before any component
//! is built from it.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    ChatflowConfig, CronConfig, LogFormat, LogLevel, LogOutput, LoggingConfig, PlatformConfig,
    PlatformKind, QueueConfig, RetryConfig, SpanEventMode,
};
pub use validation::validate_config;
