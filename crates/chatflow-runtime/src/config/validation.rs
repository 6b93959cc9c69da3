//! Configuration validation.

use std::collections::HashSet;

use super::error::{ConfigError, ConfigResult};
use super::schema::{ChatflowConfig, PlatformConfig, PlatformKind, QueueConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &ChatflowConfig) -> ConfigResult<()> {
    if config.dispatch.cancel_keyword.trim().is_empty() {
        return Err(ConfigError::validation("dispatch.cancel_keyword must not be empty"));
    }
    validate_queue(&config.queue)?;
    validate_platforms(&config.platforms)?;
    if config.cron.enabled && config.cron.tick_ms == 0 {
        return Err(ConfigError::validation("cron.tick_ms must be greater than 0"));
    }
    Ok(())
}

fn validate_queue(queue: &QueueConfig) -> ConfigResult<()> {
    if queue.capacity == 0 {
        return Err(ConfigError::validation("queue.capacity must be greater than 0"));
    }
    if queue.consumers == 0 {
        return Err(ConfigError::validation("queue.consumers must be greater than 0"));
    }
    if queue.poll_interval_ms == 0 {
        return Err(ConfigError::validation("queue.poll_interval_ms must be greater than 0"));
    }
    if queue.retry.max_delay_ms < queue.retry.base_delay_ms {
        return Err(ConfigError::validation(
            "queue.retry.max_delay_ms must be greater than or equal to base_delay_ms",
        ));
    }
    Ok(())
}

fn validate_platforms(platforms: &[PlatformConfig]) -> ConfigResult<()> {
    let mut seen_ids = HashSet::new();
    for platform in platforms {
        if platform.id.trim().is_empty() {
            return Err(ConfigError::missing_field("platforms.id"));
        }
        if !seen_ids.insert(platform.id.as_str()) {
            return Err(ConfigError::DuplicatePlatformId(platform.id.clone()));
        }
        if platform.enabled {
            validate_credentials(platform)?;
        }
    }
    Ok(())
}

fn validate_credentials(platform: &PlatformConfig) -> ConfigResult<()> {
    let field = |name: &str| format!("platforms.{}.{name}", platform.id);
    match platform.kind {
        PlatformKind::Slack | PlatformKind::Discord if platform.token.is_empty() => {
            Err(ConfigError::missing_field(field("token")))
        }
        PlatformKind::Discord if platform.app_id.is_empty() => {
            Err(ConfigError::missing_field(field("app_id")))
        }
        PlatformKind::Tailchat if platform.app_id.is_empty() => {
            Err(ConfigError::missing_field(field("app_id")))
        }
        PlatformKind::Tailchat if platform.app_secret.is_empty() => {
            Err(ConfigError::missing_field(field("app_secret")))
        }
        PlatformKind::Tailchat if platform.api_base.is_none() => {
            Err(ConfigError::missing_field(field("api_base")))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slack(id: &str) -> PlatformConfig {
        PlatformConfig::new(id, PlatformKind::Slack).with_token("xoxb-test")
    }

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&ChatflowConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_duplicate_platform_id() {
        let config = ChatflowConfig {
            platforms: vec![slack("main"), slack("main")],
            ..Default::default()
        };
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::DuplicatePlatformId(id)) if id == "main"
        ));
    }

    #[test]
    fn test_validate_credentials() {
        let mut config = ChatflowConfig {
            platforms: vec![PlatformConfig::new("chat", PlatformKind::Tailchat).with_token("t")],
            ..Default::default()
        };
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { field }) if field == "platforms.chat.app_id"
        ));

        config.platforms[0] = config.platforms[0].clone().with_app("app", "secret");
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { field }) if field == "platforms.chat.api_base"
        ));

        config.platforms[0].api_base = Some("https://chat.example.com".into());
        assert!(validate_config(&config).is_ok());

        // Disabled platforms are not checked.
        config.platforms.push(PlatformConfig {
            enabled: false,
            ..PlatformConfig::new("dc", PlatformKind::Discord)
        });
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_queue_and_dispatch() {
        let mut config = ChatflowConfig::default();
        config.queue.capacity = 0;
        assert!(validate_config(&config).is_err());

        let mut config = ChatflowConfig::default();
        config.queue.consumers = 0;
        assert!(validate_config(&config).is_err());

        let mut config = ChatflowConfig::default();
        config.dispatch.cancel_keyword = " ".into();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }
}
