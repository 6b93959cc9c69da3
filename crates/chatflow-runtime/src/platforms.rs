//! Platform callers built from configuration.
//!
//! | Kind | Adapter | Action credentials |
//! |------|---------|--------------------|
//! | `slack` | [`SlackAdapter`] | bot token |
//! | `discord` | [`DiscordAdapter`] | bot token, application id |
//! | `tailchat` | [`TailchatAdapter`] | app id, app secret, server URL |
//!
//! Callers are registered under the adapter's platform kind, so at most one
//! enabled entry per kind may be configured.

use std::sync::Arc;

use chatflow_adapter_discord::{DiscordAction, DiscordAdapter, DiscordConfig};
use chatflow_adapter_slack::{SlackAction, SlackAdapter, SlackConfig};
use chatflow_adapter_tailchat::{TailchatAction, TailchatAdapter, TailchatConfig};
use chatflow_core::{Caller, PlatformRegistryBuilder};
use chatflow_transport::{ReqwestCaller, SharedHttpCaller};
use tracing::debug;

use crate::config::{PlatformConfig, PlatformKind};
use crate::error::RuntimeResult;

/// Builds the caller for one configured platform on top of `http`.
pub fn caller_for(config: &PlatformConfig, http: SharedHttpCaller) -> Caller {
    match config.kind {
        PlatformKind::Slack => {
            let mut slack = SlackConfig::new(&config.token);
            if let Some(base) = &config.api_base {
                slack = slack.with_api_base(base);
            }
            Caller::new(Arc::new(SlackAdapter::new()), Arc::new(SlackAction::new(slack, http)))
        }
        PlatformKind::Discord => {
            let mut discord = DiscordConfig::new(&config.token, &config.app_id);
            if let Some(base) = &config.api_base {
                discord = discord.with_api_base(base);
            }
            Caller::new(
                Arc::new(DiscordAdapter::new(&config.app_id)),
                Arc::new(DiscordAction::new(discord, http)),
            )
        }
        PlatformKind::Tailchat => {
            let tailchat = TailchatConfig::new(
                config.api_base.clone().unwrap_or_default(),
                &config.app_id,
                &config.app_secret,
            );
            Caller::new(
                Arc::new(TailchatAdapter::new()),
                Arc::new(TailchatAction::new(tailchat, http)),
            )
        }
    }
}

/// Registers every enabled platform, each with its own HTTP client.
pub fn register_configured(
    builder: &mut PlatformRegistryBuilder,
    configs: &[PlatformConfig],
) -> RuntimeResult<usize> {
    let mut count = 0;
    for config in configs.iter().filter(|c| c.enabled) {
        let http: SharedHttpCaller = Arc::new(ReqwestCaller::new(config.timeout())?);
        builder.register(caller_for(config, http))?;
        debug!(id = %config.id, kind = %config.kind, "Configured platform");
        count += 1;
    }
    Ok(count)
}
