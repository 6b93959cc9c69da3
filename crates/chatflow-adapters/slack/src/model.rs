//! Slack Socket Mode envelope types.
//!
//! Only the fields the adapter reads are modelled; everything else in the
//! native payload is ignored.

use serde::Deserialize;
use serde_json::Value;

/// A Socket Mode envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    Hello {
        #[serde(default)]
        connection_info: ConnectionInfo,
    },
    EventsApi {
        payload: EventCallback,
    },
    SlashCommands {
        payload: SlashCommand,
    },
    Interactive {
        payload: Interaction,
    },
    Disconnect {
        #[serde(default)]
        reason: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionInfo {
    #[serde(default)]
    pub app_id: String,
}

/// `events_api` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct EventCallback {
    #[serde(default)]
    pub api_app_id: String,
    #[serde(default)]
    pub authorizations: Vec<Authorization>,
    pub event: InnerEvent,
}

impl EventCallback {
    /// Bot user the event was delivered to.
    pub fn self_user_id(&self) -> &str {
        self.authorizations
            .first()
            .map(|a| a.user_id.as_str())
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.api_app_id)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Authorization {
    #[serde(default)]
    pub user_id: String,
}

/// The inner `event` object of an `events_api` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InnerEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub channel_type: String,
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub client_msg_id: String,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl InnerEvent {
    /// Whether the event was produced by a bot (including this one).
    pub fn is_bot(&self) -> bool {
        self.bot_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    /// Platform message id; falls back to the timestamp.
    pub fn message_id(&self) -> &str {
        if self.client_msg_id.is_empty() {
            &self.ts
        } else {
            &self.client_msg_id
        }
    }

    /// Forwarded reference carried in message metadata.
    pub fn forwarded(&self) -> Option<String> {
        self.metadata
            .as_ref()?
            .event_payload
            .get("forwarded")?
            .as_str()
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub event_payload: Value,
}

/// `slash_commands` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct SlashCommand {
    pub command: String,
    #[serde(default)]
    pub text: String,
    pub user_id: String,
    pub channel_id: String,
    #[serde(default)]
    pub channel_name: String,
    #[serde(default)]
    pub api_app_id: String,
}

/// `interactive` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct Interaction {
    #[serde(rename = "type")]
    pub kind: String,
    pub user: IdRef,
    #[serde(default)]
    pub channel: Option<IdRef>,
    #[serde(default)]
    pub actions: Vec<BlockAction>,
    #[serde(default)]
    pub api_app_id: String,
    #[serde(default)]
    pub trigger_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockAction {
    #[serde(default)]
    pub action_id: String,
    #[serde(default)]
    pub value: String,
}
