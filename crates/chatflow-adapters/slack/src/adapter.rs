//! Slack Socket Mode adapter.
//!
//! | Envelope | Canonical event |
//! |----------|-----------------|
//! | `hello` | `meta.connect` |
//! | `events_api` / `message`, `channel_type = im` | `message.direct` |
//! | `events_api` / `message`, `channel`, `group`, `mpim` | `message.group` |
//! | `slash_commands` | `message.command` |
//! | `interactive` / `block_actions` with `"<seq>:<option>"` | `message.direct` with `seq`/`option` |
//!
//! Messages posted by bots and messages with a `subtype` (edits, joins) are
//! dropped.

use anyhow::{Context, bail};
use chatflow_core::{
    Adapter, CommandEventData, ConnectEventData, Event, Message, MessageEventData, Payload,
    Segment, SelfInfo, TopicType, platform::parse_choice,
};
use serde_json::Value;
use tracing::{debug, trace};

use crate::PLATFORM;
use crate::model::{Envelope, EventCallback, Interaction, SlashCommand};

/// Converts Slack Socket Mode envelopes.
#[derive(Debug, Clone, Default)]
pub struct SlackAdapter;

impl SlackAdapter {
    pub fn new() -> Self {
        Self
    }

    fn convert(&self, native: &Value) -> anyhow::Result<Event> {
        let envelope: Envelope =
            serde_json::from_value(native.clone()).context("invalid socket mode envelope")?;
        match envelope {
            Envelope::Hello { connection_info } => Ok(Event::connect(ConnectEventData {
                self_info: SelfInfo::new(PLATFORM, connection_info.app_id),
                version: "socket-mode".to_string(),
            })),
            Envelope::EventsApi { payload } => Ok(self.message_event(&payload)),
            Envelope::SlashCommands { payload } => Ok(command_event(payload)),
            Envelope::Interactive { payload } => interaction_event(payload),
            Envelope::Disconnect { reason } => {
                debug!(reason = %reason, "Slack requested disconnect");
                Ok(Event::empty())
            }
            Envelope::Unknown => Ok(Event::empty()),
        }
    }

    fn message_event(&self, callback: &EventCallback) -> Event {
        let inner = &callback.event;
        if inner.kind != "message" || inner.is_bot() || inner.subtype.is_some() {
            trace!(kind = %inner.kind, "Dropping non-actionable slack event");
            return Event::empty();
        }
        let topic_type = match inner.channel_type.as_str() {
            "im" => TopicType::Dm,
            "channel" | "group" | "mpim" => TopicType::Group,
            _ => return Event::empty(),
        };
        let message = parse_mrkdwn(&inner.text);
        let data = MessageEventData {
            self_info: SelfInfo::new(PLATFORM, callback.self_user_id()),
            message_id: inner.message_id().to_string(),
            alt_message: plain_text(&message),
            message,
            user_id: inner.user.clone(),
            topic_id: inner.channel.clone(),
            topic_type,
            forwarded: inner.forwarded(),
            ..Default::default()
        };
        match topic_type {
            TopicType::Dm => Event::direct(data),
            _ => Event::group(data),
        }
    }
}

fn command_event(cmd: SlashCommand) -> Event {
    Event::command(CommandEventData {
        self_info: SelfInfo::new(PLATFORM, cmd.api_app_id),
        command: cmd.command.trim_start_matches('/').to_string(),
        text: cmd.text,
        user_id: cmd.user_id,
        topic_type: if cmd.channel_id.starts_with('D') {
            TopicType::Dm
        } else {
            TopicType::Group
        },
        topic_id: cmd.channel_id,
    })
}

fn interaction_event(interaction: Interaction) -> anyhow::Result<Event> {
    if interaction.kind != "block_actions" {
        return Ok(Event::empty());
    }
    let Some(action) = interaction.actions.first() else {
        bail!("block_actions without actions");
    };
    let Some((seq, option)) = parse_choice(&action.value) else {
        return Ok(Event::empty());
    };
    let channel = interaction
        .channel
        .map(|c| c.id)
        .context("block_actions without channel")?;
    Ok(Event::direct(MessageEventData {
        self_info: SelfInfo::new(PLATFORM, interaction.api_app_id),
        message_id: format!("{}:{}", interaction.trigger_id, action.action_id),
        message: Message::text(option.clone()),
        alt_message: option.clone(),
        user_id: interaction.user.id,
        topic_id: channel,
        topic_type: TopicType::Dm,
        seq,
        option: Some(option),
        forwarded: None,
    }))
}

/// Parses Slack mrkdwn entities into segments.
///
/// `<@U1>` and `<@U1|name>` become mentions, `<!channel>`, `<!here>` and
/// `<!everyone>` mention everyone, `<https://..|title>` becomes a url.
pub fn parse_mrkdwn(text: &str) -> Message {
    let mut msg = Message::new();
    let mut rest = text;
    while let Some(start) = rest.find('<') {
        let Some(len) = rest[start..].find('>') else {
            break;
        };
        if start > 0 {
            msg.push(Segment::text(&rest[..start]));
        }
        let entity = &rest[start + 1..start + len];
        let target = entity.split('|').next().unwrap_or_default();
        if let Some(user) = target.strip_prefix('@') {
            msg.push(Segment::mention(user));
        } else if matches!(target, "!channel" | "!here" | "!everyone") {
            msg.push(Segment::mention(""));
        } else if target.starts_with("http") || target.starts_with("mailto:") {
            msg.push(Segment::url(target));
        } else {
            msg.push(Segment::text(&rest[start..=start + len]));
        }
        rest = &rest[start + len + 1..];
    }
    if !rest.is_empty() {
        msg.push(Segment::text(rest));
    }
    msg
}

/// Flattens a parsed message back to plain text for matching.
fn plain_text(message: &Message) -> String {
    message
        .iter()
        .filter_map(Segment::as_text)
        .collect::<String>()
        .trim()
        .to_string()
}

/// Renders a payload with Slack link syntax.
pub fn render(payload: &Payload) -> Message {
    match payload {
        Payload::Link { title, url } if !title.is_empty() => {
            Message::text(format!("<{url}|{title}>"))
        }
        other => other.to_message(),
    }
}

impl Adapter for SlackAdapter {
    fn platform(&self) -> &str {
        PLATFORM
    }

    fn event_convert(&self, native: &Value) -> Event {
        self.convert(native).unwrap_or_else(|e| {
            debug!(error = %e, "Unrecognized slack payload");
            Event::empty()
        })
    }

    fn message_convert(&self, payload: &Payload) -> Message {
        render(payload)
    }
}

#[cfg(test)]
mod tests {
    use chatflow_core::{EventData, detail};
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    fn message_envelope(channel_type: &str, extra: Value) -> Value {
        let mut event = json!({
            "type": "message",
            "user": "U1",
            "text": "hello <@U2> see <https://a.b|site>",
            "channel": "D1",
            "channel_type": channel_type,
            "ts": "1700000000.0001",
            "client_msg_id": "cm-1"
        });
        if let (Some(obj), Some(extra)) = (event.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        json!({
            "type": "events_api",
            "envelope_id": "e1",
            "payload": {
                "api_app_id": "A1",
                "authorizations": [{"user_id": "UBOT"}],
                "event": event
            }
        })
    }

    #[test]
    fn test_hello_is_connect() {
        let event = SlackAdapter::new()
            .event_convert(&json!({"type": "hello", "connection_info": {"app_id": "A1"}}));
        assert_eq!(event.detail_type, detail::META_CONNECT);
    }

    #[test]
    fn test_im_message_is_direct() {
        let event = SlackAdapter::new().event_convert(&message_envelope("im", json!({})));
        assert_eq!(event.detail_type, detail::MESSAGE_DIRECT);
        let data = event.message_data().unwrap();
        assert_eq!(data.self_info, SelfInfo::new("slack", "UBOT"));
        assert_eq!(data.message_id, "cm-1");
        assert_eq!(data.topic_type, TopicType::Dm);
        assert_eq!(data.message.segments()[1], Segment::mention("U2"));
        assert_eq!(data.alt_message, "hello  see https://a.b");
    }

    #[test]
    fn test_channel_message_is_group() {
        let event = SlackAdapter::new().event_convert(&message_envelope("channel", json!({})));
        assert_eq!(event.detail_type, detail::MESSAGE_GROUP);
    }

    #[test]
    fn test_bot_and_subtype_messages_are_dropped() {
        let adapter = SlackAdapter::new();
        assert!(
            adapter
                .event_convert(&message_envelope("im", json!({"bot_id": "B1"})))
                .is_empty()
        );
        assert!(
            adapter
                .event_convert(&message_envelope("im", json!({"subtype": "message_changed"})))
                .is_empty()
        );
        // An empty bot id is not a bot message.
        assert!(
            !adapter
                .event_convert(&message_envelope("im", json!({"bot_id": ""})))
                .is_empty()
        );
    }

    #[test]
    fn test_forwarded_metadata() {
        let event = SlackAdapter::new().event_convert(&message_envelope(
            "im",
            json!({"metadata": {"event_type": "chatflow", "event_payload": {"forwarded": "u1:17"}}}),
        ));
        let data = event.message_data().unwrap();
        assert_eq!(data.forwarded_ref(), Some(("u1".into(), 17)));
    }

    #[test]
    fn test_slash_command() {
        let event = SlackAdapter::new().event_convert(&json!({
            "type": "slash_commands",
            "payload": {
                "command": "/todo",
                "text": "buy milk",
                "user_id": "U1",
                "channel_id": "D9",
                "api_app_id": "A1"
            }
        }));
        assert_eq!(event.detail_type, detail::MESSAGE_COMMAND);
        let EventData::Command(cmd) = event.data else {
            panic!("expected command data");
        };
        assert_eq!(cmd.command, "todo");
        assert_eq!(cmd.text, "buy milk");
        assert_eq!(cmd.topic_type, TopicType::Dm);
    }

    #[test]
    fn test_block_action_choice() {
        let event = SlackAdapter::new().event_convert(&json!({
            "type": "interactive",
            "payload": {
                "type": "block_actions",
                "user": {"id": "U1"},
                "channel": {"id": "D1"},
                "trigger_id": "t1",
                "actions": [{"action_id": "chatflow_choice_0", "value": "42:yes"}]
            }
        }));
        let data = event.message_data().unwrap();
        assert_eq!(data.seq, 42);
        assert_eq!(data.option.as_deref(), Some("yes"));
    }

    #[test]
    fn test_garbage_is_empty() {
        let adapter = SlackAdapter::new();
        assert!(adapter.event_convert(&json!({"type": "weird"})).is_empty());
        assert!(adapter.event_convert(&json!("nope")).is_empty());
        assert_err!(adapter.convert(&json!("nope")));
        let unknown = assert_ok!(adapter.convert(&json!({"type": "weird"})));
        assert!(unknown.is_empty());
    }

    #[test]
    fn test_parse_mrkdwn_broadcast() {
        let msg = parse_mrkdwn("<!here> deploy <#C1|general>");
        assert_eq!(msg.segments()[0].segment_type(), "mention_all");
        assert_eq!(msg.segments()[2], Segment::text("<#C1|general>"));
    }

    #[test]
    fn test_render_link() {
        let msg = render(&Payload::link("docs", "https://docs.rs"));
        assert_eq!(msg.alt_text(), "<https://docs.rs|docs>");
    }
}
