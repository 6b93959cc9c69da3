//! Discord gateway adapter.

use anyhow::{Context, bail};
use chatflow_core::{
    Adapter, CommandEventData, ConnectEventData, Event, Message, MessageEventData, Payload,
    Segment, SelfInfo, TopicType, platform::parse_choice, protocol::value_text,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use crate::PLATFORM;
use crate::model::{
    GatewayFrame, Interaction, MessageCreate, OP_DISPATCH, Ready, interaction_type,
};

/// Converts Discord gateway dispatch frames.
#[derive(Debug, Clone, Default)]
pub struct DiscordAdapter {
    app_id: String,
}

impl DiscordAdapter {
    /// Creates an adapter that reports `app_id` as the bot's own id.
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
        }
    }

    fn self_info(&self) -> SelfInfo {
        SelfInfo::new(PLATFORM, self.app_id.clone())
    }

    fn convert(&self, native: &Value) -> anyhow::Result<Event> {
        let frame: GatewayFrame =
            serde_json::from_value(native.clone()).context("invalid gateway frame")?;
        if frame.op != OP_DISPATCH {
            trace!(op = frame.op, "Ignoring non-dispatch frame");
            return Ok(Event::empty());
        }
        match frame.t.as_deref() {
            Some("READY") => {
                let ready: Ready = decode(frame.d)?;
                Ok(Event::connect(ConnectEventData {
                    self_info: SelfInfo::new(PLATFORM, ready.user.id),
                    version: format!("gateway-v{}", ready.v),
                }))
            }
            Some("MESSAGE_CREATE") => Ok(self.message_event(decode(frame.d)?)),
            Some("INTERACTION_CREATE") => self.interaction_event(decode(frame.d)?),
            _ => Ok(Event::empty()),
        }
    }

    fn message_event(&self, msg: MessageCreate) -> Event {
        if msg.author.bot {
            return Event::empty();
        }
        let direct = msg.is_direct();
        let message = parse_content(&msg.content);
        let data = MessageEventData {
            self_info: self.self_info(),
            message_id: msg.id,
            message,
            alt_message: msg.content,
            user_id: msg.author.id,
            topic_id: msg.channel_id,
            topic_type: if direct { TopicType::Dm } else { TopicType::Group },
            ..Default::default()
        };
        if direct {
            Event::direct(data)
        } else {
            Event::group(data)
        }
    }

    fn interaction_event(&self, interaction: Interaction) -> anyhow::Result<Event> {
        let user_id = interaction
            .user_id()
            .context("interaction without user")?
            .to_string();
        let topic_type = if interaction.is_direct() {
            TopicType::Dm
        } else {
            TopicType::Group
        };
        match interaction.kind {
            interaction_type::APPLICATION_COMMAND => {
                if interaction.data.name.is_empty() {
                    bail!("application command without name");
                }
                let text = interaction
                    .data
                    .options
                    .iter()
                    .map(|o| value_text(&o.value))
                    .collect::<Vec<_>>()
                    .join(" ");
                Ok(Event::command(CommandEventData {
                    self_info: self.self_info(),
                    command: interaction.data.name,
                    text,
                    user_id,
                    topic_id: interaction.channel_id,
                    topic_type,
                }))
            }
            interaction_type::MESSAGE_COMPONENT => {
                let Some((seq, option)) = parse_choice(&interaction.data.custom_id) else {
                    return Ok(Event::empty());
                };
                Ok(Event::direct(MessageEventData {
                    self_info: self.self_info(),
                    message_id: interaction.id,
                    message: Message::text(option.clone()),
                    alt_message: option.clone(),
                    user_id,
                    topic_id: interaction.channel_id,
                    topic_type: TopicType::Dm,
                    seq,
                    option: Some(option),
                    forwarded: None,
                }))
            }
            _ => Ok(Event::empty()),
        }
    }
}

fn decode<T: DeserializeOwned>(d: Value) -> anyhow::Result<T> {
    serde_json::from_value(d).context("invalid dispatch data")
}

/// Splits Discord message content into segments.
///
/// `<@id>` and `<@!id>` become mentions; `@everyone` and `@here` mention
/// everyone.
pub fn parse_content(content: &str) -> Message {
    let mut msg = Message::new();
    let mut buf = String::new();
    let mut rest = content;
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix("<@") {
            if let Some(end) = tail.find('>') {
                let id = tail[..end].trim_start_matches('!');
                if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) {
                    flush(&mut msg, &mut buf);
                    msg.push(Segment::mention(id));
                    rest = &tail[end + 1..];
                    continue;
                }
            }
        }
        if let Some(tail) = rest
            .strip_prefix("@everyone")
            .or_else(|| rest.strip_prefix("@here"))
        {
            flush(&mut msg, &mut buf);
            msg.push(Segment::mention(""));
            rest = tail;
            continue;
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            buf.push(c);
        }
        rest = chars.as_str();
    }
    flush(&mut msg, &mut buf);
    msg
}

fn flush(msg: &mut Message, buf: &mut String) {
    if !buf.is_empty() {
        msg.push(Segment::text(std::mem::take(buf)));
    }
}

/// Renders a payload with Discord markdown links.
pub fn render(payload: &Payload) -> Message {
    match payload {
        Payload::Link { title, url } if !title.is_empty() => {
            Message::text(format!("[{title}]({url})"))
        }
        other => other.to_message(),
    }
}

impl Adapter for DiscordAdapter {
    fn platform(&self) -> &str {
        PLATFORM
    }

    fn event_convert(&self, native: &Value) -> Event {
        self.convert(native).unwrap_or_else(|e| {
            debug!(error = %e, "Unrecognized discord payload");
            Event::empty()
        })
    }

    fn message_convert(&self, payload: &Payload) -> Message {
        render(payload)
    }
}
