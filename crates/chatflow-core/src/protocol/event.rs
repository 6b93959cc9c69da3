//! Canonical events.
//!
//! Every native platform notification is converted by its adapter into one
//! [`Event`] with the wire shape `{id, time, type, detail_type, data}`.
//! An event whose `detail_type` is empty is the "drop silently" marker.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::message::Message;

// ============================================================================
// Detail Types
// ============================================================================

/// Detail type constants.
pub mod detail {
    pub const META_CONNECT: &str = "meta.connect";
    pub const META_HEARTBEAT: &str = "meta.heartbeat";
    pub const META_STATUS_UPDATE: &str = "meta.status_update";
    pub const MESSAGE_DIRECT: &str = "message.direct";
    pub const MESSAGE_GROUP: &str = "message.group";
    pub const MESSAGE_CHANNEL: &str = "message.channel";
    pub const MESSAGE_COMMAND: &str = "message.command";
    pub const NOTICE_FRIEND_INCREASE: &str = "notice.friend_increase";
    pub const NOTICE_FRIEND_DECREASE: &str = "notice.friend_decrease";
    pub const NOTICE_GROUP_MEMBER_INCREASE: &str = "notice.group_member_increase";
    pub const NOTICE_GROUP_MEMBER_DECREASE: &str = "notice.group_member_decrease";
    pub const NOTICE_CHANNEL_CREATE: &str = "notice.channel_create";
    pub const NOTICE_CHANNEL_DELETE: &str = "notice.channel_delete";
}

// ============================================================================
// Event Type Classification
// ============================================================================

/// High-level category of an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Lifecycle events (connect, heartbeat).
    #[default]
    Meta,
    /// Message events.
    Message,
    /// Notices (membership changes, channel changes).
    Notice,
    /// Requests that expect an answer.
    Request,
}

impl EventType {
    /// Classifies a detail type by its prefix.
    pub fn of_detail(detail_type: &str) -> Option<Self> {
        detail_type
            .split_once('.')
            .map_or(detail_type, |(prefix, _)| prefix)
            .parse()
            .ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Meta => "meta",
            EventType::Message => "message",
            EventType::Notice => "notice",
            EventType::Request => "request",
        }
    }
}

impl FromStr for EventType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "meta" => Ok(EventType::Meta),
            "message" => Ok(EventType::Message),
            "notice" => Ok(EventType::Notice),
            "request" => Ok(EventType::Request),
            _ => Err(()),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Event Data
// ============================================================================

/// Platform and account an event or action concerns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelfInfo {
    pub platform: String,
    pub user_id: String,
}

impl SelfInfo {
    pub fn new(platform: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            user_id: user_id.into(),
        }
    }
}

/// Kind of conversation a message belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicType {
    /// One-to-one conversation.
    #[default]
    Dm,
    /// Multi-user group conversation.
    Group,
    /// Broadcast channel.
    Channel,
}

impl TopicType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicType::Dm => "dm",
            TopicType::Group => "group",
            TopicType::Channel => "channel",
        }
    }
}

/// Payload of `message.*` events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageEventData {
    #[serde(rename = "self")]
    pub self_info: SelfInfo,
    pub message_id: String,
    pub message: Message,
    pub alt_message: String,
    pub user_id: String,
    pub topic_id: String,
    pub topic_type: TopicType,
    /// Reference to a previously stored message, `0` when absent.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub seq: i64,
    /// Option selected on an action prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option: Option<String>,
    /// Forwarded message reference in `uid:seq` form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarded: Option<String>,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl MessageEventData {
    /// Parses the forwarded reference into `(uid, seq)`.
    ///
    /// Returns `None` unless the reference has exactly two parts and a
    /// positive sequence number.
    pub fn forwarded_ref(&self) -> Option<(String, i64)> {
        let raw = self.forwarded.as_deref()?;
        let (uid, seq) = raw.split_once(':')?;
        if uid.is_empty() || seq.contains(':') {
            return None;
        }
        let seq = seq.parse::<i64>().ok().filter(|s| *s > 0)?;
        Some((uid.to_string(), seq))
    }
}

/// Payload of `message.command` events (slash commands, app commands).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEventData {
    #[serde(rename = "self")]
    pub self_info: SelfInfo,
    pub command: String,
    #[serde(default)]
    pub text: String,
    pub user_id: String,
    pub topic_id: String,
    #[serde(default)]
    pub topic_type: TopicType,
}

/// Payload of `meta.connect` events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectEventData {
    #[serde(rename = "self")]
    pub self_info: SelfInfo,
    #[serde(default)]
    pub version: String,
}

/// Polymorphic event payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventData {
    Message(MessageEventData),
    Command(CommandEventData),
    Connect(ConnectEventData),
    #[default]
    Empty,
}

// ============================================================================
// Event
// ============================================================================

/// A normalized, immutable platform notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    /// Unix timestamp in seconds.
    pub time: i64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub detail_type: String,
    pub data: EventData,
}

impl Event {
    /// Creates an event with a fresh id and the current time.
    pub fn new(detail_type: impl Into<String>, data: EventData) -> Self {
        let detail_type = detail_type.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            time: chrono::Utc::now().timestamp(),
            event_type: EventType::of_detail(&detail_type).unwrap_or_default(),
            detail_type,
            data,
        }
    }

    /// The "drop silently" event.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether this event carries nothing actionable.
    pub fn is_empty(&self) -> bool {
        self.detail_type.is_empty()
    }

    /// Creates a `message.direct` event.
    pub fn direct(data: MessageEventData) -> Self {
        Self::new(detail::MESSAGE_DIRECT, EventData::Message(data))
    }

    /// Creates a `message.group` event.
    pub fn group(data: MessageEventData) -> Self {
        Self::new(detail::MESSAGE_GROUP, EventData::Message(data))
    }

    /// Creates a `message.command` event.
    pub fn command(data: CommandEventData) -> Self {
        Self::new(detail::MESSAGE_COMMAND, EventData::Command(data))
    }

    /// Creates a `meta.connect` event.
    pub fn connect(data: ConnectEventData) -> Self {
        Self::new(detail::META_CONNECT, EventData::Connect(data))
    }

    /// Returns the message payload if this is a message event.
    pub fn message_data(&self) -> Option<&MessageEventData> {
        match &self.data {
            EventData::Message(data) => Some(data),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::protocol::Segment;

    #[test]
    fn test_event_type_of_detail() {
        assert_eq!(
            EventType::of_detail("message.direct"),
            Some(EventType::Message)
        );
        assert_eq!(EventType::of_detail("meta.connect"), Some(EventType::Meta));
        assert_eq!(EventType::of_detail("notice"), Some(EventType::Notice));
        assert_eq!(EventType::of_detail("bogus.kind"), None);
    }

    #[test]
    fn test_empty_event() {
        assert!(Event::empty().is_empty());
        assert!(!Event::connect(ConnectEventData::default()).is_empty());
    }

    #[test]
    fn test_forwarded_ref() {
        let mut data = MessageEventData {
            forwarded: Some("u1:17".into()),
            ..Default::default()
        };
        assert_eq!(data.forwarded_ref(), Some(("u1".into(), 17)));

        for bad in ["u1", "u1:0", ":3", "u1:x", "a:b:c"] {
            data.forwarded = Some(bad.into());
            assert_eq!(data.forwarded_ref(), None, "{bad}");
        }
    }

    #[test]
    fn test_event_wire_shape() {
        let data = MessageEventData {
            self_info: SelfInfo::new("slack", "B1"),
            message_id: "m1".into(),
            message: Message::text("hi"),
            alt_message: "hi".into(),
            user_id: "U1".into(),
            topic_id: "D1".into(),
            topic_type: TopicType::Dm,
            ..Default::default()
        };
        let event = Event::direct(data);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["detail_type"], "message.direct");
        assert_eq!(value["data"]["self"], json!({"platform": "slack", "user_id": "B1"}));
        assert_eq!(value["data"]["topic_type"], "dm");
        assert!(value["data"].get("seq").is_none());

        let back: Event = serde_json::from_value(value).unwrap();
        assert_eq!(back.message_data().unwrap().message.segments()[0], Segment::text("hi"));
    }
}
