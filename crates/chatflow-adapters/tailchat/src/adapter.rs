//! Tailchat inbox adapter.

use anyhow::Context;
use chatflow_core::{Adapter, Event, Message, MessageEventData, SelfInfo, TopicType};
use serde_json::Value;
use tracing::debug;

use crate::PLATFORM;
use crate::model::Inbox;

/// Converts Tailchat inbox notifications.
#[derive(Debug, Clone, Default)]
pub struct TailchatAdapter;

impl TailchatAdapter {
    pub fn new() -> Self {
        Self
    }

    fn convert(&self, native: &Value) -> anyhow::Result<Event> {
        let inbox: Inbox =
            serde_json::from_value(native.clone()).context("invalid inbox notification")?;
        let p = inbox.payload;
        // The bot's own messages come back through the inbox too.
        if inbox.user_id == p.message_author || p.converse_id.is_empty() {
            return Ok(Event::empty());
        }
        let direct = p.group_id.is_empty();
        let data = MessageEventData {
            self_info: SelfInfo::new(PLATFORM, inbox.user_id),
            message_id: p.message_id,
            message: Message::text(p.message_plain_content.clone()),
            alt_message: p.message_plain_content,
            user_id: p.message_author,
            topic_id: p.converse_id,
            topic_type: if direct { TopicType::Dm } else { TopicType::Group },
            forwarded: p.forwarded.filter(|f| !f.is_empty()),
            ..Default::default()
        };
        Ok(if direct {
            Event::direct(data)
        } else {
            Event::group(data)
        })
    }
}

impl Adapter for TailchatAdapter {
    fn platform(&self) -> &str {
        PLATFORM
    }

    fn event_convert(&self, native: &Value) -> Event {
        self.convert(native).unwrap_or_else(|e| {
            debug!(error = %e, "Unrecognized tailchat payload");
            Event::empty()
        })
    }
}

#[cfg(test)]
mod tests {
    use chatflow_core::detail;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    fn inbox(group_id: &str, author: &str) -> Value {
        json!({
            "_id": "i1",
            "userId": "BOT",
            "type": "message",
            "payload": {
                "groupId": group_id,
                "converseId": "CV1",
                "messageId": "m1",
                "messageAuthor": author,
                "messageSnippet": "hello",
                "messagePlainContent": "hello"
            },
            "readed": false
        })
    }

    #[test]
    fn test_direct_message() {
        let event = TailchatAdapter::new().event_convert(&inbox("", "U1"));
        assert_eq!(event.detail_type, detail::MESSAGE_DIRECT);
        let data = event.message_data().unwrap();
        assert_eq!(data.self_info, SelfInfo::new("tailchat", "BOT"));
        assert_eq!(data.topic_id, "CV1");
        assert_eq!(data.user_id, "U1");
        assert_eq!(data.alt_message, "hello");
    }

    #[test]
    fn test_group_message() {
        let event = TailchatAdapter::new().event_convert(&inbox("G1", "U1"));
        assert_eq!(event.detail_type, detail::MESSAGE_GROUP);
        assert_eq!(event.message_data().unwrap().topic_type, TopicType::Group);
    }

    #[test]
    fn test_own_message_is_dropped() {
        assert!(TailchatAdapter::new().event_convert(&inbox("", "BOT")).is_empty());
        assert!(TailchatAdapter::new().event_convert(&json!({"x": 1})).is_empty());
    }

    #[test]
    fn test_malformed_inbox_is_an_error() {
        let adapter = TailchatAdapter::new();
        assert_err!(adapter.convert(&json!({"x": 1})));
        assert_err!(adapter.convert(&json!({"_id": "N1", "userId": "BOT"})));
        let own = assert_ok!(adapter.convert(&inbox("", "BOT")));
        assert!(own.is_empty());
    }

    #[test]
    fn test_forwarded_reference() {
        let mut native = inbox("", "U1");
        native["payload"]["forwarded"] = json!("u1:17");
        let event = TailchatAdapter::new().event_convert(&native);
        assert_eq!(
            event.message_data().unwrap().forwarded_ref(),
            Some(("u1".to_string(), 17))
        );
    }
}
