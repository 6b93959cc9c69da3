//! A terminal "platform": stdin lines become direct messages and sends are
//! printed to stdout.

use async_trait::async_trait;
use chatflow::core::{
    Action, ActionError, Adapter, Event, Message, MessageEventData, Request, Response, SelfInfo,
    SendMessageParams, TopicType,
};
use serde_json::{Value, json};

pub const PLATFORM: &str = "console";
pub const BOT_ID: &str = "chatflow";

/// Parses one console line into the native payload understood by
/// [`ConsoleAdapter`].
///
/// | Line | Meaning |
/// |------|---------|
/// | `#42 yes` | choose `yes` on the prompt sent as message 42 |
/// | `fwd alice:17 look` | forward message 17 of `alice` |
/// | anything else | plain text |
pub fn parse_line(user: &str, seq: u64, line: &str) -> Value {
    let mut native = json!({"user": user, "id": format!("console-{seq}"), "text": line});
    if let Some(rest) = line.strip_prefix('#') {
        let (target, option) = rest.split_once(' ').unwrap_or((rest, ""));
        if let Ok(target) = target.parse::<i64>() {
            native["seq"] = json!(target);
            native["option"] = json!(option.trim());
            native["text"] = json!(option.trim());
        }
    } else if let Some(rest) = line.strip_prefix("fwd ") {
        let (reference, text) = rest.split_once(' ').unwrap_or((rest, ""));
        native["forwarded"] = json!(reference);
        native["text"] = json!(text);
    }
    native
}

pub struct ConsoleAdapter;

impl Adapter for ConsoleAdapter {
    fn platform(&self) -> &str {
        PLATFORM
    }

    fn event_convert(&self, native: &Value) -> Event {
        let text = native["text"].as_str().unwrap_or_default();
        let user = native["user"].as_str().unwrap_or_default();
        if user.is_empty() || (text.is_empty() && native.get("option").is_none()) {
            return Event::empty();
        }
        Event::direct(MessageEventData {
            self_info: SelfInfo::new(PLATFORM, BOT_ID),
            message_id: native["id"].as_str().unwrap_or_default().to_string(),
            message: Message::text(text),
            alt_message: text.to_string(),
            user_id: user.to_string(),
            topic_id: format!("dm-{user}"),
            topic_type: TopicType::Dm,
            seq: native["seq"].as_i64().unwrap_or_default(),
            option: native["option"].as_str().map(String::from),
            forwarded: native["forwarded"].as_str().map(String::from),
        })
    }
}

pub struct ConsoleAction;

#[async_trait]
impl Action for ConsoleAction {
    fn platform(&self) -> &str {
        PLATFORM
    }

    async fn send_message(&self, req: &Request) -> Response {
        let params = match SendMessageParams::from_request(req) {
            Ok(params) => params,
            Err(e) => return Response::failed(e),
        };
        if params.message.is_empty() {
            return Response::failed(ActionError::bad_param("empty message"));
        }
        println!("[{}] {BOT_ID}> {}", params.seq, params.message.alt_text());
        for option in &params.options {
            if let Some((seq, name)) = option.value.split_once(':') {
                println!("      #{seq} {name}");
            }
        }
        Response::ok(json!({"message_id": params.seq.to_string()}))
    }
}
