//! Platform adapter contract.
//!
//! An adapter is a pure translator between a platform's native JSON and the
//! canonical model:
//!
//! - [`Adapter::event_convert`] turns a native notification into an
//!   [`Event`]. Anything not actionable (the bot's own echoes, unknown
//!   sub-types) becomes [`Event::empty`], which dispatch drops silently.
//! - [`Adapter::message_convert`] renders an outbound [`Payload`].
//!
//! Adapters never block and never call back into the platform.

use std::sync::Arc;

use serde_json::Value;

use crate::protocol::{Event, Message, Payload};

/// Per-platform inbound/outbound translator.
pub trait Adapter: Send + Sync {
    /// Platform identifier, e.g. `"slack"`.
    fn platform(&self) -> &str;

    /// Converts one native notification into a canonical event.
    fn event_convert(&self, native: &Value) -> Event;

    /// Renders a payload for this platform.
    fn message_convert(&self, payload: &Payload) -> Message {
        payload.to_message()
    }
}

/// Shared adapter handle.
pub type BoxedAdapter = Arc<dyn Adapter>;

/// Reads a string field, treating absent and non-string values as empty.
pub fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Reads a string at a JSON pointer, treating absent values as empty.
pub fn str_at<'a>(value: &'a Value, pointer: &str) -> &'a str {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// Splits an interactive choice value of the form `"<seq>:<option>"`.
pub fn parse_choice(value: &str) -> Option<(i64, String)> {
    let (seq, option) = value.split_once(':')?;
    let seq = seq.parse::<i64>().ok().filter(|s| *s > 0)?;
    if option.is_empty() {
        return None;
    }
    Some((seq, option.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_choice() {
        assert_eq!(parse_choice("42:yes"), Some((42, "yes".into())));
        assert_eq!(parse_choice("42:"), None);
        assert_eq!(parse_choice("0:yes"), None);
        assert_eq!(parse_choice("yes"), None);
    }

    #[test]
    fn test_field_helpers() {
        let v = json!({"a": "x", "b": {"c": "y"}, "n": 1});
        assert_eq!(str_field(&v, "a"), "x");
        assert_eq!(str_field(&v, "n"), "");
        assert_eq!(str_at(&v, "/b/c"), "y");
        assert_eq!(str_at(&v, "/b/missing"), "");
    }
}
