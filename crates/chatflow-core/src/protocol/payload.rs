//! Bot response payloads.
//!
//! Handlers answer with a [`Payload`], a closed sum type with one variant per
//! kind of response. Each payload has a type tag (`tye`) and a JSON body
//! (`src`); both are persisted with every sent message so that later turns
//! can rebuild the typed payload with [`Payload::from_parts`].
//!
//! Bots that need their own kinds (for example a `bookmark` condition tag)
//! use [`Payload::Custom`], whose tag is the custom kind itself.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::{Message, Segment};
use crate::error::{ProtocolError, ProtocolResult};

/// A typed bot response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tye", content = "src", rename_all = "snake_case")]
pub enum Payload {
    Text {
        text: String,
    },
    TextList {
        texts: Vec<String>,
    },
    Info {
        title: String,
        model: BTreeMap<String, Value>,
    },
    Question {
        title: String,
        options: Vec<String>,
    },
    Link {
        title: String,
        url: String,
    },
    Image {
        url: String,
        #[serde(default)]
        alt: String,
    },
    File {
        name: String,
        url: String,
    },
    Location {
        latitude: f64,
        longitude: f64,
        #[serde(default)]
        title: String,
    },
    Table {
        title: String,
        header: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    Digit {
        title: String,
        digit: i64,
    },
    /// Prompt offering options handled by the action rule `id`.
    Action {
        id: String,
        title: String,
        options: Vec<String>,
    },
    /// Request to open a session handled by the session rule `id`.
    Session {
        id: String,
        title: String,
    },
    /// Bot-defined kind.
    Custom {
        kind: String,
        data: Value,
    },
}

impl Payload {
    /// Tags with a dedicated variant.
    pub const BUILTIN_TAGS: [&'static str; 12] = [
        "text",
        "text_list",
        "info",
        "question",
        "link",
        "image",
        "file",
        "location",
        "table",
        "digit",
        "action",
        "session",
    ];

    pub fn text(text: impl Into<String>) -> Self {
        Payload::Text { text: text.into() }
    }

    pub fn info(title: impl Into<String>, model: BTreeMap<String, Value>) -> Self {
        Payload::Info {
            title: title.into(),
            model,
        }
    }

    pub fn link(title: impl Into<String>, url: impl Into<String>) -> Self {
        Payload::Link {
            title: title.into(),
            url: url.into(),
        }
    }

    pub fn action<I, S>(id: impl Into<String>, title: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Payload::Action {
            id: id.into(),
            title: title.into(),
            options: options.into_iter().map(Into::into).collect(),
        }
    }

    pub fn session(id: impl Into<String>, title: impl Into<String>) -> Self {
        Payload::Session {
            id: id.into(),
            title: title.into(),
        }
    }

    pub fn custom(kind: impl Into<String>, data: Value) -> Self {
        Payload::Custom {
            kind: kind.into(),
            data,
        }
    }

    /// Returns the type tag.
    pub fn tye(&self) -> &str {
        match self {
            Payload::Text { .. } => "text",
            Payload::TextList { .. } => "text_list",
            Payload::Info { .. } => "info",
            Payload::Question { .. } => "question",
            Payload::Link { .. } => "link",
            Payload::Image { .. } => "image",
            Payload::File { .. } => "file",
            Payload::Location { .. } => "location",
            Payload::Table { .. } => "table",
            Payload::Digit { .. } => "digit",
            Payload::Action { .. } => "action",
            Payload::Session { .. } => "session",
            Payload::Custom { kind, .. } => kind,
        }
    }

    /// Splits the payload into its tag and JSON body.
    pub fn to_parts(&self) -> (String, Value) {
        if let Payload::Custom { kind, data } = self {
            return (kind.clone(), data.clone());
        }
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        let src = value.get_mut("src").map(Value::take).unwrap_or(Value::Null);
        (self.tye().to_string(), src)
    }

    /// Rebuilds a payload from its tag and JSON body.
    ///
    /// Builtin tags must decode into their variant; any other tag becomes
    /// [`Payload::Custom`].
    pub fn from_parts(tye: &str, src: Value) -> ProtocolResult<Self> {
        if !Self::BUILTIN_TAGS.contains(&tye) {
            return Ok(Payload::custom(tye, src));
        }
        let tagged = serde_json::json!({ "tye": tye, "src": src });
        serde_json::from_value(tagged).map_err(|e| ProtocolError::BadPayload {
            tye: tye.to_string(),
            reason: e.to_string(),
        })
    }

    /// Default canonical rendering.
    ///
    /// Adapters may render some kinds natively and fall back to this.
    pub fn to_message(&self) -> Message {
        match self {
            Payload::Text { text } => Message::text(text.clone()),
            Payload::TextList { texts } => Message::text(texts.join("\n")),
            Payload::Info { title, model } => {
                let mut lines = vec![title.clone()];
                lines.extend(model.iter().map(|(k, v)| format!("{k}: {}", value_text(v))));
                Message::text(lines.join("\n"))
            }
            Payload::Question { title, options } => {
                let mut lines = vec![title.clone()];
                lines.extend(
                    options
                        .iter()
                        .enumerate()
                        .map(|(i, o)| format!("{}. {o}", i + 1)),
                );
                Message::text(lines.join("\n"))
            }
            Payload::Link { title, url } => {
                let mut msg = Message::new();
                if !title.is_empty() {
                    msg.push(Segment::text(title.clone()));
                }
                msg.with(Segment::url(url.clone()))
            }
            Payload::Image { url, alt } => {
                let mut msg = Message::new().with(Segment::image(url.clone()));
                if !alt.is_empty() {
                    msg.push(Segment::text(alt.clone()));
                }
                msg
            }
            Payload::File { name, url } => Message::new()
                .with(Segment::text(name.clone()))
                .with(Segment::url(url.clone())),
            Payload::Location {
                latitude,
                longitude,
                title,
            } => match Segment::location(*latitude, *longitude, title.clone(), "") {
                Ok(seg) => Message::new().with(seg),
                Err(_) => Message::text(format!("{title} ({latitude}, {longitude})")),
            },
            Payload::Table {
                title,
                header,
                rows,
            } => {
                let mut lines = vec![title.clone(), header.join(" | ")];
                lines.extend(rows.iter().map(|row| {
                    row.iter().map(value_text).collect::<Vec<_>>().join(" | ")
                }));
                Message::text(lines.join("\n"))
            }
            Payload::Digit { title, digit } => Message::text(format!("{title}: {digit}")),
            Payload::Action { title, options, .. } => {
                let mut lines = vec![title.clone()];
                lines.extend(options.iter().map(|o| format!("[{o}]")));
                Message::text(lines.join("\n"))
            }
            Payload::Session { title, .. } => Message::text(title.clone()),
            Payload::Custom { kind, data } => Message::text(format!("{kind}\n{data}")),
        }
    }
}

/// Renders a JSON value without quoting plain strings.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
