//! Canonical message and segment types.
//!
//! A [`Message`] is an ordered sequence of typed [`Segment`]s. Order matters:
//! the human-readable rendering concatenates segments in sequence, and
//! platforms without rich-segment support deliver that rendering verbatim.
//!
//! Segments serialize in the `{"type": ..., "data": {...}}` shape:
//!
//! ```text
//! {"type": "text", "data": {"text": "hello"}}
//! {"type": "mention", "data": {"user_id": "U123"}}
//! {"type": "location", "data": {"latitude": 31.2, "longitude": 121.5, "title": "", "content": ""}}
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use chatflow_core::{Message, Segment};
//!
//! let msg = Message::new()
//!     .with(Segment::text("see"))
//!     .with(Segment::url("https://example.com"))
//!     .with(Segment::mention(""));
//! assert_eq!(msg.alt_text(), "see\nhttps://example.com");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, ProtocolResult};

/// Segment type tags understood by the canonical model.
pub const SEGMENT_TYPES: [&str; 11] = [
    "text",
    "url",
    "mention",
    "mention_all",
    "image",
    "voice",
    "audio",
    "video",
    "file",
    "location",
    "reply",
];

// ============================================================================
// Segment
// ============================================================================

/// A single typed unit of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Segment {
    /// Plain text.
    Text(TextData),
    /// A bare link.
    Url(UrlData),
    /// Mention of a single user.
    Mention(MentionData),
    /// Mention of everyone in the topic.
    MentionAll(MentionData),
    /// Image reference.
    Image(FileData),
    /// Voice note reference.
    Voice(FileData),
    /// Audio reference.
    Audio(FileData),
    /// Video reference.
    Video(FileData),
    /// Generic file reference.
    File(FileData),
    /// Geographic location.
    Location(LocationData),
    /// Reply to an earlier message.
    Reply(ReplyData),
}

/// Data of a `text` segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextData {
    pub text: String,
}

/// Data of a `url` segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlData {
    pub url: String,
}

/// Data of `mention` and `mention_all` segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionData {
    pub user_id: String,
}

/// Data of media segments (`image`, `voice`, `audio`, `video`, `file`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileData {
    pub file_id: String,
}

/// Data of a `location` segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationData {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
}

/// Data of a `reply` segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyData {
    pub user_id: String,
    pub message_id: String,
}

impl Segment {
    /// Creates a text segment.
    pub fn text(text: impl Into<String>) -> Self {
        Segment::Text(TextData { text: text.into() })
    }

    /// Creates a url segment.
    pub fn url(url: impl Into<String>) -> Self {
        Segment::Url(UrlData { url: url.into() })
    }

    /// Creates a mention segment.
    ///
    /// An empty user id mentions everyone and yields `mention_all`.
    pub fn mention(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        if user_id.is_empty() {
            Segment::MentionAll(MentionData {
                user_id: "all".to_string(),
            })
        } else {
            Segment::Mention(MentionData { user_id })
        }
    }

    /// Creates an image segment.
    pub fn image(file_id: impl Into<String>) -> Self {
        Segment::Image(FileData {
            file_id: file_id.into(),
        })
    }

    /// Creates a voice segment.
    pub fn voice(file_id: impl Into<String>) -> Self {
        Segment::Voice(FileData {
            file_id: file_id.into(),
        })
    }

    /// Creates an audio segment.
    pub fn audio(file_id: impl Into<String>) -> Self {
        Segment::Audio(FileData {
            file_id: file_id.into(),
        })
    }

    /// Creates a video segment.
    pub fn video(file_id: impl Into<String>) -> Self {
        Segment::Video(FileData {
            file_id: file_id.into(),
        })
    }

    /// Creates a file segment.
    pub fn file(file_id: impl Into<String>) -> Self {
        Segment::File(FileData {
            file_id: file_id.into(),
        })
    }

    /// Creates a location segment.
    ///
    /// Coordinates must be finite, latitude within `[-90, 90]` and longitude
    /// within `[-180, 180]`.
    pub fn location(
        latitude: f64,
        longitude: f64,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> ProtocolResult<Self> {
        let data = LocationData {
            latitude,
            longitude,
            title: title.into(),
            content: content.into(),
        };
        validate_location(&data)?;
        Ok(Segment::Location(data))
    }

    /// Creates a reply segment.
    pub fn reply(user_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Segment::Reply(ReplyData {
            user_id: user_id.into(),
            message_id: message_id.into(),
        })
    }

    /// Decodes and validates a segment from its JSON form.
    pub fn from_value(value: Value) -> ProtocolResult<Self> {
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::BadSegmentType("<missing>".to_string()))?
            .to_string();
        if !SEGMENT_TYPES.contains(&tag.as_str()) {
            return Err(ProtocolError::BadSegmentType(tag));
        }
        let segment: Segment = serde_json::from_value(value)
            .map_err(|e| ProtocolError::segment_data(&tag, e.to_string()))?;
        if let Segment::Location(data) = &segment {
            validate_location(data)?;
        }
        Ok(segment)
    }

    /// Returns the type tag of this segment.
    pub fn segment_type(&self) -> &'static str {
        match self {
            Segment::Text(_) => "text",
            Segment::Url(_) => "url",
            Segment::Mention(_) => "mention",
            Segment::MentionAll(_) => "mention_all",
            Segment::Image(_) => "image",
            Segment::Voice(_) => "voice",
            Segment::Audio(_) => "audio",
            Segment::Video(_) => "video",
            Segment::File(_) => "file",
            Segment::Location(_) => "location",
            Segment::Reply(_) => "reply",
        }
    }

    /// Returns the text content for text-like segments.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Segment::Text(data) => Some(&data.text),
            Segment::Url(data) => Some(&data.url),
            _ => None,
        }
    }

    /// Key/value pairs of the segment data in rendering order.
    fn fields(&self) -> Vec<(&'static str, String)> {
        match self {
            Segment::Text(d) => vec![("text", d.text.clone())],
            Segment::Url(d) => vec![("url", d.url.clone())],
            Segment::Mention(d) | Segment::MentionAll(d) => vec![("user_id", d.user_id.clone())],
            Segment::Image(d)
            | Segment::Voice(d)
            | Segment::Audio(d)
            | Segment::Video(d)
            | Segment::File(d) => vec![("file_id", d.file_id.clone())],
            Segment::Location(d) => vec![
                ("latitude", d.latitude.to_string()),
                ("longitude", d.longitude.to_string()),
                ("title", d.title.clone()),
                ("content", d.content.clone()),
            ],
            Segment::Reply(d) => vec![
                ("user_id", d.user_id.clone()),
                ("message_id", d.message_id.clone()),
            ],
        }
    }
}

fn validate_location(data: &LocationData) -> ProtocolResult<()> {
    if !data.latitude.is_finite() || !(-90.0..=90.0).contains(&data.latitude) {
        return Err(ProtocolError::segment_data(
            "location",
            format!("latitude out of range: {}", data.latitude),
        ));
    }
    if !data.longitude.is_finite() || !(-180.0..=180.0).contains(&data.longitude) {
        return Err(ProtocolError::segment_data(
            "location",
            format!("longitude out of range: {}", data.longitude),
        ));
    }
    Ok(())
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.segment_type())?;
        for (key, value) in self.fields() {
            writeln!(f, "{key}: {value}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Message
// ============================================================================

/// An ordered sequence of segments.
///
/// A message without segments is a valid "no-op" response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Vec<Segment>);

impl Message {
    /// Creates an empty message.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Creates a message holding a single text segment.
    pub fn text(text: impl Into<String>) -> Self {
        Self(vec![Segment::text(text)])
    }

    /// Appends a segment, builder style.
    pub fn with(mut self, segment: Segment) -> Self {
        self.0.push(segment);
        self
    }

    /// Appends a segment.
    pub fn push(&mut self, segment: Segment) {
        self.0.push(segment);
    }

    /// Returns the segments.
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Returns an iterator over the segments.
    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.0.iter()
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the message has no segments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Plain-text fallback: text and url segments joined by newlines.
    pub fn alt_text(&self) -> String {
        self.0
            .iter()
            .filter_map(Segment::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Decodes and validates a message from a JSON array of segments.
    pub fn from_value(value: Value) -> ProtocolResult<Self> {
        match value {
            Value::Array(items) => items
                .into_iter()
                .map(Segment::from_value)
                .collect::<ProtocolResult<Vec<_>>>()
                .map(Self),
            other => Err(ProtocolError::BadSegmentType(format!(
                "expected segment array, got {other}"
            ))),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.0 {
            write!(f, "{segment}")?;
            writeln!(f)?;
        }
        Ok(())
    }
}

impl From<Vec<Segment>> for Message {
    fn from(segments: Vec<Segment>) -> Self {
        Self(segments)
    }
}

impl FromIterator<Segment> for Message {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Message {
    type Item = Segment;
    type IntoIter = std::vec::IntoIter<Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
