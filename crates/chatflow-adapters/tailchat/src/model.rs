//! Tailchat webhook types.

use serde::{Deserialize, Serialize};

/// An inbox notification delivered to the bot's callback URL.
#[derive(Debug, Clone, Deserialize)]
pub struct Inbox {
    #[serde(rename = "_id")]
    pub id: String,
    /// The bot user the notification was delivered to.
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub payload: InboxPayload,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InboxPayload {
    pub group_id: String,
    pub converse_id: String,
    pub message_id: String,
    pub message_author: String,
    pub message_snippet: String,
    pub message_plain_content: String,
    pub forwarded: Option<String>,
}

/// Body of `POST /api/chat/message/sendMessage`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageBody {
    pub converse_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub content: String,
}
