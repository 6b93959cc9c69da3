//! Platform action contract.
//!
//! An [`Action`] exposes the fixed capability set of [`ActionName`]. Every
//! method answers with a canonical [`Response`]; capabilities a platform
//! cannot provide keep the default body and fail with `unsupported_action`.
//! Failures are values, never panics across the platform boundary.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{ActionError, ErrorCode};
use crate::protocol::{ActionName, Message, Request, Response};

/// A selectable option rendered as a native button where supported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub label: String,
    /// Callback value, `"<seq>:<option>"`.
    pub value: String,
}

/// Decoded parameters of a `send_message` request.
#[derive(Debug, Clone, PartialEq)]
pub struct SendMessageParams {
    pub topic: String,
    pub message: Message,
    pub seq: i64,
    pub options: Vec<ChoiceOption>,
}

impl SendMessageParams {
    pub fn new(topic: impl Into<String>, message: Message) -> Self {
        Self {
            topic: topic.into(),
            message,
            seq: 0,
            options: Vec::new(),
        }
    }

    pub fn with_seq(mut self, seq: i64) -> Self {
        self.seq = seq;
        self
    }

    pub fn with_options(mut self, options: Vec<ChoiceOption>) -> Self {
        self.options = options;
        self
    }

    /// Encodes the parameters as a request.
    pub fn into_request(self) -> Request {
        let mut req = Request::new(ActionName::SendMessage)
            .with_param("topic", self.topic)
            .with_param(
                "message",
                serde_json::to_value(&self.message).unwrap_or(Value::Null),
            );
        if self.seq > 0 {
            req = req.with_param("seq", self.seq);
        }
        if !self.options.is_empty() {
            req = req.with_param(
                "options",
                serde_json::to_value(&self.options).unwrap_or(Value::Null),
            );
        }
        req
    }

    /// Decodes the parameters of a request.
    ///
    /// A `message` that is not a canonical segment list fails with
    /// `bad_segment_type`; a missing topic fails with `bad_param`.
    pub fn from_request(req: &Request) -> Result<Self, ActionError> {
        let topic = req.require_str("topic")?.to_string();
        let message = req
            .params
            .get("message")
            .cloned()
            .ok_or_else(|| ActionError::with_message(ErrorCode::BadSegmentType, "message type error"))
            .and_then(|v| {
                Message::from_value(v).map_err(|_| {
                    ActionError::with_message(ErrorCode::BadSegmentType, "message type error")
                })
            })?;
        let seq = req.params.get("seq").and_then(Value::as_i64).unwrap_or(0);
        let options = match req.params.get("options") {
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| ActionError::bad_param(format!("options: {e}")))?,
            None => Vec::new(),
        };
        Ok(Self {
            topic,
            message,
            seq,
            options,
        })
    }
}

/// Per-platform outbound command executor.
#[async_trait]
pub trait Action: Send + Sync {
    /// Platform identifier.
    fn platform(&self) -> &str;

    /// Capabilities this platform implements.
    fn supported_actions(&self) -> Vec<ActionName> {
        vec![
            ActionName::GetSupportedActions,
            ActionName::GetStatus,
            ActionName::GetVersion,
        ]
    }

    /// Version information reported by `get_version`.
    fn version(&self) -> Value {
        json!({
            "impl": "chatflow",
            "platform": self.platform(),
            "version": env!("CARGO_PKG_VERSION"),
        })
    }

    async fn get_latest_events(&self, _req: &Request) -> Response {
        Response::unsupported()
    }

    async fn get_supported_actions(&self, _req: &Request) -> Response {
        let names: Vec<&str> = self.supported_actions().iter().map(|a| a.as_str()).collect();
        Response::ok(json!(names))
    }

    async fn get_status(&self, _req: &Request) -> Response {
        Response::ok(json!({ "good": true }))
    }

    async fn get_version(&self, _req: &Request) -> Response {
        Response::ok(self.version())
    }

    async fn send_message(&self, _req: &Request) -> Response {
        Response::unsupported()
    }

    async fn get_user_info(&self, _req: &Request) -> Response {
        Response::unsupported()
    }

    async fn create_channel(&self, _req: &Request) -> Response {
        Response::unsupported()
    }

    async fn get_channel_info(&self, _req: &Request) -> Response {
        Response::unsupported()
    }

    async fn get_channel_list(&self, _req: &Request) -> Response {
        Response::unsupported()
    }

    async fn register_channels(&self, _req: &Request) -> Response {
        Response::unsupported()
    }

    async fn register_slash_commands(&self, _req: &Request) -> Response {
        Response::unsupported()
    }

    async fn update_message(&self, _req: &Request) -> Response {
        Response::unsupported()
    }

    async fn delete_message(&self, _req: &Request) -> Response {
        Response::unsupported()
    }

    /// Routes a request to the matching capability.
    async fn call(&self, req: &Request) -> Response {
        match req.action {
            ActionName::GetLatestEvents => self.get_latest_events(req).await,
            ActionName::GetSupportedActions => self.get_supported_actions(req).await,
            ActionName::GetStatus => self.get_status(req).await,
            ActionName::GetVersion => self.get_version(req).await,
            ActionName::SendMessage => self.send_message(req).await,
            ActionName::GetUserInfo => self.get_user_info(req).await,
            ActionName::CreateChannel => self.create_channel(req).await,
            ActionName::GetChannelInfo => self.get_channel_info(req).await,
            ActionName::GetChannelList => self.get_channel_list(req).await,
            ActionName::RegisterChannels => self.register_channels(req).await,
            ActionName::RegisterSlashCommands => self.register_slash_commands(req).await,
            ActionName::UpdateMessage => self.update_message(req).await,
            ActionName::DeleteMessage => self.delete_message(req).await,
        }
    }
}

/// Shared action handle.
pub type BoxedAction = Arc<dyn Action>;
