//! Action requests and responses.
//!
//! Outbound commands travel as a [`Request`] naming one [`ActionName`] with a
//! JSON parameter object. Every platform answers with a [`Response`]:
//!
//! ```text
//! {"status": "ok",     "retcode": 0,     "data": {...}, "message": ""}
//! {"status": "failed", "retcode": 10002, "data": null,  "message": "unsupported_action"}
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ActionError, ErrorCode};

/// The fixed capability set of a platform action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionName {
    GetLatestEvents,
    GetSupportedActions,
    GetStatus,
    GetVersion,
    SendMessage,
    GetUserInfo,
    CreateChannel,
    GetChannelInfo,
    GetChannelList,
    RegisterChannels,
    RegisterSlashCommands,
    UpdateMessage,
    DeleteMessage,
}

impl ActionName {
    pub const ALL: [ActionName; 13] = [
        ActionName::GetLatestEvents,
        ActionName::GetSupportedActions,
        ActionName::GetStatus,
        ActionName::GetVersion,
        ActionName::SendMessage,
        ActionName::GetUserInfo,
        ActionName::CreateChannel,
        ActionName::GetChannelInfo,
        ActionName::GetChannelList,
        ActionName::RegisterChannels,
        ActionName::RegisterSlashCommands,
        ActionName::UpdateMessage,
        ActionName::DeleteMessage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionName::GetLatestEvents => "get_latest_events",
            ActionName::GetSupportedActions => "get_supported_actions",
            ActionName::GetStatus => "get_status",
            ActionName::GetVersion => "get_version",
            ActionName::SendMessage => "send_message",
            ActionName::GetUserInfo => "get_user_info",
            ActionName::CreateChannel => "create_channel",
            ActionName::GetChannelInfo => "get_channel_info",
            ActionName::GetChannelList => "get_channel_list",
            ActionName::RegisterChannels => "register_channels",
            ActionName::RegisterSlashCommands => "register_slash_commands",
            ActionName::UpdateMessage => "update_message",
            ActionName::DeleteMessage => "delete_message",
        }
    }
}

impl FromStr for ActionName {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| {
                ActionError::with_message(ErrorCode::UnsupportedAction, format!("unknown action: {s}"))
            })
    }
}

impl fmt::Display for ActionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Request
// ============================================================================

/// A canonical action request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub action: ActionName,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl Request {
    pub fn new(action: ActionName) -> Self {
        Self {
            action,
            params: Map::new(),
        }
    }

    /// Adds a parameter, builder style.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Returns a string parameter.
    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Returns a required, non-empty string parameter.
    pub fn require_str(&self, key: &str) -> Result<&str, ActionError> {
        self.str_param(key)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ActionError::bad_param(format!("missing parameter '{key}'")))
    }
}

// ============================================================================
// Response
// ============================================================================

/// Outcome status of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Failed,
}

/// A canonical action response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    pub retcode: i64,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub message: String,
}

impl Response {
    /// A successful response carrying `data`.
    pub fn ok(data: impl Into<Value>) -> Self {
        Self {
            status: Status::Ok,
            retcode: 0,
            data: data.into(),
            message: String::new(),
        }
    }

    /// A successful response without data.
    pub fn ok_empty() -> Self {
        Self::ok(Value::Null)
    }

    /// A failed response for the given error.
    pub fn failed(err: impl Into<ActionError>) -> Self {
        let err = err.into();
        Self {
            status: Status::Failed,
            retcode: err.code.retcode(),
            data: Value::Null,
            message: err.message,
        }
    }

    /// Shorthand for a failed `unsupported_action` response.
    pub fn unsupported() -> Self {
        Self::failed(ErrorCode::UnsupportedAction)
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Returns the error code of a failed response.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self.status {
            Status::Ok => None,
            Status::Failed => ErrorCode::from_retcode(self.retcode),
        }
    }
}

impl From<Result<Value, ActionError>> for Response {
    fn from(result: Result<Value, ActionError>) -> Self {
        match result {
            Ok(data) => Response::ok(data),
            Err(err) => Response::failed(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_action_name_round_trip() {
        for action in ActionName::ALL {
            assert_eq!(action.as_str().parse::<ActionName>().unwrap(), action);
        }
        let err = "send_sticker".parse::<ActionName>().unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedAction);
    }

    #[test]
    fn test_failed_response_shape() {
        let resp = Response::unsupported();
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"status": "failed", "retcode": 10002, "data": null, "message": "unsupported_action"})
        );
        assert_eq!(resp.error_code(), Some(ErrorCode::UnsupportedAction));
    }

    #[test]
    fn test_ok_response() {
        let resp = Response::ok(json!({"message_id": "1"}));
        assert!(resp.is_ok());
        assert_eq!(resp.retcode, 0);
        assert_eq!(resp.error_code(), None);
    }

    #[test]
    fn test_require_str() {
        let req = Request::new(ActionName::SendMessage).with_param("topic", "");
        assert_eq!(req.require_str("topic").unwrap_err().code, ErrorCode::BadParam);
        let req = req.with_param("topic", "C1");
        assert_eq!(req.require_str("topic").unwrap(), "C1");
    }
}
