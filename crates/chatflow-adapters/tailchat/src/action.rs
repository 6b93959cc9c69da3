//! Tailchat open-platform action.
//!
//! The bot logs in with `md5(app_id + app_secret)` on first use and caches
//! the returned JWT. A `401` on send clears the cache and retries once with
//! a fresh login.

use async_trait::async_trait;
use chatflow_core::{
    Action, ActionError, ActionName, ErrorCode, Message, Request, Response, SendMessageParams,
};
use chatflow_transport::{HttpRequest, SharedHttpCaller, TransportError};
use md5::{Digest, Md5};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::PLATFORM;
use crate::config::TailchatConfig;
use crate::model::SendMessageBody;

const LOGIN_PATH: &str = "/api/openapi/bot/login";
const SEND_PATH: &str = "/api/chat/message/sendMessage";

/// Executes canonical requests against a Tailchat server.
pub struct TailchatAction {
    config: TailchatConfig,
    http: SharedHttpCaller,
    token: Mutex<Option<String>>,
}

impl TailchatAction {
    pub fn new(config: TailchatConfig, http: SharedHttpCaller) -> Self {
        Self {
            config,
            http,
            token: Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// Login signature expected by the open platform.
    fn sign(&self) -> String {
        let digest = Md5::digest(format!("{}{}", self.config.app_id, self.config.app_secret));
        hex::encode(digest)
    }

    async fn login(&self) -> Result<String, ActionError> {
        let body = json!({"appId": self.config.app_id, "token": self.sign()});
        let resp = self
            .http
            .call(HttpRequest::post(self.url(LOGIN_PATH)).json(body))
            .await
            .map_err(|e| ActionError::with_message(ErrorCode::Login, e.to_string()))?;
        let jwt = resp
            .body
            .pointer("/data/jwt")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ActionError::with_message(ErrorCode::Login, "login response without jwt"))?;
        info!(app_id = %self.config.app_id, "Tailchat bot logged in");
        Ok(jwt.to_string())
    }

    /// Returns the cached token, logging in when absent.
    async fn token(&self) -> Result<String, ActionError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        let token = self.login().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    async fn post_message(&self, token: &str, body: &SendMessageBody) -> Result<Value, TransportError> {
        let body = serde_json::to_value(body).map_err(|e| TransportError::Decode(e.to_string()))?;
        self.http
            .call(
                HttpRequest::post(self.url(SEND_PATH))
                    .header("X-Token", token)
                    .json(body),
            )
            .await
            .map(|resp| resp.body)
    }

    async fn send(&self, body: &SendMessageBody) -> Result<Value, ActionError> {
        let token = self.token().await?;
        match self.post_message(&token, body).await {
            Err(TransportError::Status { status: 401, .. }) => {
                debug!("Tailchat token rejected, logging in again");
                *self.token.lock().await = None;
                let token = self.token().await?;
                self.post_message(&token, body)
                    .await
                    .map_err(|e| ActionError::internal_handler(e.to_string()))
            }
            other => other.map_err(|e| ActionError::internal_handler(e.to_string())),
        }
    }
}

fn render_content(message: &Message) -> String {
    message.alt_text()
}

#[async_trait]
impl Action for TailchatAction {
    fn platform(&self) -> &str {
        PLATFORM
    }

    fn supported_actions(&self) -> Vec<ActionName> {
        vec![
            ActionName::GetSupportedActions,
            ActionName::GetStatus,
            ActionName::GetVersion,
            ActionName::SendMessage,
        ]
    }

    async fn send_message(&self, req: &Request) -> Response {
        let params = match SendMessageParams::from_request(req) {
            Ok(p) => p,
            Err(e) => return Response::failed(e),
        };
        if params.message.is_empty() {
            return Response::ok_empty();
        }
        let body = SendMessageBody {
            converse_id: params.topic.clone(),
            group_id: req.str_param("group_id").map(str::to_string),
            content: render_content(&params.message),
        };
        match self.send(&body).await {
            Ok(data) => Response::ok(json!({
                "message_id": data.pointer("/data/_id").cloned().unwrap_or(Value::Null),
                "topic": params.topic,
            })),
            Err(e) if e.code == ErrorCode::Login => {
                warn!(error = %e, "Tailchat login failed");
                Response::failed(e)
            }
            Err(e) => {
                warn!(converse = %params.topic, error = %e, "Tailchat send failed");
                Response::failed(ActionError::internal_handler("send message error"))
            }
        }
    }
}
