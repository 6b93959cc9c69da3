//! Discord REST action.

use async_trait::async_trait;
use chatflow_core::{
    Action, ActionError, ActionName, ChoiceOption, Message, Request, Response, Segment,
    SendMessageParams,
};
use chatflow_transport::{HttpRequest, SharedHttpCaller, TransportError};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::PLATFORM;
use crate::config::DiscordConfig;

/// Buttons per action row allowed by Discord.
const BUTTONS_PER_ROW: usize = 5;

/// Executes canonical requests against the Discord REST API.
pub struct DiscordAction {
    config: DiscordConfig,
    http: SharedHttpCaller,
}

impl DiscordAction {
    pub fn new(config: DiscordConfig, http: SharedHttpCaller) -> Self {
        Self { config, http }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn api(&self, req: HttpRequest) -> Result<Value, ActionError> {
        let req = req.header("Authorization", format!("Bot {}", self.config.token));
        match self.http.call(req).await {
            Ok(resp) => Ok(resp.body),
            Err(TransportError::Status { status, body }) => {
                Err(ActionError::platform(format!("HTTP {status}: {body}")))
            }
            Err(e) => Err(ActionError::network(e.to_string())),
        }
    }
}

/// Joins text, url and mention segments into message content.
fn render_content(message: &Message) -> String {
    message
        .iter()
        .filter_map(|seg| match seg {
            Segment::Text(d) => Some(d.text.clone()),
            Segment::Url(d) => Some(d.url.clone()),
            Segment::Mention(d) => Some(format!("<@{}>", d.user_id)),
            Segment::MentionAll(_) => Some("@everyone".to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Builds action rows of primary buttons.
fn components(options: &[ChoiceOption]) -> Value {
    let rows: Vec<Value> = options
        .chunks(BUTTONS_PER_ROW)
        .map(|chunk| {
            let buttons: Vec<Value> = chunk
                .iter()
                .map(|o| json!({"type": 2, "style": 1, "label": o.label, "custom_id": o.value}))
                .collect();
            json!({"type": 1, "components": buttons})
        })
        .collect();
    Value::Array(rows)
}

fn topic_and_message_id(req: &Request) -> Result<(&str, &str), ActionError> {
    Ok((req.require_str("topic")?, req.require_str("message_id")?))
}

#[async_trait]
impl Action for DiscordAction {
    fn platform(&self) -> &str {
        PLATFORM
    }

    fn supported_actions(&self) -> Vec<ActionName> {
        vec![
            ActionName::GetSupportedActions,
            ActionName::GetStatus,
            ActionName::GetVersion,
            ActionName::SendMessage,
            ActionName::GetUserInfo,
            ActionName::CreateChannel,
            ActionName::GetChannelInfo,
            ActionName::GetChannelList,
            ActionName::RegisterSlashCommands,
            ActionName::UpdateMessage,
            ActionName::DeleteMessage,
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
        let mut body = json!({"content": render_content(&params.message)});
        if !params.options.is_empty() {
            body["components"] = components(&params.options);
        }
        let url = self.url(&format!("channels/{}/messages", params.topic));
        match self.api(HttpRequest::post(url).json(body)).await {
            Ok(data) => {
                debug!(channel = %params.topic, "Discord message sent");
                Response::ok(json!({"message_id": data["id"], "topic": params.topic}))
            }
            Err(e) => {
                warn!(channel = %params.topic, error = %e, "Discord send failed");
                Response::failed(ActionError::internal_handler("send message error"))
            }
        }
    }

    async fn get_user_info(&self, req: &Request) -> Response {
        let user_id = match req.require_str("user_id") {
            Ok(u) => u,
            Err(e) => return Response::failed(e),
        };
        self.api(HttpRequest::get(self.url(&format!("users/{user_id}"))))
            .await
            .map(|u| {
                json!({
                    "user_id": u["id"],
                    "user_name": u["username"],
                    "user_displayname": u["global_name"],
                })
            })
            .into()
    }

    async fn create_channel(&self, req: &Request) -> Response {
        let (guild_id, name) = match (req.require_str("guild_id"), req.require_str("name")) {
            (Ok(g), Ok(n)) => (g, n),
            (Err(e), _) | (_, Err(e)) => return Response::failed(e),
        };
        let url = self.url(&format!("guilds/{guild_id}/channels"));
        self.api(HttpRequest::post(url).json(json!({"name": name, "type": 0})))
            .await
            .map(|c| json!({"channel_id": c["id"]}))
            .into()
    }

    async fn get_channel_info(&self, req: &Request) -> Response {
        let channel_id = match req.require_str("channel_id") {
            Ok(c) => c,
            Err(e) => return Response::failed(e),
        };
        self.api(HttpRequest::get(self.url(&format!("channels/{channel_id}"))))
            .await
            .map(|c| json!({"channel_id": c["id"], "channel_name": c["name"]}))
            .into()
    }

    async fn get_channel_list(&self, req: &Request) -> Response {
        let guild_id = match req.require_str("guild_id") {
            Ok(g) => g,
            Err(e) => return Response::failed(e),
        };
        self.api(HttpRequest::get(self.url(&format!("guilds/{guild_id}/channels"))))
            .await
            .map(|list| {
                let channels = list
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .map(|c| json!({"channel_id": c["id"], "channel_name": c["name"]}))
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                Value::Array(channels)
            })
            .into()
    }

    async fn register_slash_commands(&self, req: &Request) -> Response {
        if self.config.app_id.is_empty() {
            return Response::failed(ActionError::bad_param("app_id is not configured"));
        }
        let Some(commands) = req.params.get("commands").and_then(Value::as_array) else {
            return Response::failed(ActionError::bad_param("missing parameter 'commands'"));
        };
        let body: Vec<Value> = commands
            .iter()
            .map(|c| {
                json!({
                    "name": c["name"],
                    "description": c.get("description").cloned().unwrap_or_else(|| json!("")),
                    "type": 1,
                })
            })
            .collect();
        let url = self.url(&format!("applications/{}/commands", self.config.app_id));
        self.api(HttpRequest::put(url).json(Value::Array(body)))
            .await
            .map(|registered| json!({"count": registered.as_array().map_or(0, Vec::len)}))
            .into()
    }

    async fn update_message(&self, req: &Request) -> Response {
        let (topic, message_id) = match topic_and_message_id(req) {
            Ok(ids) => ids,
            Err(e) => return Response::failed(e),
        };
        let message = match req.params.get("message").cloned().map(Message::from_value) {
            Some(Ok(m)) => m,
            Some(Err(e)) => return Response::failed(e),
            None => return Response::failed(ActionError::bad_param("missing parameter 'message'")),
        };
        let url = self.url(&format!("channels/{topic}/messages/{message_id}"));
        self.api(HttpRequest::patch(url).json(json!({"content": render_content(&message)})))
            .await
            .map(|_| Value::Null)
            .into()
    }

    async fn delete_message(&self, req: &Request) -> Response {
        let (topic, message_id) = match topic_and_message_id(req) {
            Ok(ids) => ids,
            Err(e) => return Response::failed(e),
        };
        let url = self.url(&format!("channels/{topic}/messages/{message_id}"));
        self.api(HttpRequest::delete(url))
            .await
            .map(|_| Value::Null)
            .into()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chatflow_core::ErrorCode;
    use chatflow_transport::HttpMethod;
    use chatflow_transport::mock::MockHttpCaller;

    use super::*;

    fn action(mock: Arc<MockHttpCaller>) -> DiscordAction {
        DiscordAction::new(DiscordConfig::new("tok", "APP1"), mock)
    }

    #[tokio::test]
    async fn test_send_message_with_buttons() {
        let mock = Arc::new(MockHttpCaller::new());
        mock.reply_json(json!({"id": "M9"}));
        let discord = action(mock.clone());

        let options: Vec<ChoiceOption> = (1..=6)
            .map(|i| ChoiceOption {
                label: format!("o{i}"),
                value: format!("3:o{i}"),
            })
            .collect();
        let req = SendMessageParams::new("CH1", Message::text("pick"))
            .with_seq(3)
            .with_options(options)
            .into_request();
        let resp = discord.call(&req).await;

        assert!(resp.is_ok());
        assert_eq!(resp.data["message_id"], "M9");
        let sent = &mock.requests()[0];
        assert!(sent.url.ends_with("/channels/CH1/messages"));
        assert_eq!(sent.header_value("authorization"), Some("Bot tok"));
        let body = sent.body.clone().unwrap();
        assert_eq!(body["content"], "pick");
        assert_eq!(body["components"].as_array().unwrap().len(), 2);
        assert_eq!(body["components"][1]["components"][0]["custom_id"], "3:o6");
    }

    #[tokio::test]
    async fn test_send_http_error_is_internal_handler() {
        let mock = Arc::new(MockHttpCaller::new());
        mock.reply(Err(TransportError::Status {
            status: 403,
            body: "Missing Access".into(),
        }));
        let resp = action(mock)
            .call(&SendMessageParams::new("CH1", Message::text("x")).into_request())
            .await;
        assert_eq!(resp.error_code(), Some(ErrorCode::InternalHandler));
    }

    #[tokio::test]
    async fn test_register_slash_commands() {
        let mock = Arc::new(MockHttpCaller::new());
        mock.reply_json(json!([{"id": "1"}, {"id": "2"}]));
        let discord = action(mock.clone());

        let req = Request::new(ActionName::RegisterSlashCommands).with_param(
            "commands",
            json!([{"name": "version", "description": "show version"}, {"name": "help"}]),
        );
        let resp = discord.call(&req).await;
        assert_eq!(resp.data["count"], 2);
        let sent = &mock.requests()[0];
        assert_eq!(sent.method, HttpMethod::Put);
        assert!(sent.url.ends_with("/applications/APP1/commands"));
        assert_eq!(sent.body.as_ref().unwrap()[1]["description"], "");
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let mock = Arc::new(MockHttpCaller::new());
        let discord = action(mock.clone());

        let req = Request::new(ActionName::UpdateMessage)
            .with_param("topic", "CH1")
            .with_param("message_id", "M1")
            .with_param("message", serde_json::to_value(Message::text("edited")).unwrap());
        assert!(discord.call(&req).await.is_ok());

        let req = Request::new(ActionName::DeleteMessage)
            .with_param("topic", "CH1")
            .with_param("message_id", "M1");
        assert!(discord.call(&req).await.is_ok());

        let methods: Vec<HttpMethod> = mock.requests().iter().map(|r| r.method).collect();
        assert_eq!(methods, vec![HttpMethod::Patch, HttpMethod::Delete]);

        let req = Request::new(ActionName::DeleteMessage).with_param("topic", "CH1");
        let resp = discord.call(&req).await;
        assert_eq!(resp.error_code(), Some(ErrorCode::BadParam));
    }

    #[tokio::test]
    async fn test_get_latest_events_unsupported() {
        let resp = action(Arc::new(MockHttpCaller::new()))
            .call(&Request::new(ActionName::GetLatestEvents))
            .await;
        assert_eq!(resp.error_code(), Some(ErrorCode::UnsupportedAction));
    }
}
