//! Slack Web API action.

use async_trait::async_trait;
use chatflow_core::{
    Action, ActionError, ActionName, Message, Request, Response, SendMessageParams, Segment,
    platform::ChoiceOption,
};
use chatflow_transport::{HttpRequest, SharedHttpCaller, TransportError};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::PLATFORM;
use crate::config::SlackConfig;

/// Executes canonical requests against the Slack Web API.
pub struct SlackAction {
    config: SlackConfig,
    http: SharedHttpCaller,
}

impl SlackAction {
    pub fn new(config: SlackConfig, http: SharedHttpCaller) -> Self {
        Self { config, http }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), method)
    }

    /// Calls a Web API method and unwraps Slack's `{ok, error}` envelope.
    async fn api(&self, req: HttpRequest) -> Result<Value, ActionError> {
        let resp = self
            .http
            .call(req.bearer(&self.config.token))
            .await
            .map_err(transport_error)?;
        if resp.body.get("ok").and_then(Value::as_bool) == Some(true) {
            Ok(resp.body)
        } else {
            let error = resp
                .body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error");
            Err(ActionError::platform(error))
        }
    }

    async fn post(&self, method: &str, body: Value) -> Result<Value, ActionError> {
        self.api(HttpRequest::post(self.url(method)).json(body)).await
    }

    async fn get(&self, method: &str, query: &[(&str, &str)]) -> Result<Value, ActionError> {
        let mut req = HttpRequest::get(self.url(method));
        for (k, v) in query {
            req = req.query(*k, *v);
        }
        self.api(req).await
    }
}

fn transport_error(err: TransportError) -> ActionError {
    match err {
        TransportError::Status { status, body } => {
            ActionError::platform(format!("HTTP {status}: {body}"))
        }
        other => ActionError::network(other.to_string()),
    }
}

/// Renders segments as Slack mrkdwn text.
fn render_text(message: &Message) -> String {
    message
        .iter()
        .filter_map(|seg| match seg {
            Segment::Text(d) => Some(d.text.clone()),
            Segment::Url(d) => Some(d.url.clone()),
            Segment::Mention(d) => Some(format!("<@{}>", d.user_id)),
            Segment::MentionAll(_) => Some("<!channel>".to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Builds Block Kit blocks with one button per option.
fn choice_blocks(text: &str, options: &[ChoiceOption]) -> Value {
    let buttons: Vec<Value> = options
        .iter()
        .enumerate()
        .map(|(i, o)| {
            json!({
                "type": "button",
                "text": {"type": "plain_text", "text": o.label},
                "value": o.value,
                "action_id": format!("chatflow_choice_{i}"),
            })
        })
        .collect();
    json!([
        {"type": "section", "text": {"type": "mrkdwn", "text": text}},
        {"type": "actions", "elements": buttons},
    ])
}

fn result(r: Result<Value, ActionError>) -> Response {
    r.into()
}

#[async_trait]
impl Action for SlackAction {
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
        let text = render_text(&params.message);
        let mut body = json!({"channel": params.topic, "text": text});
        if !params.options.is_empty() {
            body["blocks"] = choice_blocks(&text, &params.options);
        }
        match self.post("chat.postMessage", body).await {
            Ok(data) => {
                debug!(channel = %params.topic, "Slack message sent");
                Response::ok(json!({
                    "message_id": data.get("ts").cloned().unwrap_or(Value::Null),
                    "topic": params.topic,
                }))
            }
            Err(e) => {
                warn!(error = %e, "Slack send failed");
                Response::failed(ActionError::internal_handler("send message error"))
            }
        }
    }

    async fn get_user_info(&self, req: &Request) -> Response {
        let user_id = match req.require_str("user_id") {
            Ok(u) => u,
            Err(e) => return Response::failed(e),
        };
        result(self.get("users.info", &[("user", user_id)]).await.map(|data| {
            let user = &data["user"];
            json!({
                "user_id": user["id"],
                "user_name": user["name"],
                "user_displayname": user["profile"]["display_name"],
            })
        }))
    }

    async fn create_channel(&self, req: &Request) -> Response {
        let name = match req.require_str("name") {
            Ok(n) => n,
            Err(e) => return Response::failed(e),
        };
        result(
            self.post("conversations.create", json!({"name": name}))
                .await
                .map(|data| json!({"channel_id": data["channel"]["id"]})),
        )
    }

    async fn get_channel_info(&self, req: &Request) -> Response {
        let channel = match req.require_str("channel_id") {
            Ok(c) => c,
            Err(e) => return Response::failed(e),
        };
        result(
            self.get("conversations.info", &[("channel", channel)])
                .await
                .map(|data| {
                    json!({
                        "channel_id": data["channel"]["id"],
                        "channel_name": data["channel"]["name"],
                    })
                }),
        )
    }

    async fn get_channel_list(&self, _req: &Request) -> Response {
        result(self.get("conversations.list", &[]).await.map(|data| {
            let channels: Vec<Value> = data["channels"]
                .as_array()
                .map(|list| {
                    list.iter()
                        .map(|c| json!({"channel_id": c["id"], "channel_name": c["name"]}))
                        .collect()
                })
                .unwrap_or_default();
            Value::Array(channels)
        }))
    }

    async fn update_message(&self, req: &Request) -> Response {
        let (topic, message_id) = match (req.require_str("topic"), req.require_str("message_id")) {
            (Ok(t), Ok(m)) => (t, m),
            (Err(e), _) | (_, Err(e)) => return Response::failed(e),
        };
        let message = match req.params.get("message").cloned().map(Message::from_value) {
            Some(Ok(m)) => m,
            Some(Err(e)) => return Response::failed(e),
            None => return Response::failed(ActionError::bad_param("missing parameter 'message'")),
        };
        result(
            self.post(
                "chat.update",
                json!({"channel": topic, "ts": message_id, "text": render_text(&message)}),
            )
            .await
            .map(|_| Value::Null),
        )
    }

    async fn delete_message(&self, req: &Request) -> Response {
        let (topic, message_id) = match (req.require_str("topic"), req.require_str("message_id")) {
            (Ok(t), Ok(m)) => (t, m),
            (Err(e), _) | (_, Err(e)) => return Response::failed(e),
        };
        result(
            self.post("chat.delete", json!({"channel": topic, "ts": message_id}))
                .await
                .map(|_| Value::Null),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chatflow_core::ErrorCode;
    use chatflow_transport::HttpMethod;
    use chatflow_transport::mock::MockHttpCaller;

    use super::*;

    fn action(mock: Arc<MockHttpCaller>) -> SlackAction {
        SlackAction::new(SlackConfig::new("xoxb-test"), mock)
    }

    #[tokio::test]
    async fn test_send_message_posts_text() {
        let mock = Arc::new(MockHttpCaller::new());
        mock.reply_json(json!({"ok": true, "ts": "123.4"}));
        let slack = action(mock.clone());

        let req = SendMessageParams::new(
            "D1",
            Message::new()
                .with(Segment::text("hi"))
                .with(Segment::url("https://a.b")),
        )
        .into_request();
        let resp = slack.call(&req).await;

        assert!(resp.is_ok());
        assert_eq!(resp.data["message_id"], "123.4");
        let sent = &mock.requests()[0];
        assert_eq!(sent.method, HttpMethod::Post);
        assert!(sent.url.ends_with("/chat.postMessage"));
        assert_eq!(sent.header_value("Authorization"), Some("Bearer xoxb-test"));
        assert_eq!(sent.body.as_ref().unwrap()["text"], "hi\nhttps://a.b");
        assert!(sent.body.as_ref().unwrap().get("blocks").is_none());
    }

    #[tokio::test]
    async fn test_send_message_with_choices_adds_buttons() {
        let mock = Arc::new(MockHttpCaller::new());
        mock.reply_json(json!({"ok": true, "ts": "1"}));
        let slack = action(mock.clone());

        let req = SendMessageParams::new("D1", Message::text("Sure?"))
            .with_seq(42)
            .with_options(vec![ChoiceOption {
                label: "yes".into(),
                value: "42:yes".into(),
            }])
            .into_request();
        assert!(slack.call(&req).await.is_ok());
        let body = mock.requests()[0].body.clone().unwrap();
        assert_eq!(body["blocks"][1]["elements"][0]["value"], "42:yes");
    }

    #[tokio::test]
    async fn test_send_empty_message_skips_platform() {
        let mock = Arc::new(MockHttpCaller::new());
        let slack = action(mock.clone());
        let resp = slack
            .call(&SendMessageParams::new("D1", Message::new()).into_request())
            .await;
        assert!(resp.is_ok());
        assert_eq!(mock.count(), 0);
    }

    #[tokio::test]
    async fn test_send_failure_is_internal_handler() {
        let mock = Arc::new(MockHttpCaller::new());
        mock.reply_json(json!({"ok": false, "error": "channel_not_found"}));
        let slack = action(mock);
        let resp = slack
            .call(&SendMessageParams::new("D1", Message::text("x")).into_request())
            .await;
        assert_eq!(resp.error_code(), Some(ErrorCode::InternalHandler));
        assert_eq!(resp.message, "send message error");
    }

    #[tokio::test]
    async fn test_bad_message_type() {
        let slack = action(Arc::new(MockHttpCaller::new()));
        let req = Request::new(ActionName::SendMessage)
            .with_param("topic", "D1")
            .with_param("message", 12);
        let resp = slack.call(&req).await;
        assert_eq!(resp.error_code(), Some(ErrorCode::BadSegmentType));
    }

    #[tokio::test]
    async fn test_user_info_and_platform_error() {
        let mock = Arc::new(MockHttpCaller::new());
        mock.reply_json(json!({"ok": true, "user": {"id": "U1", "name": "ann", "profile": {"display_name": "Ann"}}}));
        mock.reply_json(json!({"ok": false, "error": "user_not_found"}));
        let slack = action(mock.clone());

        let req = Request::new(ActionName::GetUserInfo).with_param("user_id", "U1");
        let resp = slack.call(&req).await;
        assert_eq!(resp.data["user_displayname"], "Ann");
        assert_eq!(mock.requests()[0].query, vec![("user".to_string(), "U1".to_string())]);

        let resp = slack.call(&req).await;
        assert_eq!(resp.error_code(), Some(ErrorCode::Platform));
        assert_eq!(resp.message, "user_not_found");
    }

    #[tokio::test]
    async fn test_unsupported_capabilities() {
        let slack = action(Arc::new(MockHttpCaller::new()));
        for name in [
            ActionName::RegisterChannels,
            ActionName::RegisterSlashCommands,
            ActionName::GetLatestEvents,
        ] {
            let resp = slack.call(&Request::new(name)).await;
            assert_eq!(resp.error_code(), Some(ErrorCode::UnsupportedAction));
        }
    }
}
