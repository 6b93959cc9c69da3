use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chatflow_core::{
    CommandEventData, Event, EventData, Message, MessageEventData, Payload, detail,
};
use chrono::{DateTime, Utc};
use tracing::{Instrument, debug, info, info_span, warn};

use super::config::DispatchConfig;
use super::metrics::DispatchMetrics;
use crate::bot::BoxedBot;
use crate::context::Ctx;
use crate::error::{BotResult, DispatchError, DispatchResult};
use crate::grammar::tokenize;
use crate::outbox::{Envelope, SharedOutbox};
use crate::registry::SharedRules;
use crate::store::{ActionState, Contact, KeyLocks, SharedStore, StoredContent, StoredMessage};

pub(super) const SESSION_CANCEL: &str = "session cancel";
pub(super) const ERROR_COMMAND: &str = "error command";
pub(super) const ERROR_PIPELINE: &str = "error pipeline";
pub(super) const PIPELINE_DONE: &str = "Pipeline Done";
pub(super) const ACTION_DONE: &str = "done";
pub(super) const ERROR_SESSION: &str = "error session";

const DEDUPE_SCOPE: &str = "message";

/// Precedence step that claimed an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Session,
    Help,
    Action,
    Command,
    Pipeline,
    Condition,
    Input,
    Group,
}

/// Result of dispatching one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Not actionable: empty, meta or notice events, or no ready bot.
    Dropped,
    /// The message id was already dispatched.
    Duplicate,
    /// `Step` produced a payload and it was delivered.
    Replied(Step),
    /// `Step` claimed the event without a reply.
    Silent(Step),
}

/// The rule dispatch engine.
///
/// Holds the frozen rule registry, the store, the outbox and per-key locks.
/// One engine serves every platform; it is shared behind an `Arc` by the
/// runtime and called once per inbound event.
pub struct Engine {
    pub(super) rules: SharedRules,
    pub(super) store: SharedStore,
    pub(super) outbox: SharedOutbox,
    pub(super) locks: KeyLocks,
    pub(super) config: DispatchConfig,
    pub(super) metrics: Arc<DispatchMetrics>,
}

impl Engine {
    pub fn new(rules: SharedRules, store: SharedStore, outbox: SharedOutbox) -> Self {
        Self {
            rules,
            store,
            outbox,
            locks: KeyLocks::new(),
            config: DispatchConfig::default(),
            metrics: Arc::new(DispatchMetrics::new()),
        }
    }

    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn rules(&self) -> &SharedRules {
        &self.rules
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    // =========================================================================
    // Entry
    // =========================================================================

    /// Dispatches one event.
    ///
    /// Handler and lookup failures are logged and never abort the event;
    /// only persistence writes and delivery failures are returned.
    pub async fn handle(&self, event: &Event) -> DispatchResult<Outcome> {
        if event.is_empty() {
            DispatchMetrics::inc(&self.metrics.dropped);
            return Ok(Outcome::Dropped);
        }
        let span = info_span!("dispatch", event_id = %event.id, detail_type = %event.detail_type);
        self.route(event).instrument(span).await
    }

    async fn route(&self, event: &Event) -> DispatchResult<Outcome> {
        match (&event.data, event.detail_type.as_str()) {
            (EventData::Message(data), detail::MESSAGE_DIRECT) => self.on_message(data, true).await,
            (EventData::Message(data), detail::MESSAGE_GROUP | detail::MESSAGE_CHANNEL) => {
                self.on_message(data, false).await
            }
            (EventData::Command(cmd), _) => {
                let data = command_message(&event.id, cmd);
                self.on_message(&data, true).await
            }
            (EventData::Connect(data), _) => {
                info!(
                    platform = %data.self_info.platform,
                    self_id = %data.self_info.user_id,
                    version = %data.version,
                    "Platform connected"
                );
                Ok(Outcome::Dropped)
            }
            _ => {
                debug!("Event not dispatched");
                DispatchMetrics::inc(&self.metrics.dropped);
                Ok(Outcome::Dropped)
            }
        }
    }

    async fn on_message(&self, data: &MessageEventData, direct: bool) -> DispatchResult<Outcome> {
        let dedupe_key = (!data.message_id.is_empty())
            .then(|| format!("{}:{}", data.self_info.platform, data.message_id));
        if let Some(key) = &dedupe_key {
            match self.store.first_seen(DEDUPE_SCOPE, key).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(message_id = %data.message_id, "Duplicate message dropped");
                    DispatchMetrics::inc(&self.metrics.duplicate);
                    return Ok(Outcome::Duplicate);
                }
                Err(e) => warn!(error = %e, "Message dedupe failed"),
            }
        }

        let result = self.on_new_message(data, direct).await;
        // A reply that never reached the platform must not block redelivery.
        if let (Err(DispatchError::Delivery { .. }), Some(key)) = (&result, &dedupe_key) {
            if let Err(e) = self.store.forget(DEDUPE_SCOPE, key).await {
                warn!(error = %e, "Failed to release message id");
            }
        }
        result
    }

    async fn on_new_message(&self, data: &MessageEventData, direct: bool) -> DispatchResult<Outcome> {
        if self.rules.ready_bots().next().is_none() {
            warn!(platform = %data.self_info.platform, "No ready bot, dropping message");
            DispatchMetrics::inc(&self.metrics.dropped);
            return Ok(Outcome::Dropped);
        }

        let ctx = Ctx::from_message(data, self.rules.clone());
        let text = message_text(data);
        if direct {
            self.direct(&ctx, data, &text).await
        } else {
            self.group(&ctx, data, &text).await
        }
    }

    // =========================================================================
    // Precedence
    // =========================================================================

    async fn direct(&self, ctx: &Ctx, data: &MessageEventData, text: &str) -> DispatchResult<Outcome> {
        let _guard = self.locks.lock(ctx.uid(), ctx.topic()).await;

        let contact = Contact::new(ctx.platform(), ctx.uid(), ctx.topic());
        if let Err(e) = self.store.record_contact(contact).await {
            warn!(error = %e, "Failed to record contact");
        }

        if let Some(session) = self.load_session(ctx.uid(), ctx.topic()).await {
            if session.is_active() {
                return self.run_session(ctx, session, text).await;
            }
        }

        if self.config.is_help(text) {
            let help = Payload::info("Help", self.rules.command_help());
            return self.reply(ctx, Some(help), Step::Help).await;
        }
        if text.eq_ignore_ascii_case("~help") {
            let help = Payload::info("Pipeline", self.rules.pipeline_help());
            return self.reply(ctx, Some(help), Step::Help).await;
        }

        if let (true, Some(option)) = (data.seq > 0, data.option.as_deref()) {
            if let Some(outcome) = self.run_action(ctx, data.seq, option).await? {
                return Ok(outcome);
            }
        }

        if let Some(rest) = text.strip_prefix('/') {
            return self.run_command(ctx, rest).await;
        }
        if let Some(rest) = text.strip_prefix('~') {
            return self.trigger_pipeline(ctx, rest).await;
        }

        if let Some(outcome) = self.run_condition(ctx, data).await? {
            return Ok(outcome);
        }

        self.run_input(ctx, text).await
    }

    async fn group(&self, ctx: &Ctx, data: &MessageEventData, text: &str) -> DispatchResult<Outcome> {
        if let Some(outcome) = self.run_condition(ctx, data).await? {
            return Ok(outcome);
        }

        let Some(bot) = self.input_bot() else {
            DispatchMetrics::inc(&self.metrics.dropped);
            return Ok(Outcome::Dropped);
        };
        DispatchMetrics::inc(&self.metrics.group);
        match bot.group(&ctx.for_bot(bot.name()), text).await {
            Ok(payload) => self.reply(ctx, payload, Step::Group).await,
            Err(e) => {
                warn!(bot = %bot.name(), topic = %ctx.topic(), error = %e, "Group handler failed");
                Ok(Outcome::Silent(Step::Group))
            }
        }
    }

    async fn run_action(&self, ctx: &Ctx, seq: i64, option: &str) -> DispatchResult<Option<Outcome>> {
        let stored = match self.store.get_message(ctx.topic(), seq).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                debug!(topic = %ctx.topic(), seq, "Action callback for unknown message");
                return Ok(None);
            }
            Err(e) => {
                warn!(topic = %ctx.topic(), seq, error = %e, "Stored message lookup failed");
                return Ok(None);
            }
        };
        let Some(rule_id) = stored.action_id() else {
            return Ok(None);
        };
        let Some((bot, rule)) = self.rules.action(rule_id) else {
            warn!(rule = %rule_id, "Action rule not registered");
            return Ok(None);
        };
        if !bot.is_ready() {
            return Ok(None);
        }

        let state = self
            .store
            .get_action_state(ctx.topic(), seq)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Action state lookup failed");
                None
            });
        if state == Some(ActionState::SubmitSuccess) && !rule.long_term {
            DispatchMetrics::inc(&self.metrics.action);
            return self
                .reply(ctx, Some(Payload::text(ACTION_DONE)), Step::Action)
                .await
                .map(Some);
        }

        let Some(handler) = rule.handler(option) else {
            debug!(rule = %rule.id, option, "Unknown action option");
            return Ok(None);
        };
        let payload = match handler(&ctx.for_bot(bot.name())) {
            Ok(Some(payload)) => payload,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(bot = %bot.name(), rule = %rule.id, option, error = %e, "Action handler failed");
                return Ok(None);
            }
        };

        DispatchMetrics::inc(&self.metrics.action);
        self.deliver(ctx, payload, BTreeMap::new()).await?;

        let state = if rule.long_term {
            ActionState::LongTerm
        } else {
            ActionState::SubmitSuccess
        };
        if let Err(e) = self.store.set_action_state(ctx.topic(), seq, state).await {
            warn!(error = %e, "Failed to record action state");
        }
        if let Some((flag, version)) = stored.pipeline_ref() {
            self.continue_pipeline(ctx, &flag, version).await;
        }
        Ok(Some(Outcome::Replied(Step::Action)))
    }

    async fn run_command(&self, ctx: &Ctx, text: &str) -> DispatchResult<Outcome> {
        DispatchMetrics::inc(&self.metrics.command);
        let payload = match self.match_command(ctx, None, text) {
            Some(Ok(payload)) => payload,
            Some(Err(e)) => {
                warn!(topic = %ctx.topic(), error = %e, "Command handler failed");
                None
            }
            None => {
                debug!(text, "No command matched");
                None
            }
        };
        let payload = payload.unwrap_or_else(|| Payload::text(ERROR_COMMAND));
        self.reply(ctx, Some(payload), Step::Command).await
    }

    /// Runs the first command whose grammar accepts `text`.
    ///
    /// Registration order decides ties. `bot` restricts the search to one
    /// bot. Returns `None` when nothing matched.
    pub(super) fn match_command(
        &self,
        ctx: &Ctx,
        bot: Option<&str>,
        text: &str,
    ) -> Option<BotResult<Option<Payload>>> {
        let tokens = tokenize(text);
        self.rules
            .commands()
            .filter(|(b, _)| b.is_ready() && bot.is_none_or(|name| b.name() == name))
            .find_map(|(b, cmd)| {
                let args = cmd.grammar.match_tokens(&tokens)?;
                debug!(bot = %b.name(), define = %cmd.grammar.define(), "Command matched");
                Some((cmd.rule.handler)(&ctx.for_bot(b.name()), &args))
            })
    }

    async fn run_condition(&self, ctx: &Ctx, data: &MessageEventData) -> DispatchResult<Option<Outcome>> {
        let Some((uid, seq)) = data.forwarded_ref() else {
            return Ok(None);
        };
        let stored = match self.store.get_message_by_uid(&uid, seq).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                debug!(%uid, seq, "Forwarded message not found");
                return Ok(None);
            }
            Err(e) => {
                warn!(%uid, seq, error = %e, "Forwarded message lookup failed");
                return Ok(None);
            }
        };
        let payload = match Payload::from_parts(&stored.content.tye, stored.content.src.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(tye = %stored.content.tye, error = %e, "Forwarded payload is malformed");
                return Ok(None);
            }
        };
        let Some((bot, rule)) = self.rules.conditions(payload.tye()).find(|(b, _)| b.is_ready()) else {
            debug!(tye = %payload.tye(), "No condition for payload type");
            return Ok(None);
        };

        DispatchMetrics::inc(&self.metrics.condition);
        match (rule.handler)(&ctx.for_bot(bot.name()), &payload) {
            Ok(Some(reply)) => self.reply(ctx, Some(reply), Step::Condition).await.map(Some),
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(bot = %bot.name(), tye = %rule.tye, error = %e, "Condition handler failed");
                Ok(None)
            }
        }
    }

    async fn run_input(&self, ctx: &Ctx, text: &str) -> DispatchResult<Outcome> {
        let Some(bot) = self.input_bot() else {
            warn!(input_bot = ?self.config.input_bot, "Input bot is not ready");
            DispatchMetrics::inc(&self.metrics.dropped);
            return Ok(Outcome::Dropped);
        };
        DispatchMetrics::inc(&self.metrics.input);
        match bot.input(&ctx.for_bot(bot.name()), text).await {
            Ok(payload) => self.reply(ctx, payload, Step::Input).await,
            Err(e) => {
                warn!(bot = %bot.name(), topic = %ctx.topic(), error = %e, "Input handler failed");
                Ok(Outcome::Silent(Step::Input))
            }
        }
    }

    fn input_bot(&self) -> Option<&BoxedBot> {
        match &self.config.input_bot {
            Some(name) => self.rules.bot(name).filter(|b| b.is_ready()),
            None => self.rules.ready_bots().next(),
        }
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    pub(super) async fn reply(&self, ctx: &Ctx, payload: Option<Payload>, step: Step) -> DispatchResult<Outcome> {
        match payload {
            Some(payload) => {
                self.deliver(ctx, payload, BTreeMap::new()).await?;
                Ok(Outcome::Replied(step))
            }
            None => Ok(Outcome::Silent(step)),
        }
    }

    /// Persists an outbound payload and builds its envelope.
    ///
    /// The payload is stored with the next `seq` of the topic; a `session`
    /// payload also starts that session for the context's user.
    pub async fn record(
        &self,
        ctx: &Ctx,
        payload: Payload,
        head: BTreeMap<String, String>,
    ) -> DispatchResult<Envelope> {
        let (tye, src) = payload.to_parts();
        let content = StoredContent {
            text: payload.to_message().alt_text(),
            tye,
            src,
        };
        let stored = StoredMessage::new(ctx.platform(), ctx.uid(), ctx.topic(), content).with_head(head.clone());
        let pipeline = stored.pipeline_ref();
        let seq = self.store.save_message(stored).await?;

        if let Payload::Session { id, .. } = &payload {
            if let Err(e) = self.start_session(ctx, id, pipeline).await {
                warn!(rule = %id, error = %e, "Session not started");
            }
        }

        Ok(Envelope::new(ctx.self_info().clone(), ctx.uid(), ctx.topic(), payload)
            .with_seq(seq)
            .with_head(head))
    }

    /// Records and sends a payload through the outbox.
    pub async fn send(&self, ctx: &Ctx, payload: Payload) -> DispatchResult<i64> {
        self.deliver(ctx, payload, BTreeMap::new()).await
    }

    pub(super) async fn deliver(
        &self,
        ctx: &Ctx,
        payload: Payload,
        head: BTreeMap<String, String>,
    ) -> DispatchResult<i64> {
        let envelope = self.record(ctx, payload, head).await?;
        let seq = envelope.seq;
        self.outbox.send(envelope).await?;
        Ok(seq)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("rules", &self.rules)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn message_text(data: &MessageEventData) -> String {
    let text = if data.alt_message.trim().is_empty() {
        data.message.alt_text()
    } else {
        data.alt_message.clone()
    };
    text.trim().to_string()
}

fn command_message(event_id: &str, cmd: &CommandEventData) -> MessageEventData {
    let text = format!("/{} {}", cmd.command.trim_start_matches('/'), cmd.text)
        .trim_end()
        .to_string();
    MessageEventData {
        self_info: cmd.self_info.clone(),
        message_id: event_id.to_string(),
        message: Message::text(text.clone()),
        alt_message: text,
        user_id: cmd.user_id.clone(),
        topic_id: cmd.topic_id.clone(),
        topic_type: cmd.topic_type,
        ..Default::default()
    }
}

/// Whether a record last touched at `updated_at` outlived `ttl`.
pub(super) fn expired(updated_at: DateTime<Utc>, ttl: Option<Duration>) -> bool {
    ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok())
        .is_some_and(|ttl| Utc::now() - updated_at > ttl)
}

/// Header tagging a message with its pipeline stage.
pub(super) fn pipeline_head(flag: &str, version: u32) -> BTreeMap<String, String> {
    BTreeMap::from([
        (crate::store::HEAD_PIPELINE_FLAG.to_string(), flag.to_string()),
        (crate::store::HEAD_PIPELINE_VERSION.to_string(), version.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use chatflow_core::{CommandEventData, SelfInfo, TopicType};
    use serde_json::json;
    use tokio_test::assert_ok;

    use super::*;
    use crate::dispatch::testing::{Harness, PLATFORM, TestBot, dev_rules, direct, message, src_url};
    use crate::store::{
        HEAD_PIPELINE_FLAG, HEAD_PIPELINE_VERSION, PipelineRecord, PipelineState, SessionRecord,
        SessionState, Store,
    };

    fn filler() -> StoredMessage {
        StoredMessage::new(PLATFORM, "u1", "t1", StoredContent::default())
    }

    fn callback(seq: i64, option: &str) -> Event {
        let mut data = message("");
        data.seq = seq;
        data.option = Some(option.to_string());
        Event::direct(data)
    }

    #[tokio::test]
    async fn test_version_command() {
        let h = Harness::new();
        let outcome = h.engine.handle(&direct("/version")).await.unwrap();
        assert_eq!(outcome, Outcome::Replied(Step::Command));
        assert_eq!(
            h.outbox.texts(),
            [format!("chatflow {}", env!("CARGO_PKG_VERSION"))]
        );
        assert_eq!(h.engine.metrics().snapshot().bot_run_command_total, 1);
    }

    #[tokio::test]
    async fn test_command_tie_break_is_registration_order() {
        let h = Harness::new();
        h.engine.handle(&direct("/foo bar")).await.unwrap();
        h.engine.handle(&direct("/foo baz")).await.unwrap();
        assert_eq!(h.outbox.texts(), ["first", "second"]);
    }

    #[tokio::test]
    async fn test_command_without_payload_replies_error() {
        let h = Harness::new();
        h.engine.handle(&direct("/nothing")).await.unwrap();
        h.engine.handle(&direct("/unknown thing")).await.unwrap();
        h.engine.handle(&direct("/add 2 x")).await.unwrap();
        assert_eq!(h.outbox.texts(), [ERROR_COMMAND, ERROR_COMMAND, ERROR_COMMAND]);
        assert_eq!(h.bot.inputs(), 0);
    }

    #[tokio::test]
    async fn test_session_takes_precedence_over_command() {
        let h = Harness::new();
        h.engine.handle(&direct("/todo")).await.unwrap();
        let session = h.store.get_session("u1", "t1").await.unwrap().unwrap();
        assert_eq!(session.state, SessionState::Start);

        let outcome = h.engine.handle(&direct("/version")).await.unwrap();
        assert_eq!(outcome, Outcome::Replied(Step::Session));
        let snap = h.engine.metrics().snapshot();
        assert_eq!(snap.bot_run_command_total, 1);
        assert_eq!(snap.bot_run_session_total, 1);
        assert_eq!(h.bot.inputs(), 0);

        let session = h.store.get_session("u1", "t1").await.unwrap().unwrap();
        assert_eq!(session.last_values["last"], "/version");

        h.engine.handle(&direct("done")).await.unwrap();
        assert!(h.store.get_session("u1", "t1").await.unwrap().is_none());
        assert_eq!(h.outbox.texts(), ["What to do?", "noted /version", "saved"]);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let h = Harness::new();
        h.engine.handle(&direct("/todo")).await.unwrap();

        let outcome = h.engine.handle(&direct("cancel")).await.unwrap();
        assert_eq!(outcome, Outcome::Replied(Step::Session));
        let session = h.store.get_session("u1", "t1").await.unwrap().unwrap();
        assert_eq!(session.state, SessionState::Cancel);

        let outcome = h.engine.handle(&direct("cancel")).await.unwrap();
        assert_eq!(outcome, Outcome::Replied(Step::Input));
        let texts = h.outbox.texts();
        assert_eq!(texts.iter().filter(|t| *t == SESSION_CANCEL).count(), 1);
        assert_eq!(texts.last().unwrap(), "echo: cancel");

        // A cancelled session may be replaced.
        h.engine.handle(&direct("/todo")).await.unwrap();
        let session = h.store.get_session("u1", "t1").await.unwrap().unwrap();
        assert_eq!(session.state, SessionState::Start);
    }

    #[tokio::test]
    async fn test_session_already_started_is_rejected() {
        let h = Harness::new();
        let ctx = h.ctx();
        assert_ok!(h.engine.start_session(&ctx, "todo", None).await);
        let err = h.engine.start_session(&ctx, "todo", None).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::DispatchError::Store(crate::error::StoreError::SessionAlreadyStarted { .. })
        ));
        assert!(h.engine.start_session(&ctx, "missing", None).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_session_is_ignored() {
        let config = DispatchConfig {
            session_ttl_secs: Some(60),
            ..Default::default()
        };
        let h = Harness::with(TestBot::new("dev", dev_rules()), config);
        let mut record = SessionRecord::start("u1", "t1", "todo");
        record.updated_at = Utc::now() - chrono::Duration::seconds(120);
        h.store.set_session(record).await.unwrap();

        let outcome = h.engine.handle(&direct("hello")).await.unwrap();
        assert_eq!(outcome, Outcome::Replied(Step::Input));
        assert!(h.store.get_session("u1", "t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_action_callback_continues_pipeline() {
        let h = Harness::new();
        for _ in 0..41 {
            h.store.save_message(filler()).await.unwrap();
        }
        let (tye, src) = Payload::action("confirm_action", "Sure?", ["yes", "no"]).to_parts();
        let prompt = StoredMessage::new(PLATFORM, "u1", "t1", StoredContent {
            text: "Sure?".into(),
            tye,
            src,
        })
        .with_head(pipeline_head("f1", 2));
        assert_eq!(h.store.save_message(prompt).await.unwrap(), 42);
        h.store
            .set_pipeline(
                PipelineRecord {
                    uid: "u1".into(),
                    topic: "t1".into(),
                    flag: "f1".into(),
                    rule_id: "share".into(),
                    stage: 1,
                    version: 2,
                    state: PipelineState::Running,
                    trigger: "share hello".into(),
                    updated_at: Utc::now(),
                },
                None,
            )
            .await
            .unwrap();

        let outcome = h.engine.handle(&callback(42, "yes")).await.unwrap();
        assert_eq!(outcome, Outcome::Replied(Step::Action));
        assert_eq!(h.outbox.texts(), ["confirmed", "Publish?\n[yes]"]);

        let progress = h.store.get_pipeline("u1", "t1", "f1").await.unwrap().unwrap();
        assert_eq!(progress.stage, 2);
        assert_eq!(progress.version, 3);
        let last = h.outbox.last().unwrap();
        assert_eq!(last.head[HEAD_PIPELINE_VERSION], "3");

        let snap = h.engine.metrics().snapshot();
        assert_eq!(snap.bot_run_action_total, 1);
        assert_eq!(snap.bot_run_command_total, 0);
        assert_eq!(snap.bot_run_condition_total, 0);
        assert_eq!(h.bot.inputs(), 0);
    }

    #[tokio::test]
    async fn test_action_without_payload_falls_through() {
        let h = Harness::new();
        let ctx = h.ctx();
        let seq = h
            .engine
            .send(&ctx, Payload::action("confirm_action", "Sure?", ["yes", "no"]))
            .await
            .unwrap();

        let outcome = h.engine.handle(&callback(seq, "no")).await.unwrap();
        assert_eq!(outcome, Outcome::Replied(Step::Input));
        assert_eq!(h.bot.inputs(), 1);
    }

    #[tokio::test]
    async fn test_answered_action_replies_done() {
        let h = Harness::new();
        let ctx = h.ctx();
        let seq = h
            .engine
            .send(&ctx, Payload::action("confirm_action", "Sure?", ["yes", "no"]))
            .await
            .unwrap();
        h.engine.handle(&callback(seq, "yes")).await.unwrap();
        h.engine.handle(&callback(seq, "yes")).await.unwrap();

        let seq = h
            .engine
            .send(&ctx, Payload::action("publish_action", "Publish?", ["yes"]))
            .await
            .unwrap();
        h.engine.handle(&callback(seq, "yes")).await.unwrap();
        h.engine.handle(&callback(seq, "yes")).await.unwrap();

        let texts = h.outbox.texts();
        assert_eq!(
            &texts[1..],
            ["confirmed", ACTION_DONE, "Publish?\n[yes]", "published", "published"]
        );
    }

    #[tokio::test]
    async fn test_pipeline_trigger_tags_first_stage() {
        let h = Harness::new();
        let outcome = h.engine.handle(&direct("~share hello")).await.unwrap();
        assert_eq!(outcome, Outcome::Replied(Step::Pipeline));

        let envelope = h.outbox.last().unwrap();
        let flag = envelope.head[HEAD_PIPELINE_FLAG].clone();
        assert!(!flag.is_empty());
        assert_eq!(envelope.head[HEAD_PIPELINE_VERSION], "1");
        assert_eq!(envelope.payload.tye(), "action");

        let progress = h.store.get_pipeline("u1", "t1", &flag).await.unwrap().unwrap();
        assert_eq!(progress.stage, 0);
        assert_eq!(progress.version, 1);
        assert_eq!(progress.trigger, "share hello");

        h.engine.handle(&direct("~share")).await.unwrap();
        h.engine.handle(&direct("~nope")).await.unwrap();
        let texts = h.outbox.texts();
        assert_eq!(&texts[1..], [ERROR_PIPELINE, ERROR_PIPELINE]);
    }

    #[tokio::test]
    async fn test_stale_pipeline_version_is_rejected() {
        let h = Harness::new();
        h.engine.handle(&direct("~share hello")).await.unwrap();
        let flag = h.outbox.last().unwrap().head[HEAD_PIPELINE_FLAG].clone();
        let ctx = h.ctx();

        assert!(h.engine.advance_pipeline(&ctx, &flag, 0).await.is_err());
        assert_ok!(h.engine.advance_pipeline(&ctx, &flag, 1).await);
        let err = h.engine.advance_pipeline(&ctx, &flag, 1).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::DispatchError::Store(crate::error::StoreError::VersionConflict {
                expected: 2,
                found: 1,
                ..
            })
        ));

        let progress = h.store.get_pipeline("u1", "t1", &flag).await.unwrap().unwrap();
        assert_eq!(progress.stage, 1);

        assert_ok!(h.engine.advance_pipeline(&ctx, &flag, 2).await);
        assert_ok!(h.engine.advance_pipeline(&ctx, &flag, 3).await);
        let progress = h.store.get_pipeline("u1", "t1", &flag).await.unwrap().unwrap();
        assert_eq!(progress.state, PipelineState::Done);
        assert_eq!(progress.stage, 3);
        assert_eq!(h.outbox.texts().last().unwrap(), PIPELINE_DONE);
    }

    #[tokio::test]
    async fn test_pipeline_session_stage_resumes_on_done() {
        let h = Harness::new();
        h.engine.handle(&direct("~survey")).await.unwrap();
        let session = h.store.get_session("u1", "t1").await.unwrap().unwrap();
        assert!(session.pipeline.is_some());

        h.engine.handle(&direct("milk")).await.unwrap();
        h.engine.handle(&direct("done")).await.unwrap();
        assert_eq!(
            h.outbox.texts(),
            ["welcome", "What to do?", "noted milk", "saved", "Tell me\n1. name", PIPELINE_DONE]
        );
    }

    #[tokio::test]
    async fn test_forwarded_message_runs_condition() {
        let h = Harness::new();
        for _ in 0..16 {
            h.store
                .save_message(StoredMessage::new(PLATFORM, "u1", "t0", StoredContent::default()))
                .await
                .unwrap();
        }
        let bookmark = StoredMessage::new(PLATFORM, "u1", "t0", StoredContent {
            text: "a link".into(),
            tye: "bookmark".into(),
            src: src_url("https://example.com"),
        });
        assert_eq!(h.store.save_message(bookmark).await.unwrap(), 17);

        let mut data = message("look at this");
        data.forwarded = Some("u1:17".into());
        let outcome = h.engine.handle(&Event::direct(data)).await.unwrap();
        assert_eq!(outcome, Outcome::Replied(Step::Condition));
        assert_eq!(h.outbox.texts(), ["bookmarked https://example.com"]);

        let mut data = message("dangling");
        data.forwarded = Some("u1:99".into());
        let outcome = h.engine.handle(&Event::direct(data)).await.unwrap();
        assert_eq!(outcome, Outcome::Replied(Step::Input));
    }

    #[tokio::test]
    async fn test_input_runs_exactly_once() {
        let h = Harness::new();
        let outcome = h.engine.handle(&direct("hello there")).await.unwrap();
        assert_eq!(outcome, Outcome::Replied(Step::Input));
        assert_eq!(h.bot.inputs(), 1);
        assert_eq!(h.outbox.texts(), ["echo: hello there"]);
    }

    #[tokio::test]
    async fn test_input_error_sends_nothing() {
        let mut bot = TestBot::new("dev", dev_rules());
        bot.fail_input = true;
        let h = Harness::with(bot, DispatchConfig::default());
        let outcome = h.engine.handle(&direct("hello")).await.unwrap();
        assert_eq!(outcome, Outcome::Silent(Step::Input));
        assert_eq!(h.bot.inputs(), 1);
        assert!(h.outbox.texts().is_empty());
    }

    #[tokio::test]
    async fn test_help_listings() {
        let h = Harness::new();
        h.engine.handle(&direct("help")).await.unwrap();
        h.engine.handle(&direct("~help")).await.unwrap();
        let sent = h.outbox.sent.lock().clone();
        match &sent[0].payload {
            Payload::Info { title, model } => {
                assert_eq!(title, "Help");
                assert_eq!(model["[dev] /version"], "show version");
            }
            other => panic!("unexpected payload {other:?}"),
        }
        match &sent[1].payload {
            Payload::Info { title, model } => {
                assert_eq!(title, "Pipeline");
                assert!(model.contains_key("~share [string]"));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_message_is_dropped() {
        let h = Harness::new();
        let event = direct("/version");
        h.engine.handle(&event).await.unwrap();
        assert_eq!(h.engine.handle(&event).await.unwrap(), Outcome::Duplicate);
        assert_eq!(h.outbox.texts().len(), 1);
        assert_eq!(h.engine.metrics().snapshot().duplicate_total, 1);
    }

    #[tokio::test]
    async fn test_group_message_skips_direct_steps() {
        let h = Harness::new();
        let mut data = message("/version");
        data.topic_type = TopicType::Group;
        let outcome = h.engine.handle(&Event::group(data)).await.unwrap();
        assert_eq!(outcome, Outcome::Replied(Step::Group));
        assert_eq!(h.outbox.texts(), ["group: /version"]);
        assert!(h.store.contacts().await.unwrap().is_empty());
    }

    fn forwarded_group(text: &str, reference: &str) -> Event {
        let mut data = message(text);
        data.topic_type = TopicType::Group;
        data.forwarded = Some(reference.into());
        Event::group(data)
    }

    #[tokio::test]
    async fn test_group_forward_runs_condition_before_group() {
        let h = Harness::new();
        let bookmark = StoredMessage::new(PLATFORM, "u1", "t0", StoredContent {
            text: "a link".into(),
            tye: "bookmark".into(),
            src: src_url("https://example.com"),
        });
        let seq = h.store.save_message(bookmark).await.unwrap();

        let outcome = h
            .engine
            .handle(&forwarded_group("saving", &format!("u1:{seq}")))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Replied(Step::Condition));
        assert_eq!(h.outbox.texts(), ["bookmarked https://example.com"]);
        let snap = h.engine.metrics().snapshot();
        assert_eq!(snap.bot_run_condition_total, 1);
        assert_eq!(snap.bot_run_group_total, 0);
    }

    #[tokio::test]
    async fn test_group_condition_without_reply_falls_through_to_group() {
        let h = Harness::new();
        let quiet = StoredMessage::new(PLATFORM, "u1", "t0", StoredContent {
            text: "psst".into(),
            tye: "quiet".into(),
            src: json!({}),
        });
        let seq = h.store.save_message(quiet).await.unwrap();

        let outcome = h
            .engine
            .handle(&forwarded_group("hush", &format!("u1:{seq}")))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Replied(Step::Group));
        assert_eq!(h.outbox.texts(), ["group: hush"]);
        let snap = h.engine.metrics().snapshot();
        assert_eq!(snap.bot_run_condition_total, 1);
        assert_eq!(snap.bot_run_group_total, 1);
    }

    #[tokio::test]
    async fn test_failed_delivery_allows_redelivery() {
        let h = Harness::new();
        let event = direct("/version");

        h.outbox.offline.store(true, std::sync::atomic::Ordering::SeqCst);
        let err = h.engine.handle(&event).await.unwrap_err();
        assert!(matches!(err, DispatchError::Delivery { .. }));

        h.outbox.offline.store(false, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(h.engine.handle(&event).await.unwrap(), Outcome::Replied(Step::Command));
        assert_eq!(h.engine.handle(&event).await.unwrap(), Outcome::Duplicate);
        assert_eq!(h.outbox.texts().len(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_session_rule_replies_error() {
        let h = Harness::new();
        h.store
            .set_session(SessionRecord::start("u1", "t1", "vanished"))
            .await
            .unwrap();

        let outcome = h.engine.handle(&direct("anything")).await.unwrap();
        assert_eq!(outcome, Outcome::Replied(Step::Session));
        assert_eq!(h.outbox.texts(), [ERROR_SESSION]);
        assert!(h.store.get_session("u1", "t1").await.unwrap().is_none());
        assert_eq!(h.bot.inputs(), 0);
    }

    #[tokio::test]
    async fn test_command_event_dispatches_as_text() {
        let h = Harness::new();
        let event = Event::command(CommandEventData {
            self_info: SelfInfo::new(PLATFORM, "B1"),
            command: "/add".into(),
            text: "2 3".into(),
            user_id: "u1".into(),
            topic_id: "t1".into(),
            topic_type: TopicType::Dm,
        });
        let outcome = h.engine.handle(&event).await.unwrap();
        assert_eq!(outcome, Outcome::Replied(Step::Command));
        assert_eq!(h.outbox.texts(), ["5"]);
        assert_eq!(h.store.contacts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_not_ready_bot_drops_event() {
        let mut bot = TestBot::new("dev", dev_rules());
        bot.ready = false;
        let h = Harness::with(bot, DispatchConfig::default());
        assert_eq!(h.engine.handle(&direct("/version")).await.unwrap(), Outcome::Dropped);
        assert_eq!(h.engine.handle(&Event::empty()).await.unwrap(), Outcome::Dropped);
        assert_eq!(h.engine.metrics().snapshot().dropped_total, 2);
        assert!(h.outbox.texts().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_turns_for_one_user() {
        let h = std::sync::Arc::new(Harness::new());
        h.engine.handle(&direct("/todo")).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..8 {
            let h = h.clone();
            tasks.push(tokio::spawn(async move {
                h.engine.handle(&direct(&format!("item {i}"))).await.unwrap()
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), Outcome::Replied(Step::Session));
        }
        assert_eq!(h.engine.metrics().snapshot().bot_run_session_total, 8);
    }
}
