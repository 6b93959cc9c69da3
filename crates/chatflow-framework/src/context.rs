//! Handler context.
//!
//! A [`Ctx`] describes who a handler is acting for: the platform, the
//! user and topic of the inbound message, and the bot whose rule is being
//! run. It is cheap to clone; the rule registry is shared behind an `Arc`.

use std::sync::Arc;

use chatflow_core::{MessageEventData, SelfInfo, TopicType};
use chrono::{DateTime, Utc};

use crate::registry::RuleRegistry;

/// Context passed to every rule handler.
#[derive(Clone)]
pub struct Ctx {
    self_info: SelfInfo,
    uid: String,
    topic: String,
    topic_type: TopicType,
    message_id: String,
    bot: String,
    head: Option<Arc<MessageEventData>>,
    rules: Arc<RuleRegistry>,
    now: DateTime<Utc>,
}

impl Ctx {
    /// Builds a context for an inbound message.
    pub fn from_message(data: &MessageEventData, rules: Arc<RuleRegistry>) -> Self {
        Self {
            self_info: data.self_info.clone(),
            uid: data.user_id.clone(),
            topic: data.topic_id.clone(),
            topic_type: data.topic_type,
            message_id: data.message_id.clone(),
            bot: String::new(),
            head: Some(Arc::new(data.clone())),
            rules,
            now: Utc::now(),
        }
    }

    /// Builds a context with no inbound message, e.g. for scheduled rules.
    pub fn detached(
        self_info: SelfInfo,
        uid: impl Into<String>,
        topic: impl Into<String>,
        rules: Arc<RuleRegistry>,
    ) -> Self {
        Self {
            self_info,
            uid: uid.into(),
            topic: topic.into(),
            topic_type: TopicType::Dm,
            message_id: String::new(),
            bot: String::new(),
            head: None,
            rules,
            now: Utc::now(),
        }
    }

    /// Returns a copy scoped to `bot`.
    pub fn for_bot(&self, bot: &str) -> Self {
        let mut ctx = self.clone();
        ctx.bot = bot.to_string();
        ctx
    }

    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn platform(&self) -> &str {
        &self.self_info.platform
    }

    pub fn self_info(&self) -> &SelfInfo {
        &self.self_info
    }

    /// The user the handler acts for.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn topic_type(&self) -> TopicType {
        self.topic_type
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Name of the bot whose rule is running; empty outside a bot.
    pub fn bot(&self) -> &str {
        &self.bot
    }

    /// The inbound message, if any.
    pub fn head(&self) -> Option<&MessageEventData> {
        self.head.as_deref()
    }

    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

impl std::fmt::Debug for Ctx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ctx")
            .field("platform", &self.self_info.platform)
            .field("uid", &self.uid)
            .field("topic", &self.topic)
            .field("bot", &self.bot)
            .finish_non_exhaustive()
    }
}
