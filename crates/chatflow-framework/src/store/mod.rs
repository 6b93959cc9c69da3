//! Persistence.
//!
//! The engine keeps its state behind the [`Store`] trait:
//!
//! | Record | Key | Written by |
//! |--------|-----|------------|
//! | [`SessionRecord`] | `(uid, topic)` | session start, turns, cancel |
//! | [`PipelineRecord`] | `(uid, topic, flag)` | trigger and continuation |
//! | [`StoredMessage`] | `(topic, seq)` | every outbound payload |
//! | [`ActionState`] | `(topic, seq)` | action callbacks |
//! | [`Contact`] | `(platform, uid, topic)` | direct messages |
//!
//! Read-modify-write sequences for one `(uid, topic)` run under
//! [`KeyLocks`]; pipeline writes additionally check the stored version so a
//! stale continuation is rejected even without the lock.

mod lock;
mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub use lock::KeyLocks;
pub use memory::{DEFAULT_SEEN_CAPACITY, MemoryStore};

use crate::error::StoreResult;

/// Header key carrying the pipeline flag of an outbound message.
pub const HEAD_PIPELINE_FLAG: &str = "x-pipeline-flag";
/// Header key carrying the pipeline version of an outbound message.
pub const HEAD_PIPELINE_VERSION: &str = "x-pipeline-version";

// =============================================================================
// Records
// =============================================================================

/// Session states. An absent record is the idle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Start,
    Cancel,
}

/// A session for one `(uid, topic)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub uid: String,
    pub topic: String,
    pub rule_id: String,
    pub state: SessionState,
    pub init_values: Value,
    pub last_values: Value,
    /// `(flag, version)` of the pipeline stage that opened the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<(String, u32)>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// A freshly started session.
    pub fn start(uid: impl Into<String>, topic: impl Into<String>, rule_id: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            topic: topic.into(),
            rule_id: rule_id.into(),
            state: SessionState::Start,
            init_values: json!({ "val": null }),
            last_values: Value::Null,
            pipeline: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Start
    }
}

/// Pipeline progress states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Running,
    Done,
}

/// Progress of one pipeline instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRecord {
    pub uid: String,
    pub topic: String,
    pub flag: String,
    pub rule_id: String,
    pub stage: usize,
    pub version: u32,
    pub state: PipelineState,
    /// Text that triggered the pipeline.
    pub trigger: String,
    pub updated_at: DateTime<Utc>,
}

/// Content of a stored message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredContent {
    /// Plain-text rendering.
    pub text: String,
    /// Payload type tag.
    pub tye: String,
    /// Payload body.
    pub src: Value,
}

/// A previously sent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub topic: String,
    /// Assigned by [`Store::save_message`].
    pub seq: i64,
    pub uid: String,
    pub platform: String,
    pub content: StoredContent,
    #[serde(default)]
    pub head: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn new(
        platform: impl Into<String>,
        uid: impl Into<String>,
        topic: impl Into<String>,
        content: StoredContent,
    ) -> Self {
        Self {
            topic: topic.into(),
            seq: 0,
            uid: uid.into(),
            platform: platform.into(),
            content,
            head: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_head(mut self, head: BTreeMap<String, String>) -> Self {
        self.head = head;
        self
    }

    /// Pipeline `(flag, version)` carried in the header, if any.
    pub fn pipeline_ref(&self) -> Option<(String, u32)> {
        let flag = self.head.get(HEAD_PIPELINE_FLAG).filter(|f| !f.is_empty())?;
        let version = self.head.get(HEAD_PIPELINE_VERSION)?.parse().ok()?;
        Some((flag.clone(), version))
    }

    /// Action rule id for stored action prompts.
    pub fn action_id(&self) -> Option<&str> {
        self.content.src.get("id").and_then(Value::as_str)
    }
}

/// Outcome recorded for an action prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    SubmitSuccess,
    LongTerm,
}

/// A user reachable for scheduled messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Contact {
    pub platform: String,
    pub uid: String,
    pub topic: String,
}

impl Contact {
    pub fn new(platform: impl Into<String>, uid: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            uid: uid.into(),
            topic: topic.into(),
        }
    }
}

// =============================================================================
// Store
// =============================================================================

/// Persistence operations the engine needs.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_session(&self, uid: &str, topic: &str) -> StoreResult<Option<SessionRecord>>;

    async fn set_session(&self, record: SessionRecord) -> StoreResult<()>;

    async fn clear_session(&self, uid: &str, topic: &str) -> StoreResult<()>;

    async fn get_pipeline(&self, uid: &str, topic: &str, flag: &str) -> StoreResult<Option<PipelineRecord>>;

    /// Writes pipeline progress.
    ///
    /// `expected` is the version the caller read; a mismatch with the stored
    /// record fails with `VersionConflict`. `None` creates a new record.
    async fn set_pipeline(&self, record: PipelineRecord, expected: Option<u32>) -> StoreResult<()>;

    async fn clear_pipeline(&self, uid: &str, topic: &str, flag: &str) -> StoreResult<()>;

    /// Persists a message, assigns the next per-topic `seq` and returns it.
    async fn save_message(&self, message: StoredMessage) -> StoreResult<i64>;

    async fn get_message(&self, topic: &str, seq: i64) -> StoreResult<Option<StoredMessage>>;

    /// Looks up a message sent to `uid` by sequence number.
    ///
    /// `seq` is numbered per topic, so one `(uid, seq)` may name messages in
    /// several topics; the most recently saved one is returned.
    async fn get_message_by_uid(&self, uid: &str, seq: i64) -> StoreResult<Option<StoredMessage>>;

    async fn get_action_state(&self, topic: &str, seq: i64) -> StoreResult<Option<ActionState>>;

    async fn set_action_state(&self, topic: &str, seq: i64, state: ActionState) -> StoreResult<()>;

    async fn record_contact(&self, contact: Contact) -> StoreResult<()>;

    async fn contacts(&self) -> StoreResult<Vec<Contact>>;

    /// Records `key` under `scope`; returns `true` the first time only.
    ///
    /// Implementations may bound how many keys they remember per scope.
    async fn first_seen(&self, scope: &str, key: &str) -> StoreResult<bool>;

    /// Drops `key` from `scope` so the next `first_seen` returns `true`.
    async fn forget(&self, scope: &str, key: &str) -> StoreResult<()>;
}

/// Shared store handle.
pub type SharedStore = Arc<dyn Store>;
