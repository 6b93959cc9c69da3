//! Outbound delivery seam.
//!
//! The engine hands every outbound payload to an [`Outbox`] as an
//! [`Envelope`]. [`DirectOutbox`] sends inline through the platform action;
//! the runtime's delivery queue implements the same trait to send from
//! background consumers.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chatflow_core::{ChoiceOption, Payload, SelfInfo, SendMessageParams, SharedPlatforms};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DispatchError, DispatchResult};

/// One outbound payload and its addressing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Destination topic.
    pub rcpt_to: String,
    pub uid: String,
    #[serde(rename = "self")]
    pub self_info: SelfInfo,
    pub payload: Payload,
    /// Stored message sequence, `0` when not persisted.
    #[serde(default)]
    pub seq: i64,
    #[serde(default)]
    pub head: BTreeMap<String, String>,
}

impl Envelope {
    pub fn new(self_info: SelfInfo, uid: impl Into<String>, rcpt_to: impl Into<String>, payload: Payload) -> Self {
        Self {
            rcpt_to: rcpt_to.into(),
            uid: uid.into(),
            self_info,
            payload,
            seq: 0,
            head: BTreeMap::new(),
        }
    }

    pub fn with_seq(mut self, seq: i64) -> Self {
        self.seq = seq;
        self
    }

    pub fn with_head(mut self, head: BTreeMap<String, String>) -> Self {
        self.head = head;
        self
    }

    pub fn platform(&self) -> &str {
        &self.self_info.platform
    }
}

/// Destination of outbound envelopes.
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn send(&self, envelope: Envelope) -> DispatchResult<()>;
}

/// Shared outbox handle.
pub type SharedOutbox = Arc<dyn Outbox>;

/// Renders and sends one envelope through its platform.
pub async fn deliver(platforms: &SharedPlatforms, envelope: &Envelope) -> DispatchResult<()> {
    let caller = platforms.require(envelope.platform())?;
    let message = caller.adapter.message_convert(&envelope.payload);
    let mut params = SendMessageParams::new(envelope.rcpt_to.clone(), message).with_seq(envelope.seq);
    if let Payload::Action { options, .. } = &envelope.payload {
        params = params.with_options(
            options
                .iter()
                .map(|o| ChoiceOption {
                    label: o.clone(),
                    value: format!("{}:{o}", envelope.seq),
                })
                .collect(),
        );
    }

    let resp = caller.send(params).await;
    if !resp.is_ok() {
        return Err(DispatchError::Delivery {
            platform: envelope.platform().to_string(),
            retcode: resp.retcode,
            message: resp.message,
        });
    }
    debug!(
        platform = %envelope.platform(),
        topic = %envelope.rcpt_to,
        seq = envelope.seq,
        "Delivered message"
    );
    Ok(())
}

/// Sends inline on the dispatching task.
pub struct DirectOutbox {
    platforms: SharedPlatforms,
}

impl DirectOutbox {
    pub fn new(platforms: SharedPlatforms) -> Self {
        Self { platforms }
    }
}

#[async_trait]
impl Outbox for DirectOutbox {
    async fn send(&self, envelope: Envelope) -> DispatchResult<()> {
        deliver(&self.platforms, &envelope).await
    }
}
