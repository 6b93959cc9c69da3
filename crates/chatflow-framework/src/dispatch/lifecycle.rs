//! Session and pipeline lifecycle.
//!
//! Sessions move `None -> Start -> (Cancel | None)`. Pipelines start at
//! stage 0 with version 1; each advance bumps both, so a continuation that
//! carries an older version is rejected by the store.

use std::collections::BTreeMap;

use chatflow_core::{Payload, RegistryError};
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::engine::{
    ERROR_PIPELINE, ERROR_SESSION, Engine, Outcome, PIPELINE_DONE, SESSION_CANCEL, Step, expired,
    pipeline_head,
};
use super::metrics::DispatchMetrics;
use crate::context::Ctx;
use crate::error::{BotError, BotResult, DispatchError, DispatchResult, StoreError};
use crate::rule::{PipelineRule, SessionInput, SessionTurn, Stage};
use crate::store::{PipelineRecord, PipelineState, SessionRecord, SessionState};

/// Where a pipeline stopped after entering a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Advance {
    /// Emitted a stage that waits for the user.
    Waiting,
    /// Ran past the last stage.
    Done,
    /// A stage could not produce its payload; progress is unchanged.
    Failed,
}

impl Engine {
    // =========================================================================
    // Session
    // =========================================================================

    /// Loads the session of `(uid, topic)`, clearing it when expired.
    pub(super) async fn load_session(&self, uid: &str, topic: &str) -> Option<SessionRecord> {
        let record = match self.store.get_session(uid, topic).await {
            Ok(record) => record?,
            Err(e) => {
                warn!(uid, topic, error = %e, "Session lookup failed");
                return None;
            }
        };
        if expired(record.updated_at, self.config.session_ttl()) {
            debug!(uid, topic, rule = %record.rule_id, "Session expired");
            if let Err(e) = self.store.clear_session(uid, topic).await {
                warn!(uid, topic, error = %e, "Failed to clear expired session");
            }
            return None;
        }
        Some(record)
    }

    /// Starts session `rule_id` for the context's user and topic.
    ///
    /// Fails while another session is `Start` for the same key; a cancelled
    /// session is replaced.
    pub async fn start_session(
        &self,
        ctx: &Ctx,
        rule_id: &str,
        pipeline: Option<(String, u32)>,
    ) -> DispatchResult<()> {
        if self.rules.session(rule_id).is_none() {
            return Err(RegistryError::UnknownRule {
                kind: "session".to_string(),
                id: rule_id.to_string(),
            }
            .into());
        }
        if let Some(existing) = self.load_session(ctx.uid(), ctx.topic()).await {
            if existing.is_active() {
                return Err(StoreError::SessionAlreadyStarted {
                    uid: ctx.uid().to_string(),
                    topic: ctx.topic().to_string(),
                }
                .into());
            }
        }

        let mut record = SessionRecord::start(ctx.uid(), ctx.topic(), rule_id);
        record.pipeline = pipeline;
        self.store.set_session(record).await?;
        debug!(uid = %ctx.uid(), topic = %ctx.topic(), rule = %rule_id, "Session started");
        Ok(())
    }

    pub(super) async fn run_session(
        &self,
        ctx: &Ctx,
        mut record: SessionRecord,
        text: &str,
    ) -> DispatchResult<Outcome> {
        DispatchMetrics::inc(&self.metrics.session);

        if self.config.is_cancel(text) {
            record.state = SessionState::Cancel;
            record.updated_at = Utc::now();
            self.store.set_session(record).await?;
            info!(uid = %ctx.uid(), topic = %ctx.topic(), "Session cancelled");
            return self
                .reply(ctx, Some(Payload::text(SESSION_CANCEL)), Step::Session)
                .await;
        }

        let Some((bot, rule)) = self.rules.session(&record.rule_id) else {
            warn!(rule = %record.rule_id, "Session rule not registered, clearing session");
            self.store.clear_session(ctx.uid(), ctx.topic()).await?;
            return self
                .reply(ctx, Some(Payload::text(ERROR_SESSION)), Step::Session)
                .await;
        };

        let input = SessionInput {
            init: &record.init_values,
            last: &record.last_values,
            content: text,
        };
        let turn = match (rule.handler)(&ctx.for_bot(bot.name()), &input) {
            Ok(turn) => turn,
            Err(e) => {
                warn!(bot = %bot.name(), rule = %rule.id, error = %e, "Session handler failed");
                return Ok(Outcome::Silent(Step::Session));
            }
        };

        match turn {
            SessionTurn::Continue { payload, values } => {
                record.last_values = values;
                record.updated_at = Utc::now();
                self.store.set_session(record).await?;
                self.reply(ctx, payload, Step::Session).await
            }
            SessionTurn::Done(payload) => {
                self.store.clear_session(ctx.uid(), ctx.topic()).await?;
                debug!(uid = %ctx.uid(), topic = %ctx.topic(), rule = %rule.id, "Session done");
                let outcome = self.reply(ctx, payload, Step::Session).await?;
                if let Some((flag, version)) = record.pipeline {
                    self.continue_pipeline(ctx, &flag, version).await;
                }
                Ok(outcome)
            }
        }
    }

    // =========================================================================
    // Pipeline
    // =========================================================================

    pub(super) async fn trigger_pipeline(&self, ctx: &Ctx, text: &str) -> DispatchResult<Outcome> {
        DispatchMetrics::inc(&self.metrics.pipeline);

        let tokens = crate::grammar::tokenize(text);
        let matched = self
            .rules
            .pipelines()
            .find(|(bot, p)| bot.is_ready() && p.trigger.match_tokens(&tokens).is_some());
        let Some((bot, compiled)) = matched else {
            debug!(text, "No pipeline matched");
            return self
                .reply(ctx, Some(Payload::text(ERROR_PIPELINE)), Step::Pipeline)
                .await;
        };

        let record = PipelineRecord {
            uid: ctx.uid().to_string(),
            topic: ctx.topic().to_string(),
            flag: Uuid::new_v4().simple().to_string(),
            rule_id: compiled.rule.id.clone(),
            stage: 0,
            version: 1,
            state: PipelineState::Running,
            trigger: text.to_string(),
            updated_at: Utc::now(),
        };
        info!(
            bot = %bot.name(),
            pipeline = %record.rule_id,
            flag = %record.flag,
            "Pipeline triggered"
        );

        if self.enter_stage(ctx, record, &compiled.rule, 0, None).await? == Advance::Failed {
            return self
                .reply(ctx, Some(Payload::text(ERROR_PIPELINE)), Step::Pipeline)
                .await;
        }
        Ok(Outcome::Replied(Step::Pipeline))
    }

    /// Advances pipeline `flag` past the stage tagged with `version`.
    pub async fn advance_pipeline(&self, ctx: &Ctx, flag: &str, version: u32) -> DispatchResult<()> {
        let not_found = || StoreError::NotFound(format!("pipeline '{flag}'"));
        let record = self
            .store
            .get_pipeline(ctx.uid(), ctx.topic(), flag)
            .await?
            .ok_or_else(not_found)?;

        if expired(record.updated_at, self.config.pipeline_ttl()) {
            self.store.clear_pipeline(ctx.uid(), ctx.topic(), flag).await?;
            return Err(not_found().into());
        }
        if record.state == PipelineState::Done {
            debug!(flag, "Pipeline already done");
            return Ok(());
        }
        if record.version != version {
            return Err(StoreError::VersionConflict {
                flag: flag.to_string(),
                expected: record.version,
                found: version,
            }
            .into());
        }
        let Some((_, rule)) = self.rules.pipeline(&record.rule_id) else {
            return Err(RegistryError::UnknownRule {
                kind: "pipeline".to_string(),
                id: record.rule_id.clone(),
            }
            .into());
        };

        let next = record.stage + 1;
        let expected = record.version;
        self.enter_stage(ctx, record, rule, next, Some(expected)).await?;
        Ok(())
    }

    /// Advances a pipeline and logs instead of failing.
    pub(super) async fn continue_pipeline(&self, ctx: &Ctx, flag: &str, version: u32) {
        match self.advance_pipeline(ctx, flag, version).await {
            Ok(()) => {}
            Err(DispatchError::Store(e @ StoreError::VersionConflict { .. })) => {
                warn!(flag, error = %e, "Stale pipeline continuation rejected");
            }
            Err(e) => warn!(flag, error = %e, "Pipeline continuation failed"),
        }
    }

    /// Moves `record` to `stage` and emits it.
    ///
    /// Stages that do not wait for the user chain into the next one within
    /// the same call. Running past the last stage marks the record done.
    async fn enter_stage(
        &self,
        ctx: &Ctx,
        mut record: PipelineRecord,
        rule: &PipelineRule,
        mut stage: usize,
        mut expected: Option<u32>,
    ) -> DispatchResult<Advance> {
        loop {
            let version = expected.map_or(1, |v| v + 1);
            let Some(step) = rule.steps.get(stage) else {
                record.stage = stage;
                record.version = version;
                record.state = PipelineState::Done;
                record.updated_at = Utc::now();
                self.store.set_pipeline(record.clone(), expected).await?;
                info!(pipeline = %record.rule_id, flag = %record.flag, "Pipeline done");
                self.deliver(ctx, Payload::text(PIPELINE_DONE), BTreeMap::new())
                    .await?;
                return Ok(Advance::Done);
            };

            let payload = match self.stage_payload(ctx, step) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(
                        pipeline = %record.rule_id,
                        flag = %record.flag,
                        stage,
                        error = %e,
                        "Pipeline stage failed"
                    );
                    return Ok(Advance::Failed);
                }
            };

            record.stage = stage;
            record.version = version;
            record.state = PipelineState::Running;
            record.updated_at = Utc::now();
            self.store.set_pipeline(record.clone(), expected).await?;
            debug!(flag = %record.flag, stage, version, "Pipeline stage entered");

            if let Some(payload) = payload {
                self.deliver(ctx, payload, pipeline_head(&record.flag, version))
                    .await?;
            }
            if step.awaits_reply() {
                return Ok(Advance::Waiting);
            }
            expected = Some(version);
            stage += 1;
        }
    }

    fn stage_payload(&self, ctx: &Ctx, stage: &Stage) -> BotResult<Option<Payload>> {
        match stage {
            Stage::Command { bot, args } => self
                .match_command(ctx, Some(bot), args)
                .unwrap_or_else(|| {
                    Err(BotError::invalid_argument(format!(
                        "no command of '{bot}' matches '{args}'"
                    )))
                }),
            Stage::Action { rule_id } => self
                .rules
                .action(rule_id)
                .map(|(_, rule)| Some(rule.prompt()))
                .ok_or_else(|| BotError::Unsupported(format!("action '{rule_id}'"))),
            Stage::Session { rule_id } => self
                .rules
                .session(rule_id)
                .map(|(_, rule)| Some(rule.prompt()))
                .ok_or_else(|| BotError::Unsupported(format!("session '{rule_id}'"))),
            Stage::Form { rule_id } => self
                .rules
                .form(rule_id)
                .map(|(_, rule)| Some(rule.question()))
                .ok_or_else(|| BotError::Unsupported(format!("form '{rule_id}'"))),
            Stage::Message(payload) => Ok(Some(payload.clone())),
        }
    }
}
